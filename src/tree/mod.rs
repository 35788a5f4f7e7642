//! In-memory project tree with identity-keyed lookup.

mod cursor;
mod models;

pub use cursor::StageCursor;
pub use models::{Annotated, ChecklistItem, DeletionOverlay, Gate, Project, Stage, Task};
