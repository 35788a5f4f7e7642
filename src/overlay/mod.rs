//! Deletion-request overlay on top of the project tree.
//!
//! - `decorate` / `decorate_all`: pure projection of a store onto trees
//! - `OverlayReconciler`: optimistic approve/reject and background resync

mod decorate;
mod reconciler;

pub use decorate::{decorate, decorate_all};
pub use reconciler::{OverlayReconciler, Resolution};
