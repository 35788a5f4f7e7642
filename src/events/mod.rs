//! Event system for job and overlay state changes
//!
//! This module provides:
//! - `CoordinatorEvent`: typed events emitted on every state transition
//! - `EventEmitter`: the sink trait components publish through
//! - `EventBus`: broadcast channel fanning events out to subscribers

mod bus;
mod types;

pub use bus::EventBus;
pub use types::{CoordinatorEvent, EventEmitter, EventKind, NullEmitter};
