//! Duplex message channel used to submit jobs and receive their results.
//!
//! - `Channel` / `ChannelHandle`: transport-neutral contract
//! - `WsChannel`: WebSocket implementation
//! - `mock::MockChannel`: scripted implementation for tests

pub mod mock;
mod traits;
mod ws;

pub use traits::{Channel, ChannelFrame, ChannelHandle};
pub use ws::WsChannel;
