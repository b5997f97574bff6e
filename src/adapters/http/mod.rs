//! HTTP adapters - the control-plane REST surface.
//!
//! The control plane is deliberately thin: every endpoint maps 1:1 onto the
//! [`RoomBroadcaster`](crate::ports::RoomBroadcaster) shim. Room persistence,
//! song assets, and the rest of the catalog live behind other services.

pub mod control;
pub mod middleware;

pub use control::{control_router, ControlAppState};
