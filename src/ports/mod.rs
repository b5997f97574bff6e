//! Ports: trait contracts between the core and its adapters.

mod room_broadcaster;
mod token_verifier;

pub use room_broadcaster::{PageUpdate, RoomBroadcaster, SongUpdate};
pub use token_verifier::TokenVerifier;
