//! Control-plane endpoints driving the broadcast shim.

mod dto;
mod handlers;
mod routes;

pub use handlers::ControlAppState;
pub use routes::{control_router, service_info_router};
