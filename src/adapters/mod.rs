//! Adapters: concrete implementations of the ports plus the transport edges.

pub mod auth;
pub mod http;
pub mod websocket;
