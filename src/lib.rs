//! Score Sync - Real-time collaboration backend for synchronized score display
//!
//! A designated host controls which song and which page is shown; every
//! participant connected to the same room sees the change within tens of
//! milliseconds over a persistent WebSocket connection.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
