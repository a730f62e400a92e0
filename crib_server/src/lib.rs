//! HTTP/WebSocket front end for the cribbage match engine.
//!
//! The binary in `main.rs` wires these modules together; they live in a
//! library so integration tests can build the router directly.

pub mod api;
pub mod auth;
pub mod config;
pub mod logging;
pub mod metrics;
