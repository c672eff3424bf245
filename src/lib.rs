//! stepsync: submit daily step counts for many accounts while keeping each
//! account's login tokens cached and refreshed tier by tier.
//!
//! The binary in `main.rs` wires these modules together; integration tests
//! in `tests/` drive them through the library.

pub mod cli;
pub mod clock;
pub mod config;
pub mod errors;
pub mod executor;
pub mod lifecycle;
pub mod models;
pub mod notification;
pub mod remote;
pub mod scheduler;
pub mod store;
pub mod vault;
