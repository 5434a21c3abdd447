// node/src/lib.rs

//! Process wiring for the `eth-bridge` binary
//!
//! This crate provides:
//! - TOML configuration with per-section defaults
//! - Logging setup (stdout plus an optional log file)
//! - The `Node` that connects the backend client, the RPC server and the
//!   subscription agent, and shuts them down in order

pub mod config;
pub mod logging;
pub mod runtime;

pub use config::NodeConfig;
pub use runtime::Node;
