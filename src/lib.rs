//! A small multi-client TCP server that stores and serves files by name and
//! relays text messages between registered clients.
//!
//! The wire protocol is line-oriented and lockstep: a client sends one command
//! and waits for its reply before sending the next. File payloads travel as raw
//! chunks terminated by the 3-byte sentinel `EOF`.

// Public module for loading and validating server configuration.
pub mod config;

// Public module exposing logging utilities for server lifecycle events.
pub mod logger;

// Error taxonomy shared by the session loop, the store and the client.
pub mod error;

// Directory-backed blob store keyed by file name.
pub mod store;

// Programmatic peer that speaks the same protocol as the server.
pub mod client;

// The TCP server: listener, framing, registry, session state machine, fan-out.
pub mod server;

pub use client::ExchangeClient;
pub use config::{LoggerConfig, ServerConfig};
pub use error::{ConfigError, ExchangeError};
pub use logger::{Logger, init_logger};
pub use server::{Server, ShutdownHandle, run_server};
pub use store::FileStore;
