//! pm-core: Core abstractions and configuration for portmux
//!
//! This crate provides the `Stream` trait, error types, and configuration
//! structures shared by the multiplexer and the CLI.

pub mod config;
pub mod error;
pub mod testing;
pub mod traits;
pub mod types;

pub use error::{ConfigError, MuxError, StreamError};
pub use traits::{Stream, StreamState};
pub use types::Role;
