//! pm-mux: Stream multiplexer for portmux
//!
//! Carries many independent, bidirectional byte streams over a single
//! duplex transport. Each stream has its own identifier, immutable headers,
//! graceful close, and abortive reset.

pub mod mux;
pub mod stream;
pub mod table;

pub use mux::{IncomingStreams, Multiplexer};
pub use stream::{MuxStream, StreamShared};
pub use table::StreamTable;
