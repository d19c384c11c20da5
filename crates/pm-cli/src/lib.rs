//! portmux: TCP port forwarding over one multiplexed connection
//!
//! The `serve` side accepts transports and connects each incoming stream to
//! a local port named in its headers. The `forward` side listens locally and
//! tunnels every accepted connection through its own stream.

pub mod commands;
pub mod options;
pub mod output;
pub mod pump;
