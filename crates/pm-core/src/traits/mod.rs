//! Core trait definitions

mod stream;

pub use stream::{Stream, StreamState};
