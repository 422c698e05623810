//! Protocol primitives shared by the provider client and the relay

pub mod streaming;

pub use streaming::{SseDecoder, SseFrame};
