// src/lib.rs

pub mod chat;
pub mod config;
pub mod core;
pub mod error;
pub mod server;

pub use error::{ForestError, Result};
