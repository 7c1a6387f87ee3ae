//! Hostlink Core
//!
//! Core domain types, errors, configuration, and shared executor state for
//! the hostlink agent. This crate has minimal dependencies and defines the
//! shared vocabulary used across all other crates.

pub mod config;
pub mod error;
pub mod messages;
pub mod ports;
pub mod state;
pub mod util;

pub use error::{Error, Result};
