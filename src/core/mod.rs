//! Core utilities and common types for skyguard.

pub mod config;
pub mod error;
pub mod types;

pub use config::SubsystemConfig;
pub use error::{Error, FailureCategory, Result};
pub use types::*;
