//! Core module - Common types, decimal wire helpers, errors, configuration

pub mod config;
pub mod decimal;
pub mod error;
pub mod types;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use types::*;
