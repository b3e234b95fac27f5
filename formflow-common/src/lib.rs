//! # formflow common library
//!
//! Shared code for the formflow services:
//! - Error and result types
//! - Configuration loading (TOML bootstrap + root folder resolution)
//! - Event model and pattern-matching EventBus
//! - SSE adapter for streaming bus subscriptions

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result, StagedError};
