//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the auth coordination core:
//! - Logging and tracing infrastructure
//! - Configuration management (API key, app name, auth domain, timeouts)
//! - Auth-state event bus
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the persistence, channel and
//! auth crates depend on. It establishes the logging conventions, the
//! fail-fast configuration rules, and the event broadcasting used to surface
//! auth-state changes to host shells.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{AuthConfig, AuthConfigBuilder, Timeouts};
pub use error::{Error, Result};
