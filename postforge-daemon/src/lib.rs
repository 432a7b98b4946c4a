//! Postforge Daemon Library
//!
//! This library exposes the daemon's configuration, wiring and health API
//! for testing and potential embedding in other applications.

pub mod api;
pub mod bot;
pub mod config;

pub use api::{ApiState, ServerHandle, start_server};
pub use bot::Bot;
pub use config::{BotConfig, LogFormat, load_config};
