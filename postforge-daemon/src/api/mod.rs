//! HTTP health API.
//!
//! Liveness and status endpoints for external monitors. They answer
//! independently of the scheduler, including while a posting run is in
//! progress and after the bot has stopped.

pub mod handlers;
pub mod server;
pub mod types;

pub use handlers::{ApiState, router};
pub use server::{ServerHandle, start_server};
pub use types::StatsResponse;
