//! Response types for the health API.

use chrono::{DateTime, Utc};
use postforge_core::token::TokenStatus;
use serde::{Deserialize, Serialize};

/// Body of `GET /stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    /// `running` while the scheduler loop is active, `stopped` afterwards.
    pub status: String,
    /// Blog URL being posted to.
    pub blog: String,
    /// Human-readable posting interval, e.g. `60 minutes`.
    pub posting_interval: String,
    /// Time this snapshot was taken.
    pub last_check: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub post_count: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    /// `None` when no OAuth credential is configured.
    pub token_status: Option<TokenStatus>,
}
