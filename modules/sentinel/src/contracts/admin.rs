//! Admin endpoint contracts

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request for `POST /admin/replay`
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayRequest {
    #[serde(default = "default_replay_limit")]
    pub limit: i64,
    /// Tenant filter; `None` replays across all tenants
    #[serde(default)]
    pub tenant: Option<String>,
}

fn default_replay_limit() -> i64 {
    10
}

/// Response for `POST /admin/replay`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayResponse {
    pub fetched: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Response for `GET /admin/dlq/stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqStatsResponse {
    pub pending: i64,
    pub processed: i64,
    pub failed: i64,
    pub total: i64,
    pub by_operation: BTreeMap<String, i64>,
}

/// Query for `POST /admin/dlq/cleanup`
#[derive(Debug, Clone, Deserialize)]
pub struct DlqCleanupQuery {
    #[serde(default = "default_cleanup_days")]
    pub days_old: i64,
}

fn default_cleanup_days() -> i64 {
    30
}

/// Request for `POST /admin/ai/lint-policy`
#[derive(Debug, Clone, Deserialize)]
pub struct LintPolicyRequest {
    pub policy_type: String,
    pub policy_text: String,
}

/// Response for `POST /admin/cache/clear`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheClearResponse {
    pub cleared: Vec<String>,
}
