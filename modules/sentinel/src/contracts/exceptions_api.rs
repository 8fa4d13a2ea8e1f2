//! Exception management API contracts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::error::AppError;
use crate::models::{ExceptionRecord, ExceptionSeverity, ExceptionStatus};
use crate::reason_codes::ReasonCode;

pub const MAX_PAGE_SIZE: i64 = 100;

/// Query parameters for `GET /exceptions`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExceptionListQuery {
    pub status: Option<String>,
    pub reason_code: Option<String>,
    pub severity: Option<String>,
    pub order_id: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// Validated filter set derived from [`ExceptionListQuery`]
#[derive(Debug, Clone)]
pub struct ExceptionFilters {
    pub status: Option<ExceptionStatus>,
    pub reason_code: Option<ReasonCode>,
    pub severity: Option<ExceptionSeverity>,
    pub order_id: Option<String>,
    pub page: i64,
    pub page_size: i64,
}

impl ExceptionListQuery {
    pub fn validate(self) -> Result<ExceptionFilters, AppError> {
        let status = match &self.status {
            Some(raw) => Some(
                ExceptionStatus::parse(raw)
                    .ok_or_else(|| AppError::Validation(format!("unknown status '{raw}'")))?,
            ),
            None => None,
        };

        let reason_code = match &self.reason_code {
            Some(raw) => Some(
                ReasonCode::parse(raw)
                    .ok_or_else(|| AppError::Validation(format!("unknown reason_code '{raw}'")))?,
            ),
            None => None,
        };

        let severity = match &self.severity {
            Some(raw) => Some(
                ExceptionSeverity::parse(raw)
                    .ok_or_else(|| AppError::Validation(format!("unknown severity '{raw}'")))?,
            ),
            None => None,
        };

        let page = self.page.unwrap_or(1);
        if page < 1 {
            return Err(AppError::Validation("page must be >= 1".to_string()));
        }

        let page_size = self.page_size.unwrap_or(20);
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(AppError::Validation(format!(
                "page_size must be in [1, {MAX_PAGE_SIZE}]"
            )));
        }

        Ok(ExceptionFilters {
            status,
            reason_code,
            severity,
            order_id: self.order_id,
            page,
            page_size,
        })
    }
}

/// Operator update for `PATCH /exceptions/{id}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExceptionUpdateRequest {
    pub status: Option<String>,
    pub severity: Option<String>,
    pub ops_note: Option<String>,
    /// Manual intervention: reset the resolution attempt counter and unblock
    #[serde(default)]
    pub reset_resolution_tracking: bool,
}

/// Exception representation returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionResponse {
    pub id: i64,
    pub tenant: String,
    pub order_id: String,
    pub reason_code: String,
    pub status: String,
    pub severity: String,
    pub ai_label: Option<String>,
    pub ai_confidence: Option<f64>,
    pub ops_note: Option<String>,
    pub client_note: Option<String>,
    pub resolution_attempts: i32,
    pub max_resolution_attempts: i32,
    pub resolution_blocked: bool,
    pub resolution_block_reason: Option<String>,
    pub is_resolution_eligible: bool,
    pub context_data: Option<JsonValue>,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl From<ExceptionRecord> for ExceptionResponse {
    fn from(record: ExceptionRecord) -> Self {
        let is_resolution_eligible = record.is_resolution_eligible();
        Self {
            id: record.id,
            tenant: record.tenant,
            order_id: record.order_id,
            reason_code: record.reason_code,
            status: record.status,
            severity: record.severity,
            ai_label: record.ai_label,
            ai_confidence: record.ai_confidence,
            ops_note: record.ops_note,
            client_note: record.client_note,
            resolution_attempts: record.resolution_attempts,
            max_resolution_attempts: record.max_resolution_attempts,
            resolution_blocked: record.resolution_blocked,
            resolution_block_reason: record.resolution_block_reason,
            is_resolution_eligible,
            context_data: record.context_data,
            correlation_id: record.correlation_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
            resolved_at: record.resolved_at,
        }
    }
}

/// Paginated listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionListResponse {
    pub items: Vec<ExceptionResponse>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

/// Aggregate for `GET /exceptions/stats/summary`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionStatsSummary {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_severity: BTreeMap<String, i64>,
    pub by_reason_code: BTreeMap<String, i64>,
    pub resolution_blocked: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_page_and_page_size() {
        let filters = ExceptionListQuery::default().validate().unwrap();
        assert_eq!(filters.page, 1);
        assert_eq!(filters.page_size, 20);
    }

    #[test]
    fn rejects_out_of_range_pagination() {
        let query = ExceptionListQuery {
            page: Some(0),
            ..Default::default()
        };
        assert!(query.validate().is_err());

        let query = ExceptionListQuery {
            page_size: Some(101),
            ..Default::default()
        };
        assert!(query.validate().is_err());
    }

    #[test]
    fn rejects_unknown_filter_values() {
        let query = ExceptionListQuery {
            status: Some("SNOOZED".into()),
            ..Default::default()
        };
        assert!(query.validate().is_err());

        let query = ExceptionListQuery {
            reason_code: Some("GREMLINS".into()),
            ..Default::default()
        };
        assert!(query.validate().is_err());
    }

    #[test]
    fn parses_valid_filters() {
        let query = ExceptionListQuery {
            status: Some("OPEN".into()),
            reason_code: Some("PICK_DELAY".into()),
            severity: Some("MEDIUM".into()),
            order_id: Some("o-1".into()),
            page: Some(2),
            page_size: Some(50),
        };
        let filters = query.validate().unwrap();
        assert_eq!(filters.status, Some(ExceptionStatus::Open));
        assert_eq!(filters.reason_code, Some(ReasonCode::PickDelay));
        assert_eq!(filters.severity, Some(ExceptionSeverity::Medium));
        assert_eq!(filters.page, 2);
    }
}
