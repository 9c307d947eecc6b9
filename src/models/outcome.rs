use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ProvisionerError;
use crate::models::tenant::TenantSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureStage {
    None,
    DatabaseCreate,
    Migrate,
    AccountCreate,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::None => "none",
            FailureStage::DatabaseCreate => "databaseCreate",
            FailureStage::Migrate => "migrate",
            FailureStage::AccountCreate => "accountCreate",
        }
    }
}

/// Where a provisioning attempt stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProvisioningState {
    Validated,
    DatabaseCreated,
    ConfigRegistered,
    Migrated,
    AccountReady,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountStatus {
    Created,
    AlreadyExists,
    Failed,
    Skipped,
}

/// Result of one provisioning attempt. Returned and logged, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningOutcome {
    pub tenant_name: String,
    pub db_name: String,
    pub succeeded: bool,
    pub failure_stage: FailureStage,
    pub error_detail: Option<String>,
    pub state: ProvisioningState,
    pub account: AccountStatus,
    /// Set when the registry upsert failed; the workflow carries on regardless.
    pub registry_error: Option<String>,
    pub rolled_back: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ProvisioningOutcome {
    pub(crate) fn started(spec: &TenantSpec) -> Self {
        let now = Utc::now();
        Self {
            tenant_name: spec.name.clone(),
            db_name: spec.db_name.clone(),
            succeeded: false,
            failure_stage: FailureStage::None,
            error_detail: None,
            state: ProvisioningState::Validated,
            account: AccountStatus::Skipped,
            registry_error: None,
            rolled_back: false,
            started_at: now,
            finished_at: now,
        }
    }

    pub(crate) fn advance(&mut self, next: ProvisioningState) {
        tracing::debug!(from = ?self.state, to = ?next, "provisioning state change");
        self.state = next;
    }

    pub(crate) fn record_failure(&mut self, stage: FailureStage, error: &ProvisionerError) {
        self.failure_stage = stage;
        self.error_detail = Some(error.to_string());
    }

    pub(crate) fn finish(mut self, succeeded: bool) -> Self {
        self.succeeded = succeeded;
        self.finished_at = Utc::now();
        self
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}
