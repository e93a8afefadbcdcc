//! Per-platform validation outcomes returned to the caller.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::platform::Platform;

/// Outcome class of one platform's validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Credential exercised (or tools present where that suffices).
    Success,
    /// The platform responded but the tool surface is unusable.
    Failed,
    /// Validation was not attempted for this platform.
    Skipped,
    /// An exception was raised while probing.
    Error,
}

/// Result of validating one transport server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Transport/server identifier the result came from.
    pub server: String,
    /// Resolved platform; absent when the server identifier could not be
    /// attributed to any known platform.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    pub status: ValidationStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub duration_ms: u64,
    /// Connection row the telemetry write-back targets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<Uuid>,
}

impl ValidationResult {
    pub fn success(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(server, ValidationStatus::Success, message)
    }

    pub fn failed(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(server, ValidationStatus::Failed, message)
    }

    pub fn skipped(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(server, ValidationStatus::Skipped, message)
    }

    pub fn error(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(server, ValidationStatus::Error, message)
    }

    fn with_status(
        server: impl Into<String>,
        status: ValidationStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            platform: None,
            status,
            message: message.into(),
            error_detail: None,
            duration_ms: 0,
            connection_id: None,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_error_detail(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_connection_id(mut self, connection_id: Uuid) -> Self {
        self.connection_id = Some(connection_id);
        self
    }
}

/// Aggregate counts over a run's validation results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub error: usize,
}

impl ValidationSummary {
    pub fn from_results(results: &[ValidationResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.status {
                ValidationStatus::Success => summary.success += 1,
                ValidationStatus::Failed => summary.failed += 1,
                ValidationStatus::Skipped => summary.skipped += 1,
                ValidationStatus::Error => summary.error += 1,
            }
        }
        summary
    }

    pub fn all_successful(&self) -> bool {
        self.success == self.total
    }
}
