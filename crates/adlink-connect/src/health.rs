//! Connection health telemetry.
//!
//! Writes success/failure outcomes back to the credential store so the
//! dashboard can show connection health and prompt re-authentication.
//! Telemetry must never abort the pipeline: both record operations swallow
//! their own errors and report `false` instead.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use adlink_models::Connection;
use adlink_storage::ConnectionStore;

/// Failure-count threshold used by `should_retry` when callers pass no
/// explicit limit.
pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// Recorder for per-connection health telemetry.
#[derive(Clone)]
pub struct ConnectionHealth {
    store: Arc<dyn ConnectionStore>,
}

impl ConnectionHealth {
    pub fn new(store: Arc<dyn ConnectionStore>) -> Self {
        Self { store }
    }

    /// Record a failure: bump the counter, stamp `last_failure_at`, replace
    /// the reason, and optionally flag the row for re-authentication.
    ///
    /// Returns whether the write landed. A missing connection id is logged
    /// and reported as `false`, never raised.
    pub async fn record_failure(
        &self,
        connection_id: Uuid,
        reason: &str,
        also_set_needs_reauth: bool,
    ) -> bool {
        let mut connection = match self.store.get(connection_id).await {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                tracing::warn!(%connection_id, "Connection not found, cannot record failure");
                return false;
            }
            Err(e) => {
                tracing::error!(%connection_id, error = %e, "Failed to load connection for failure record");
                return false;
            }
        };

        let now = Utc::now();
        connection.last_failure_at = Some(now);
        connection.failure_count = connection.failure_count.saturating_add(1);
        connection.failure_reason = Some(reason.to_string());
        if also_set_needs_reauth {
            connection.needs_reauth = true;
        }
        connection.updated_at = now;

        match self.store.save(&connection).await {
            Ok(()) => {
                tracing::info!(
                    %connection_id,
                    reason,
                    failure_count = connection.failure_count,
                    "Recorded connection failure"
                );
                true
            }
            Err(e) => {
                tracing::error!(%connection_id, error = %e, "Failed to record connection failure");
                false
            }
        }
    }

    /// Record a success: stamp `last_validated_at`/`last_used_at`, clear the
    /// re-auth flag, and optionally reset the failure counters.
    pub async fn record_success(&self, connection_id: Uuid, reset_failure_count: bool) -> bool {
        let mut connection = match self.store.get(connection_id).await {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                tracing::warn!(%connection_id, "Connection not found, cannot record success");
                return false;
            }
            Err(e) => {
                tracing::error!(%connection_id, error = %e, "Failed to load connection for success record");
                return false;
            }
        };

        let now = Utc::now();
        connection.last_validated_at = Some(now);
        connection.last_used_at = Some(now);
        if reset_failure_count {
            connection.failure_count = 0;
            connection.failure_reason = None;
            connection.last_failure_at = None;
        }
        connection.needs_reauth = false;
        connection.updated_at = now;

        match self.store.save(&connection).await {
            Ok(()) => {
                tracing::info!(%connection_id, "Recorded connection success");
                true
            }
            Err(e) => {
                tracing::error!(%connection_id, error = %e, "Failed to record connection success");
                false
            }
        }
    }
}

/// Whether a connection should still be retried given its failure count.
pub fn should_retry(connection: &Connection, max_failures: u32) -> bool {
    connection.failure_count < max_failures
}
