//! Connection lifecycle orchestration.
//!
//! Drives refresh → transport init → validation → telemetry write-back over
//! one run's working set. No single platform failure aborts the run; every
//! stage translates its failures into platform removals, and only an empty
//! working set fails the run as a whole.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use adlink_models::{
    CredentialBundle, Platform, ValidationResult, ValidationStatus, ValidationSummary, WorkingSet,
};
use adlink_storage::{ConnectionStore, TokenCipher};

use crate::client::UnifiedClient;
use crate::config::ConnectConfig;
use crate::health::ConnectionHealth;
use crate::notify::{AlertSink, Notifier};
use crate::oauth::TokenRefresher;
use crate::transport::{TransportMode, TransportNegotiator};
use crate::validate::ToolValidator;

/// What a run hands back to the agent layer: the surviving client (absent
/// when the run failed) and the full per-platform result list, including
/// entries for platforms removed at earlier stages so callers can see *why*
/// each one is missing.
pub struct ConnectOutcome {
    pub client: Option<UnifiedClient>,
    pub results: Vec<ValidationResult>,
}

impl ConnectOutcome {
    pub fn ok(&self) -> bool {
        self.client.is_some()
    }

    pub fn summary(&self) -> ValidationSummary {
        ValidationSummary::from_results(&self.results)
    }

    fn failed(results: Vec<ValidationResult>) -> Self {
        Self {
            client: None,
            results,
        }
    }
}

/// Root component owning one tenant-session's connection lifecycle.
///
/// All collaborators are injected at construction; the orchestrator holds no
/// process-global state and two orchestrators never share a working set.
pub struct ConnectionOrchestrator {
    config: ConnectConfig,
    store: Arc<dyn ConnectionStore>,
    health: ConnectionHealth,
    refresher: TokenRefresher,
    notifier: Notifier,
}

impl ConnectionOrchestrator {
    pub fn new(
        config: ConnectConfig,
        store: Arc<dyn ConnectionStore>,
        cipher: Arc<TokenCipher>,
        alert_sink: Arc<dyn AlertSink>,
    ) -> Self {
        let health = ConnectionHealth::new(store.clone());
        let notifier = Notifier::new(alert_sink, config.alert_timeout);
        let refresher = TokenRefresher::new(
            config.oauth.clone(),
            config.refresh_timeout,
            store.clone(),
            health.clone(),
            cipher,
            notifier.clone(),
        );
        Self {
            config,
            store,
            health,
            refresher,
            notifier,
        }
    }

    /// Run the full pipeline for one campaigner session.
    ///
    /// `platforms` and `credentials` are consumed: entries are removed as
    /// platforms are quarantined and refreshed tokens are substituted in
    /// place, so callers must not reuse the bundle afterwards.
    pub async fn initialize(
        &self,
        campaigner_id: i64,
        platforms: &[String],
        mut credentials: CredentialBundle,
        mode: TransportMode,
    ) -> ConnectOutcome {
        let (initial_set, unknown) = WorkingSet::from_names(platforms);
        let mut results: Vec<ValidationResult> = unknown
            .iter()
            .map(|name| ValidationResult::skipped(name.clone(), "Unknown platform"))
            .collect();

        if initial_set.is_empty() {
            tracing::error!(campaigner_id, "No known platforms requested");
            return ConnectOutcome::failed(results);
        }
        tracing::info!(campaigner_id, set = %initial_set, "Starting connection lifecycle");

        let connection_ids = self.resolve_connection_ids(&initial_set, campaigner_id).await;

        // Stage 1: token refresh
        let mut set = initial_set.clone();
        if self.config.enable_token_refresh {
            let size_before = set.len();
            let outcome = self
                .refresher
                .refresh(campaigner_id, &set, &mut credentials, false)
                .await;

            for removal in &outcome.removals {
                let mut result =
                    ValidationResult::failed(removal.platform.as_str(), "Token refresh failed")
                        .with_platform(removal.platform)
                        .with_error_detail(removal.reason.clone());
                if let Some(id) = removal.connection_id {
                    result = result.with_connection_id(id);
                }
                results.push(result);
            }

            set = outcome.kept;
            if set.len() < size_before {
                tracing::warn!(
                    removed = size_before - set.len(),
                    remaining = %set,
                    "Refresh stage shrank the working set"
                );
            }
            if set.is_empty() {
                tracing::error!(campaigner_id, "No platforms survived token refresh");
                return ConnectOutcome::failed(results);
            }
        } else {
            tracing::info!("Token refresh disabled");
        }

        // Stage 2: transport negotiation
        let negotiator = TransportNegotiator::new(&self.config);
        let negotiation = match negotiator.connect(&set, &credentials, mode).await {
            Ok(negotiation) => negotiation,
            Err(e) => {
                tracing::error!(error = %e, "Transport negotiation failed");
                for platform in set.iter() {
                    results.push(self.init_failure_result(platform, &e.to_string(), &connection_ids));
                }
                self.record_init_failures(&set, &e.to_string(), &connection_ids).await;
                return ConnectOutcome::failed(results);
            }
        };
        for failure in &negotiation.removals {
            if let Some(id) = connection_ids.get(&failure.platform) {
                self.health
                    .record_failure(*id, &format!("mcp_init_failed: {}", failure.reason), false)
                    .await;
            }
            results.push(self.init_failure_result(
                failure.platform,
                &failure.reason,
                &connection_ids,
            ));
            credentials.remove(failure.platform);
        }
        set = negotiation.kept;
        let mut client = UnifiedClient::new(negotiation.transport);

        // Stage 3: validation (with one re-negotiation if the set shrank)
        if self.config.enable_validation {
            let validator = ToolValidator::new(self.config.probe_timeout);
            let report = validator.validate_all(&client, &connection_ids).await;

            for removal in &report.removals {
                let Some(platform) = removal.platform else {
                    continue;
                };
                if let Some(id) = connection_ids.get(&platform) {
                    self.health
                        .record_failure(*id, &removal.reason, removal.set_needs_reauth)
                        .await;
                }
                if removal.set_needs_reauth {
                    self.notifier
                        .notify_reauth_required(campaigner_id, platform, &removal.reason);
                }
            }

            let indeterminate = report.has_indeterminate_failure();
            let removed = report.removed_platforms();
            results.extend(report.results);

            if indeterminate {
                // Over-broad by design: when a failure cannot be attributed
                // to one platform, quarantining only a guess would leave a
                // possibly-poisoned client in play. The whole set goes.
                tracing::error!("Validation failure on an unattributable server, quarantining the whole set");
                client.close().await;
                return ConnectOutcome::failed(results);
            }

            if !removed.is_empty() {
                let shrunk = set.without(&removed);
                if shrunk.is_empty() {
                    tracing::error!(campaigner_id, "No platforms survived validation");
                    client.close().await;
                    return ConnectOutcome::failed(results);
                }

                // A platform that failed validation must not ride along in
                // the final client just because its session opened; discard
                // the clients and re-initialize with the survivors.
                tracing::info!(remaining = %shrunk, "Re-initializing transport after validation shrink");
                for platform in &removed {
                    credentials.remove(*platform);
                }
                client.close().await;

                match negotiator.connect(&shrunk, &credentials, mode).await {
                    Ok(second) => {
                        for failure in &second.removals {
                            if let Some(id) = connection_ids.get(&failure.platform) {
                                self.health
                                    .record_failure(
                                        *id,
                                        &format!("mcp_init_failed: {}", failure.reason),
                                        false,
                                    )
                                    .await;
                            }
                            results.push(self.init_failure_result(
                                failure.platform,
                                &failure.reason,
                                &connection_ids,
                            ));
                        }
                        set = second.kept;
                        client = UnifiedClient::new(second.transport);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Re-initialization after validation shrink failed");
                        self.record_init_failures(&shrunk, &e.to_string(), &connection_ids).await;
                        return ConnectOutcome::failed(results);
                    }
                }
            }
        } else {
            tracing::info!("Validation disabled");
        }

        debug_assert!(set.is_subset_of(&initial_set));

        // Stage 4: validation timestamp write-back for the survivors
        for result in &results {
            if result.status == ValidationStatus::Success
                && let Some(id) = result.connection_id
            {
                self.health.record_success(id, false).await;
            }
        }

        tracing::info!(campaigner_id, set = %set, "Connection lifecycle complete");
        ConnectOutcome {
            client: Some(client),
            results,
        }
    }

    async fn resolve_connection_ids(
        &self,
        set: &WorkingSet,
        campaigner_id: i64,
    ) -> HashMap<Platform, Uuid> {
        let mut ids = HashMap::new();
        for platform in set.iter() {
            match self.store.get_by_platform(platform, campaigner_id).await {
                Ok(Some(connection)) => {
                    ids.insert(platform, connection.id);
                }
                Ok(None) => {
                    tracing::debug!(%platform, campaigner_id, "No connection row for platform");
                }
                Err(e) => {
                    tracing::error!(%platform, error = %e, "Connection lookup failed");
                }
            }
        }
        ids
    }

    fn init_failure_result(
        &self,
        platform: Platform,
        reason: &str,
        connection_ids: &HashMap<Platform, Uuid>,
    ) -> ValidationResult {
        let mut result =
            ValidationResult::error(platform.as_str(), "Transport initialization failed")
                .with_platform(platform)
                .with_error_detail(reason.to_string());
        if let Some(id) = connection_ids.get(&platform) {
            result = result.with_connection_id(*id);
        }
        result
    }

    async fn record_init_failures(
        &self,
        set: &WorkingSet,
        reason: &str,
        connection_ids: &HashMap<Platform, Uuid>,
    ) {
        for platform in set.iter() {
            if let Some(id) = connection_ids.get(&platform) {
                self.health
                    .record_failure(*id, &format!("mcp_init_failed: {reason}"), false)
                    .await;
            }
        }
    }
}
