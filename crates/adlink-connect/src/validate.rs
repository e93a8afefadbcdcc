//! Post-initialization tool validation.
//!
//! Listing tools only proves the transport is up; a credential can be
//! silently dead behind a healthy session. Each platform therefore gets a
//! lightweight probe call, and probe *text* is scanned for credential
//! failure wording, which is the only way to catch a revoked grant that the
//! platform still answers politely for.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::json;
use uuid::Uuid;

use adlink_models::{Platform, ValidationResult, ValidationStatus, ValidationSummary};

use crate::client::UnifiedClient;
use crate::error::ConnectError;

const MAX_DETAIL: usize = 400;

/// Expected tool names per platform; probes use the first present one.
const GA_EXPECTED: [&str; 3] = ["run_report", "get_metadata", "list_accounts"];
const GA_PROBE: &str = "get_metadata";
const ADS_EXPECTED: [&str; 2] = ["search", "list_accessible_customers"];
const ADS_PROBE: &str = "list_accessible_customers";

/// A quarantine decision derived from one validation result.
#[derive(Debug, Clone)]
pub struct ValidationRemoval {
    /// `None` means the failing server could not be attributed to a
    /// platform; the orchestrator treats that as poisoning the whole set.
    pub platform: Option<Platform>,
    pub reason: String,
    pub set_needs_reauth: bool,
}

/// Everything the validation stage produced.
pub struct ValidationReport {
    pub results: Vec<ValidationResult>,
    pub removals: Vec<ValidationRemoval>,
}

impl ValidationReport {
    /// A failure that cannot be pinned to one platform.
    pub fn has_indeterminate_failure(&self) -> bool {
        self.removals.iter().any(|r| r.platform.is_none())
    }

    pub fn removed_platforms(&self) -> Vec<Platform> {
        self.removals.iter().filter_map(|r| r.platform).collect()
    }

    pub fn summary(&self) -> ValidationSummary {
        ValidationSummary::from_results(&self.results)
    }
}

/// Validates every server behind a unified client.
pub struct ToolValidator {
    probe_timeout: Duration,
}

impl ToolValidator {
    pub fn new(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }

    pub async fn validate_all(
        &self,
        client: &UnifiedClient,
        connection_ids: &HashMap<Platform, Uuid>,
    ) -> ValidationReport {
        let servers = client.server_names();
        tracing::info!(count = servers.len(), "Validating transport servers");

        let checks = servers
            .iter()
            .map(|server| self.validate_server(client, server));
        let mut results = futures::future::join_all(checks).await;

        for result in &mut results {
            if let Some(platform) = result.platform
                && let Some(id) = connection_ids.get(&platform)
            {
                result.connection_id = Some(*id);
            }

            match result.status {
                ValidationStatus::Success => {
                    tracing::info!(server = %result.server, duration_ms = result.duration_ms, "{}", result.message);
                }
                ValidationStatus::Failed | ValidationStatus::Error => {
                    tracing::error!(
                        server = %result.server,
                        detail = result.error_detail.as_deref().unwrap_or(""),
                        "{}", result.message
                    );
                }
                ValidationStatus::Skipped => {
                    tracing::warn!(server = %result.server, "{}", result.message);
                }
            }
        }

        let removals = results
            .iter()
            .filter(|r| !matches!(r.status, ValidationStatus::Success | ValidationStatus::Skipped))
            .map(|r| ValidationRemoval {
                platform: r.platform,
                reason: format!("mcp_validation_failed: {}", r.message),
                set_needs_reauth: r
                    .error_detail
                    .as_deref()
                    .map(|d| credential_failure(d) == Some(true))
                    .unwrap_or(false),
            })
            .collect();

        let report = ValidationReport { results, removals };
        let summary = report.summary();
        tracing::info!(
            success = summary.success,
            failed = summary.failed,
            error = summary.error,
            "Validation finished"
        );
        report
    }

    async fn validate_server(&self, client: &UnifiedClient, server: &str) -> ValidationResult {
        let start = Instant::now();
        let platform = Platform::resolve(server);

        let tools = match client.list_tools_for(server).await {
            Ok(tools) => tools,
            Err(e) => {
                let mut result = ValidationResult::error(server, "Validation error")
                    .with_error_detail(truncate(&e.to_string()))
                    .with_duration_ms(elapsed_ms(start));
                if let Some(platform) = platform {
                    result = result.with_platform(platform);
                }
                return result;
            }
        };

        if tools.is_empty() {
            let mut result = ValidationResult::failed(server, "No tools available")
                .with_duration_ms(elapsed_ms(start));
            if let Some(platform) = platform {
                result = result.with_platform(platform);
            }
            return result;
        }

        let tool_names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();

        let result = match platform {
            Some(Platform::GoogleAnalytics) => {
                self.probe(client, server, &tool_names, &GA_EXPECTED, GA_PROBE)
                    .await
                    .with_platform(Platform::GoogleAnalytics)
            }
            Some(Platform::GoogleAds) => {
                self.probe(client, server, &tool_names, &ADS_EXPECTED, ADS_PROBE)
                    .await
                    .with_platform(Platform::GoogleAds)
            }
            Some(Platform::FacebookAds) => {
                // Tool presence is accepted without a live call
                ValidationResult::success(server, format!("Found {} tools", tools.len()))
                    .with_platform(Platform::FacebookAds)
            }
            None => {
                // Unattributable server: surfaced without a platform so the
                // orchestrator can apply its conservative policy.
                ValidationResult::error(server, "Server identifier matches no known platform")
            }
        };

        result.with_duration_ms(elapsed_ms(start))
    }

    /// Run the platform's probe tool and grade the response.
    async fn probe(
        &self,
        client: &UnifiedClient,
        server: &str,
        tool_names: &[&str],
        expected: &[&str],
        probe_tool: &str,
    ) -> ValidationResult {
        let found: Vec<&str> = expected
            .iter()
            .copied()
            .filter(|e| tool_names.iter().any(|t| t.contains(e)))
            .collect();

        if found.is_empty() {
            return ValidationResult::failed(server, "Missing expected tools").with_error_detail(
                format!("expected {:?}, found {:?}", expected, tool_names),
            );
        }

        let Some(probe_name) = tool_names.iter().copied().find(|t| t.contains(probe_tool)) else {
            return ValidationResult::success(
                server,
                format!("Found {} tools (not tested)", found.len()),
            );
        };

        let call = client.call_tool_on(server, probe_name, json!({}));
        match tokio::time::timeout(self.probe_timeout, call).await {
            // Slow is not broken: the tools exist, the network is just slow,
            // and quarantining here would be a false positive.
            Err(_) => ValidationResult::success(
                server,
                format!("Found {} tools (validation timed out)", found.len()),
            ),
            Ok(Ok(text)) => match credential_failure(&text) {
                Some(_) => ValidationResult::failed(server, "Credential rejected by provider")
                    .with_error_detail(truncate(&text)),
                None => {
                    ValidationResult::success(server, format!("Validated {} tools", found.len()))
                }
            },
            Ok(Err(ConnectError::Tool(message))) => {
                ValidationResult::failed(server, "Tool execution failed")
                    .with_error_detail(truncate(&message))
            }
            Ok(Err(e)) => ValidationResult::error(server, "Validation error")
                .with_error_detail(truncate(&e.to_string())),
        }
    }
}

/// Scan probe text for credential failure wording.
///
/// Returns `None` when the text looks healthy, `Some(reauth_flavored)` when
/// it reads like an auth failure; revocation-flavored wording additionally
/// flags the connection for re-authentication.
pub(crate) fn credential_failure(text: &str) -> Option<bool> {
    const KEYWORDS: [&str; 6] = [
        "invalid",
        "expired",
        "revoked",
        "credentials",
        "unauthorized",
        "permission denied",
    ];
    const REAUTH_KEYWORDS: [&str; 4] = [
        "revoked",
        "expired",
        "invalid_grant",
        "invalid credentials",
    ];

    let lowered = text.to_ascii_lowercase();
    if KEYWORDS.iter().any(|k| lowered.contains(k)) {
        Some(REAUTH_KEYWORDS.iter().any(|k| lowered.contains(k)))
    } else {
        None
    }
}

fn truncate(text: &str) -> String {
    if text.len() > MAX_DETAIL {
        format!("{}... [truncated]", &text[..MAX_DETAIL])
    } else {
        text.to_string()
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
