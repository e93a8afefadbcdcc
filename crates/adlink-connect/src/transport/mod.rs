//! Transport negotiation.
//!
//! Produces a transport handle for the working set: HTTP microservice
//! sessions when available, a subprocess client as fallback. The negotiator
//! owns the mode policy; call sites never branch on transport strings.

pub mod http;
pub mod stdio;

use std::collections::HashMap;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use adlink_models::{CredentialBundle, Platform, PlatformCredentials, WorkingSet};

use crate::config::ConnectConfig;
use crate::error::{ConnectError, Result};
use crate::transport::http::HttpSessionClient;
use crate::transport::stdio::{StdioMultiClient, StdioServerSpec};

/// One tool as announced by a transport server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Requested transport mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// HTTP microservices only.
    Http,
    /// Subprocess transport only.
    Stdio,
    /// HTTP first; fall back to subprocess on total failure.
    Auto,
}

/// The transport handle produced by negotiation.
pub enum NegotiatedTransport {
    Http(HashMap<Platform, HttpSessionClient>),
    Stdio(StdioMultiClient),
}

impl NegotiatedTransport {
    pub fn mode(&self) -> TransportMode {
        match self {
            NegotiatedTransport::Http(_) => TransportMode::Http,
            NegotiatedTransport::Stdio(_) => TransportMode::Stdio,
        }
    }
}

/// A platform quarantined during negotiation, with the reason.
#[derive(Debug, Clone)]
pub struct TransportFailure {
    pub platform: Platform,
    pub reason: String,
}

/// Result of a negotiation round.
pub struct Negotiation {
    pub transport: NegotiatedTransport,
    pub kept: WorkingSet,
    pub removals: Vec<TransportFailure>,
}

/// Opens transport sessions for the platforms still in play.
pub struct TransportNegotiator<'a> {
    config: &'a ConnectConfig,
    http: Client,
}

impl<'a> TransportNegotiator<'a> {
    pub fn new(config: &'a ConnectConfig) -> Self {
        Self {
            config,
            http: Client::new(),
        }
    }

    pub async fn connect(
        &self,
        set: &WorkingSet,
        credentials: &CredentialBundle,
        mode: TransportMode,
    ) -> Result<Negotiation> {
        if set.is_empty() {
            return Err(ConnectError::NoPlatformsLeft);
        }

        match mode {
            TransportMode::Http => self.connect_http(set, credentials).await,
            TransportMode::Stdio => self.connect_stdio(set, credentials).await,
            TransportMode::Auto => match self.connect_http(set, credentials).await {
                Ok(negotiation) => Ok(negotiation),
                Err(e) => {
                    tracing::warn!(error = %e, "HTTP negotiation failed entirely, falling back to subprocess transport");
                    self.connect_stdio(set, credentials).await
                }
            },
        }
    }

    /// Per-platform HTTP initialize; failures quarantine the platform and
    /// only a full wipe-out fails the negotiation.
    async fn connect_http(
        &self,
        set: &WorkingSet,
        credentials: &CredentialBundle,
    ) -> Result<Negotiation> {
        let attempts = set.iter().map(|platform| {
            let http = self.http.clone();
            async move {
                let Some(base_url) = self.config.http_endpoints.get(&platform) else {
                    return (
                        platform,
                        Err(ConnectError::Config(format!(
                            "no HTTP endpoint configured for {platform}"
                        ))),
                    );
                };
                let Some(platform_credentials) = credentials.get(platform) else {
                    return (
                        platform,
                        Err(ConnectError::Config(format!(
                            "missing credentials for {platform}"
                        ))),
                    );
                };
                let result = HttpSessionClient::initialize(
                    http,
                    platform,
                    base_url,
                    platform_credentials,
                    self.config.init_timeout,
                )
                .await;
                (platform, result)
            }
        });

        let outcomes = futures::future::join_all(attempts).await;

        let mut clients = HashMap::new();
        let mut removals = Vec::new();
        for (platform, result) in outcomes {
            match result {
                Ok(client) => {
                    tracing::debug!(%platform, session = client.session_id(), "HTTP session opened");
                    clients.insert(platform, client);
                }
                Err(e) => {
                    tracing::warn!(%platform, error = %e, "HTTP initialize failed");
                    removals.push(TransportFailure {
                        platform,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if clients.is_empty() {
            return Err(ConnectError::Transport(format!(
                "HTTP initialize failed for every platform in {set}"
            )));
        }

        let removed: Vec<Platform> = removals.iter().map(|f| f.platform).collect();
        Ok(Negotiation {
            transport: NegotiatedTransport::Http(clients),
            kept: set.without(&removed),
            removals,
        })
    }

    /// Subprocess transport is all-or-nothing: there is no per-platform
    /// granularity once the multi-client is handed the spec list.
    async fn connect_stdio(
        &self,
        set: &WorkingSet,
        credentials: &CredentialBundle,
    ) -> Result<Negotiation> {
        let mut specs = Vec::new();
        for platform in set.iter() {
            let Some(spec) = self.config.stdio_servers.get(&platform) else {
                return Err(ConnectError::Config(format!(
                    "no subprocess server configured for {platform}"
                )));
            };
            let Some(platform_credentials) = credentials.get(platform) else {
                return Err(ConnectError::Config(format!(
                    "missing credentials for {platform}"
                )));
            };
            specs.push(with_credential_env(spec.clone(), platform_credentials));
        }

        let multi = StdioMultiClient::connect(&specs).await?;
        Ok(Negotiation {
            transport: NegotiatedTransport::Stdio(multi),
            kept: set.clone(),
            removals: Vec::new(),
        })
    }
}

/// Inject a platform's secrets into its subprocess environment, using the
/// variable names the server implementations read.
fn with_credential_env(
    mut spec: StdioServerSpec,
    credentials: &PlatformCredentials,
) -> StdioServerSpec {
    match credentials {
        PlatformCredentials::GoogleAnalytics {
            refresh_token,
            property_id,
            client_id,
            client_secret,
            ..
        } => {
            spec.env
                .insert("GOOGLE_ANALYTICS_REFRESH_TOKEN".into(), refresh_token.clone());
            spec.env
                .insert("GOOGLE_ANALYTICS_PROPERTY_ID".into(), property_id.clone());
            spec.env
                .insert("GOOGLE_ANALYTICS_CLIENT_ID".into(), client_id.clone());
            spec.env
                .insert("GOOGLE_ANALYTICS_CLIENT_SECRET".into(), client_secret.clone());
        }
        PlatformCredentials::GoogleAds {
            refresh_token,
            customer_id,
            developer_token,
            client_id,
            client_secret,
            ..
        } => {
            spec.env
                .insert("GOOGLE_ADS_REFRESH_TOKEN".into(), refresh_token.clone());
            spec.env
                .insert("GOOGLE_ADS_CUSTOMER_ID".into(), customer_id.clone());
            spec.env
                .insert("GOOGLE_ADS_DEVELOPER_TOKEN".into(), developer_token.clone());
            spec.env
                .insert("GOOGLE_ADS_CLIENT_ID".into(), client_id.clone());
            spec.env
                .insert("GOOGLE_ADS_CLIENT_SECRET".into(), client_secret.clone());
        }
        PlatformCredentials::FacebookAds {
            access_token,
            account_id,
        } => {
            spec.env
                .insert("FACEBOOK_ACCESS_TOKEN".into(), access_token.clone());
            spec.env
                .insert("FACEBOOK_AD_ACCOUNT_ID".into(), account_id.clone());
        }
    }
    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bundle() -> CredentialBundle {
        let mut bundle = CredentialBundle::new();
        bundle.insert(PlatformCredentials::GoogleAnalytics {
            refresh_token: "1//r".to_string(),
            access_token: None,
            property_id: "properties/1".to_string(),
            client_id: "cid".to_string(),
            client_secret: "cs".to_string(),
        });
        bundle.insert(PlatformCredentials::FacebookAds {
            access_token: "EAAB".to_string(),
            account_id: "act_1".to_string(),
        });
        bundle
    }

    async fn mock_initialize(server: &MockServer, session_id: &str) {
        Mock::given(method("POST"))
            .and(path("/initialize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "session_id": session_id
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_http_partial_success_quarantines_failures() {
        let ga_server = MockServer::start().await;
        mock_initialize(&ga_server, "ga-sess").await;

        // Facebook endpoint refuses the session
        let fb_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/initialize"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&fb_server)
            .await;

        let config = ConnectConfig::default()
            .with_endpoint(Platform::GoogleAnalytics, ga_server.uri())
            .with_endpoint(Platform::FacebookAds, fb_server.uri());

        let set = WorkingSet::new([Platform::GoogleAnalytics, Platform::FacebookAds]);
        let negotiation = TransportNegotiator::new(&config)
            .connect(&set, &bundle(), TransportMode::Http)
            .await
            .unwrap();

        assert_eq!(negotiation.kept.as_slice(), &[Platform::GoogleAnalytics]);
        assert_eq!(negotiation.removals.len(), 1);
        assert_eq!(negotiation.removals[0].platform, Platform::FacebookAds);
        assert!(matches!(
            negotiation.transport,
            NegotiatedTransport::Http(_)
        ));
    }

    #[tokio::test]
    async fn test_http_total_failure_errors() {
        let config = ConnectConfig::default()
            .with_endpoint(Platform::GoogleAnalytics, "http://127.0.0.1:1")
            .with_endpoint(Platform::FacebookAds, "http://127.0.0.1:1");

        let set = WorkingSet::new([Platform::GoogleAnalytics, Platform::FacebookAds]);
        let result = TransportNegotiator::new(&config)
            .connect(&set, &bundle(), TransportMode::Http)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_http_missing_credentials_is_platform_scoped() {
        let ga_server = MockServer::start().await;
        mock_initialize(&ga_server, "ga-sess").await;

        let config = ConnectConfig::default()
            .with_endpoint(Platform::GoogleAnalytics, ga_server.uri())
            .with_endpoint(Platform::GoogleAds, ga_server.uri());

        // Bundle has no Google Ads entry
        let set = WorkingSet::new([Platform::GoogleAnalytics, Platform::GoogleAds]);
        let negotiation = TransportNegotiator::new(&config)
            .connect(&set, &bundle(), TransportMode::Http)
            .await
            .unwrap();

        assert_eq!(negotiation.kept.as_slice(), &[Platform::GoogleAnalytics]);
        assert!(negotiation.removals[0].reason.contains("missing credentials"));
    }

    #[tokio::test]
    async fn test_auto_falls_back_to_stdio_on_total_http_failure() {
        let script = r#"
import sys, json
for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    try:
        msg = json.loads(line)
    except Exception:
        continue
    if msg.get("method") == "initialize":
        sys.stdout.write(json.dumps({"jsonrpc": "2.0", "id": msg.get("id"), "result": {
            "protocolVersion": "2024-11-05", "capabilities": {},
            "serverInfo": {"name": "ga", "version": "0"}}}) + "\n")
        sys.stdout.flush()
"#;
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("stub.py");
        std::fs::write(&script_path, script).unwrap();

        let config = ConnectConfig::default()
            .with_endpoint(Platform::GoogleAnalytics, "http://127.0.0.1:1")
            .with_stdio_server(
                Platform::GoogleAnalytics,
                StdioServerSpec::new("google_analytics_stdio", "python3")
                    .arg(script_path.to_string_lossy().to_string()),
            );

        let set = WorkingSet::new([Platform::GoogleAnalytics]);
        let negotiation = TransportNegotiator::new(&config)
            .connect(&set, &bundle(), TransportMode::Auto)
            .await
            .unwrap();

        assert_eq!(negotiation.transport.mode(), TransportMode::Stdio);
        // No platform was removed by the failed HTTP attempt itself
        assert_eq!(negotiation.kept.as_slice(), set.as_slice());
        assert!(negotiation.removals.is_empty());

        if let NegotiatedTransport::Stdio(multi) = negotiation.transport {
            multi.shutdown_all().await;
        }
    }

    #[tokio::test]
    async fn test_auto_accepts_partial_http_without_fallback() {
        let ga_server = MockServer::start().await;
        mock_initialize(&ga_server, "ga-sess").await;

        let config = ConnectConfig::default()
            .with_endpoint(Platform::GoogleAnalytics, ga_server.uri())
            .with_endpoint(Platform::FacebookAds, "http://127.0.0.1:1");

        let set = WorkingSet::new([Platform::GoogleAnalytics, Platform::FacebookAds]);
        let negotiation = TransportNegotiator::new(&config)
            .connect(&set, &bundle(), TransportMode::Auto)
            .await
            .unwrap();

        // Partial HTTP success is accepted as-is
        assert_eq!(negotiation.transport.mode(), TransportMode::Http);
        assert_eq!(negotiation.kept.len(), 1);
    }

    #[tokio::test]
    async fn test_stdio_without_spec_fails_whole_negotiation() {
        let config = ConnectConfig::default();
        let set = WorkingSet::new([Platform::GoogleAnalytics]);
        let result = TransportNegotiator::new(&config)
            .connect(&set, &bundle(), TransportMode::Stdio)
            .await;
        assert!(matches!(result, Err(ConnectError::Config(_))));
    }

    #[test]
    fn test_credential_env_injection() {
        let spec = StdioServerSpec::new("google_ads_stdio", "python3");
        let creds = PlatformCredentials::GoogleAds {
            refresh_token: "1//r".to_string(),
            access_token: None,
            customer_id: "123".to_string(),
            developer_token: "dev".to_string(),
            client_id: "cid".to_string(),
            client_secret: "cs".to_string(),
        };
        let spec = with_credential_env(spec, &creds);
        assert_eq!(spec.env.get("GOOGLE_ADS_REFRESH_TOKEN").map(String::as_str), Some("1//r"));
        assert_eq!(spec.env.get("GOOGLE_ADS_DEVELOPER_TOKEN").map(String::as_str), Some("dev"));
        assert_eq!(spec.env.get("GOOGLE_ADS_CUSTOMER_ID").map(String::as_str), Some("123"));
    }
}
