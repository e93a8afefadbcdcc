//! OAuth token refresh.
//!
//! Exercises stored refresh grants against the provider endpoints before the
//! transport layer touches the platforms. Google Analytics and Google Ads
//! both go through the Google endpoint but are refreshed and tracked as
//! independent platform entries; Facebook uses its token-exchange flow.
//!
//! Provider calls for the platforms in the working set run concurrently;
//! store writes and set shrinking are applied afterwards as one batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use uuid::Uuid;

use adlink_models::{
    is_token_expired, Connection, CredentialBundle, Platform, PlatformCredentials, WorkingSet,
};
use adlink_storage::{ConnectionStore, TokenCipher};

use crate::config::OAuthAppConfig;
use crate::error::RefreshFailureKind;
use crate::health::ConnectionHealth;
use crate::notify::Notifier;

/// A freshly issued access token.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Why a platform left the working set during the refresh stage.
#[derive(Debug, Clone)]
pub struct RefreshRemoval {
    pub platform: Platform,
    pub reason: String,
    pub connection_id: Option<Uuid>,
    pub needs_reauth: bool,
}

/// Outcome of the refresh stage.
pub struct RefreshOutcome {
    pub kept: WorkingSet,
    pub removals: Vec<RefreshRemoval>,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize, Default)]
struct GoogleTokenError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

#[derive(Debug, Deserialize)]
struct FacebookTokenResponse {
    access_token: String,
    #[serde(default = "default_fb_expires_in")]
    expires_in: i64,
}

fn default_fb_expires_in() -> i64 {
    // Long-lived exchange tokens default to 60 days
    60 * 24 * 3600
}

#[derive(Debug, Deserialize, Default)]
struct FacebookTokenErrorBody {
    #[serde(default)]
    error: FacebookTokenError,
}

#[derive(Debug, Deserialize, Default)]
struct FacebookTokenError {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}

/// Provider error carrying its classification.
#[derive(Debug)]
struct RefreshCallError {
    kind: RefreshFailureKind,
    detail: String,
}

enum Decision {
    /// Stored token still valid (or no stored row to compare against).
    Keep,
    /// Provider issued a new token; apply to store and bundle.
    Refreshed {
        connection: Connection,
        token: RefreshedToken,
    },
    /// Quarantine the platform for this run.
    Remove(RefreshRemoval),
}

/// Refreshes expiring grants for the platforms in the working set.
pub struct TokenRefresher {
    http: Client,
    oauth: Option<OAuthAppConfig>,
    timeout: Duration,
    store: Arc<dyn ConnectionStore>,
    health: ConnectionHealth,
    cipher: Arc<TokenCipher>,
    notifier: Notifier,
}

impl TokenRefresher {
    pub fn new(
        oauth: Option<OAuthAppConfig>,
        timeout: Duration,
        store: Arc<dyn ConnectionStore>,
        health: ConnectionHealth,
        cipher: Arc<TokenCipher>,
        notifier: Notifier,
    ) -> Self {
        Self {
            http: Client::new(),
            oauth,
            timeout,
            store,
            health,
            cipher,
            notifier,
        }
    }

    /// Refresh every platform in the set that needs it, shrinking the set on
    /// failure. `force` refreshes regardless of recorded expiry.
    pub async fn refresh(
        &self,
        campaigner_id: i64,
        set: &WorkingSet,
        bundle: &mut CredentialBundle,
        force: bool,
    ) -> RefreshOutcome {
        // Without OAuth app credentials nothing can be refreshed; proceeding
        // on possibly-dead tokens would only defer the failure to a noisier
        // place, so the whole remaining set is quarantined.
        let Some(oauth) = &self.oauth else {
            tracing::warn!("OAuth app credentials not configured, quarantining all platforms");
            let mut removals = Vec::new();
            for platform in set.iter() {
                let connection_id = self.connection_id_for(platform, campaigner_id).await;
                if let Some(id) = connection_id {
                    self.health
                        .record_failure(id, "token_refresh_failed: oauth app not configured", false)
                        .await;
                }
                removals.push(RefreshRemoval {
                    platform,
                    reason: "oauth app credentials not configured".to_string(),
                    connection_id,
                    needs_reauth: false,
                });
            }
            for removal in &removals {
                bundle.remove(removal.platform);
            }
            return RefreshOutcome {
                kept: set.without(&set.iter().collect::<Vec<_>>()),
                removals,
            };
        };

        let checks = set.iter().map(|platform| {
            let credentials = bundle.get(platform).cloned();
            async move {
                (
                    platform,
                    self.check_platform(oauth, campaigner_id, platform, credentials, force)
                        .await,
                )
            }
        });
        let decisions = futures::future::join_all(checks).await;

        // Apply decisions as one batch: store writes, bundle substitution,
        // then the shrunk set.
        let mut removals = Vec::new();
        for (platform, decision) in decisions {
            match decision {
                Decision::Keep => {}
                Decision::Refreshed { connection, token } => {
                    self.apply_refresh(platform, connection, &token, bundle).await;
                }
                Decision::Remove(removal) => {
                    if let Some(id) = removal.connection_id {
                        self.health
                            .record_failure(id, &removal.reason, removal.needs_reauth)
                            .await;
                    }
                    if removal.needs_reauth {
                        self.notifier.notify_reauth_required(
                            campaigner_id,
                            platform,
                            &removal.reason,
                        );
                    }
                    bundle.remove(platform);
                    removals.push(removal);
                }
            }
        }

        let removed: Vec<Platform> = removals.iter().map(|r| r.platform).collect();
        RefreshOutcome {
            kept: set.without(&removed),
            removals,
        }
    }

    async fn connection_id_for(&self, platform: Platform, campaigner_id: i64) -> Option<Uuid> {
        match self.store.get_by_platform(platform, campaigner_id).await {
            Ok(connection) => connection.map(|c| c.id),
            Err(e) => {
                tracing::error!(%platform, error = %e, "Credential store lookup failed");
                None
            }
        }
    }

    async fn check_platform(
        &self,
        oauth: &OAuthAppConfig,
        campaigner_id: i64,
        platform: Platform,
        credentials: Option<PlatformCredentials>,
        force: bool,
    ) -> Decision {
        let connection = match self.store.get_by_platform(platform, campaigner_id).await {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                // No stored row to compare against; the bundle's raw token
                // gets its trial during validation instead.
                tracing::debug!(%platform, "No connection row, skipping refresh");
                return Decision::Keep;
            }
            Err(e) => {
                return Decision::Remove(RefreshRemoval {
                    platform,
                    reason: format!("credential store error: {e}"),
                    connection_id: None,
                    needs_reauth: false,
                });
            }
        };

        if connection.needs_reauth {
            // Silent refresh is forbidden until a human re-links.
            return Decision::Remove(RefreshRemoval {
                platform,
                reason: "re-authentication required".to_string(),
                connection_id: Some(connection.id),
                needs_reauth: false,
            });
        }

        if !force && !is_token_expired(connection.expires_at) {
            tracing::debug!(%platform, "Stored token still valid");
            return Decision::Keep;
        }

        let Some(credentials) = credentials else {
            return Decision::Remove(RefreshRemoval {
                platform,
                reason: "missing credentials for refresh".to_string(),
                connection_id: Some(connection.id),
                needs_reauth: false,
            });
        };

        tracing::info!(%platform, "Token expired, refreshing");
        let result = match platform.oauth_provider() {
            "google" => self.refresh_google(oauth, credentials.refresh_secret()).await,
            _ => self.refresh_facebook(oauth, credentials.refresh_secret()).await,
        };

        match result {
            Ok(token) => Decision::Refreshed { connection, token },
            Err(call_error) => Decision::Remove(RefreshRemoval {
                platform,
                reason: format!("token_refresh_failed: {}", call_error.detail),
                connection_id: Some(connection.id),
                needs_reauth: call_error.kind.needs_reauth(),
            }),
        }
    }

    async fn apply_refresh(
        &self,
        platform: Platform,
        mut connection: Connection,
        token: &RefreshedToken,
        bundle: &mut CredentialBundle,
    ) {
        match self.cipher.seal_str(&token.access_token) {
            Ok(blob) => connection.access_token_enc = Some(blob),
            Err(e) => {
                tracing::error!(%platform, error = %e, "Failed to seal refreshed token");
            }
        }
        connection.expires_at = Some(token.expires_at);
        connection.updated_at = Utc::now();

        if let Err(e) = self.store.save(&connection).await {
            tracing::error!(%platform, error = %e, "Failed to persist refreshed token");
        }
        self.health.record_success(connection.id, true).await;

        if let Some(credentials) = bundle.get_mut(platform) {
            credentials.apply_refreshed(&token.access_token);
        }
        tracing::info!(%platform, expires_at = %token.expires_at, "Token refreshed");
    }

    async fn refresh_google(
        &self,
        oauth: &OAuthAppConfig,
        refresh_token: &str,
    ) -> Result<RefreshedToken, RefreshCallError> {
        let response = self
            .http
            .post(&oauth.google_token_url)
            .timeout(self.timeout)
            .form(&[
                ("client_id", oauth.google_client_id.as_str()),
                ("client_secret", oauth.google_client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error: GoogleTokenError = response.json().await.unwrap_or_default();
            let code = if error.error.is_empty() {
                format!("http_{}", status.as_u16())
            } else {
                error.error
            };
            return Err(RefreshCallError {
                kind: RefreshFailureKind::classify(&code),
                detail: format!("{code}: {}", error.error_description),
            });
        }

        let token: GoogleTokenResponse = response.json().await.map_err(network_error)?;
        Ok(RefreshedToken {
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
            access_token: token.access_token,
        })
    }

    async fn refresh_facebook(
        &self,
        oauth: &OAuthAppConfig,
        access_token: &str,
    ) -> Result<RefreshedToken, RefreshCallError> {
        let response = self
            .http
            .get(&oauth.facebook_token_url)
            .timeout(self.timeout)
            .query(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", oauth.facebook_app_id.as_str()),
                ("client_secret", oauth.facebook_app_secret.as_str()),
                ("fb_exchange_token", access_token),
            ])
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body: FacebookTokenErrorBody = response.json().await.unwrap_or_default();
            let error = body.error;
            let kind = classify_facebook(&error.kind, &error.message);
            let detail = if error.kind.is_empty() && error.message.is_empty() {
                format!("http_{}", status.as_u16())
            } else {
                format!("{}: {}", error.kind, error.message)
            };
            return Err(RefreshCallError { kind, detail });
        }

        let token: FacebookTokenResponse = response.json().await.map_err(network_error)?;
        Ok(RefreshedToken {
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
            access_token: token.access_token,
        })
    }
}

fn network_error(e: reqwest::Error) -> RefreshCallError {
    let kind = if e.is_timeout() || e.is_connect() {
        RefreshFailureKind::Network
    } else {
        RefreshFailureKind::Provider
    };
    RefreshCallError {
        kind,
        detail: e.to_string(),
    }
}

/// Facebook reports grant death through an OAuthException with a free-text
/// message rather than a stable error code.
fn classify_facebook(kind: &str, message: &str) -> RefreshFailureKind {
    let combined = format!("{kind} {message}").to_ascii_lowercase();
    if combined.contains("oauth")
        || combined.contains("invalid")
        || combined.contains("expired")
        || combined.contains("revoked")
    {
        RefreshFailureKind::InvalidGrant
    } else {
        RefreshFailureKind::Provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adlink_models::{AssetType, DigitalAsset};
    use adlink_storage::MemoryConnectionStore;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cipher() -> Arc<TokenCipher> {
        Arc::new(TokenCipher::new(&[0x42; 32]).unwrap())
    }

    fn oauth_for(server: &MockServer) -> OAuthAppConfig {
        let mut oauth = OAuthAppConfig::new("gid", "gsecret", "fbid", "fbsecret");
        oauth.google_token_url = format!("{}/token", server.uri());
        oauth.facebook_token_url = format!("{}/oauth/access_token", server.uri());
        oauth
    }

    fn refresher(
        oauth: Option<OAuthAppConfig>,
        store: Arc<dyn ConnectionStore>,
    ) -> TokenRefresher {
        TokenRefresher::new(
            oauth,
            Duration::from_secs(2),
            store.clone(),
            ConnectionHealth::new(store),
            cipher(),
            Notifier::disabled(),
        )
    }

    fn seed_connection(
        store: &MemoryConnectionStore,
        platform: Platform,
        campaigner_id: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Uuid {
        let asset = DigitalAsset::new(platform.asset_type(), "ext-1", "Asset", "Provider");
        let mut connection = Connection::new(asset.id, campaigner_id);
        connection.expires_at = expires_at;
        let id = connection.id;
        store.seed(asset, connection);
        id
    }

    fn ga_bundle() -> CredentialBundle {
        let mut bundle = CredentialBundle::new();
        bundle.insert(PlatformCredentials::GoogleAnalytics {
            refresh_token: "1//refresh".to_string(),
            access_token: None,
            property_id: "properties/1".to_string(),
            client_id: "cid".to_string(),
            client_secret: "cs".to_string(),
        });
        bundle
    }

    #[tokio::test]
    async fn test_valid_token_skips_provider_call() {
        let server = MockServer::start().await;
        // No mock mounted: any request would 404 and fail the test below
        let store = MemoryConnectionStore::new();
        seed_connection(
            &store,
            Platform::GoogleAnalytics,
            1,
            Some(Utc::now() + chrono::Duration::hours(1)),
        );

        let refresher = refresher(Some(oauth_for(&server)), Arc::new(store));
        let set = WorkingSet::new([Platform::GoogleAnalytics]);
        let mut bundle = ga_bundle();

        let outcome = refresher.refresh(1, &set, &mut bundle, false).await;
        assert_eq!(outcome.kept.len(), 1);
        assert!(outcome.removals.is_empty());
        assert!(bundle.contains(Platform::GoogleAnalytics));
    }

    #[tokio::test]
    async fn test_google_refresh_success_updates_store_and_bundle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.fresh",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let store = MemoryConnectionStore::new();
        let connection_id = seed_connection(&store, Platform::GoogleAnalytics, 1, None);
        let store = Arc::new(store);

        let refresher = refresher(Some(oauth_for(&server)), store.clone());
        let set = WorkingSet::new([Platform::GoogleAnalytics]);
        let mut bundle = ga_bundle();

        let outcome = refresher.refresh(1, &set, &mut bundle, false).await;
        assert_eq!(outcome.kept.len(), 1);

        let connection = store.get(connection_id).await.unwrap().unwrap();
        assert!(connection.expires_at.unwrap() > Utc::now());
        assert!(connection.access_token_enc.is_some());
        assert_eq!(connection.failure_count, 0);
        assert!(!connection.needs_reauth);

        match bundle.get(Platform::GoogleAnalytics).unwrap() {
            PlatformCredentials::GoogleAnalytics { access_token, .. } => {
                assert_eq!(access_token.as_deref(), Some("ya29.fresh"));
            }
            _ => panic!("expected GA credentials"),
        }
    }

    #[tokio::test]
    async fn test_invalid_grant_quarantines_and_flags_reauth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let store = MemoryConnectionStore::new();
        let connection_id = seed_connection(&store, Platform::GoogleAnalytics, 1, None);
        let store = Arc::new(store);

        let refresher = refresher(Some(oauth_for(&server)), store.clone());
        let set = WorkingSet::new([Platform::GoogleAnalytics]);
        let mut bundle = ga_bundle();

        let outcome = refresher.refresh(1, &set, &mut bundle, false).await;
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.removals.len(), 1);
        assert!(outcome.removals[0].needs_reauth);
        assert!(!bundle.contains(Platform::GoogleAnalytics));

        let connection = store.get(connection_id).await.unwrap().unwrap();
        assert!(connection.needs_reauth);
        assert!(connection
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("token_refresh_failed"));
        assert_eq!(connection.failure_count, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_does_not_flag_reauth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
                "error": "internal_failure",
                "error_description": "try again later"
            })))
            .mount(&server)
            .await;

        let store = MemoryConnectionStore::new();
        let connection_id = seed_connection(&store, Platform::GoogleAnalytics, 1, None);
        let store = Arc::new(store);

        let refresher = refresher(Some(oauth_for(&server)), store.clone());
        let set = WorkingSet::new([Platform::GoogleAnalytics]);
        let mut bundle = ga_bundle();

        let outcome = refresher.refresh(1, &set, &mut bundle, false).await;
        assert!(outcome.kept.is_empty());
        assert!(!outcome.removals[0].needs_reauth);

        let connection = store.get(connection_id).await.unwrap().unwrap();
        assert!(!connection.needs_reauth);
        assert_eq!(connection.failure_count, 1);
    }

    #[tokio::test]
    async fn test_needs_reauth_row_blocks_silent_refresh() {
        let server = MockServer::start().await;
        let store = MemoryConnectionStore::new();
        let asset =
            DigitalAsset::new(AssetType::Ga4Property, "ext-1", "Asset", "Google");
        let mut connection = Connection::new(asset.id, 1);
        connection.needs_reauth = true;
        connection.failure_count = 2;
        let connection_id = connection.id;
        store.seed(asset, connection);
        let store = Arc::new(store);

        let refresher = refresher(Some(oauth_for(&server)), store.clone());
        let set = WorkingSet::new([Platform::GoogleAnalytics]);
        let mut bundle = ga_bundle();

        let outcome = refresher.refresh(1, &set, &mut bundle, false).await;
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.removals[0].reason, "re-authentication required");

        // No extra failure recorded for the blocked attempt
        let connection = store.get(connection_id).await.unwrap().unwrap();
        assert_eq!(connection.failure_count, 2);
    }

    #[tokio::test]
    async fn test_missing_oauth_config_quarantines_everything() {
        let store = MemoryConnectionStore::new();
        seed_connection(&store, Platform::GoogleAnalytics, 1, None);

        let refresher = refresher(None, Arc::new(store));
        let set = WorkingSet::new([Platform::GoogleAnalytics, Platform::FacebookAds]);
        let mut bundle = ga_bundle();

        let outcome = refresher.refresh(1, &set, &mut bundle, false).await;
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.removals.len(), 2);
        assert!(bundle.is_empty());
    }

    #[tokio::test]
    async fn test_facebook_exchange_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "EAAB-new",
                "token_type": "bearer",
                "expires_in": 5184000
            })))
            .mount(&server)
            .await;

        let store = MemoryConnectionStore::new();
        seed_connection(&store, Platform::FacebookAds, 1, None);
        let store = Arc::new(store);

        let refresher = refresher(Some(oauth_for(&server)), store);
        let set = WorkingSet::new([Platform::FacebookAds]);
        let mut bundle = CredentialBundle::new();
        bundle.insert(PlatformCredentials::FacebookAds {
            access_token: "EAAB-old".to_string(),
            account_id: "act_1".to_string(),
        });

        let outcome = refresher.refresh(1, &set, &mut bundle, false).await;
        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(
            bundle.get(Platform::FacebookAds).unwrap().refresh_secret(),
            "EAAB-new"
        );
    }

    #[tokio::test]
    async fn test_facebook_oauth_exception_flags_reauth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/access_token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {
                    "type": "OAuthException",
                    "message": "Error validating access token: the session has been invalidated."
                }
            })))
            .mount(&server)
            .await;

        let store = MemoryConnectionStore::new();
        seed_connection(&store, Platform::FacebookAds, 1, None);
        let store = Arc::new(store);

        let refresher = refresher(Some(oauth_for(&server)), store.clone());
        let set = WorkingSet::new([Platform::FacebookAds]);
        let mut bundle = CredentialBundle::new();
        bundle.insert(PlatformCredentials::FacebookAds {
            access_token: "EAAB-dead".to_string(),
            account_id: "act_1".to_string(),
        });

        let outcome = refresher.refresh(1, &set, &mut bundle, false).await;
        assert!(outcome.kept.is_empty());
        assert!(outcome.removals[0].needs_reauth);
    }

    #[test]
    fn test_classify_facebook_variants() {
        assert_eq!(
            classify_facebook("OAuthException", "anything"),
            RefreshFailureKind::InvalidGrant
        );
        assert_eq!(
            classify_facebook("GraphMethodException", "token has expired"),
            RefreshFailureKind::InvalidGrant
        );
        assert_eq!(
            classify_facebook("ServerError", "please retry"),
            RefreshFailureKind::Provider
        );
    }
}
