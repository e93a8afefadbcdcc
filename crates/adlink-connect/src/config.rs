//! Lifecycle configuration.
//!
//! Everything the orchestrator and its services need is assembled here once
//! at process start and passed by reference; there is no ambient global
//! state.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;

use adlink_models::Platform;

use crate::transport::stdio::StdioServerSpec;

// Defaults
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_INIT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ALERT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_MAX_FAILURES: u32 = 3;
const MIN_TIMEOUT_MS: u64 = 100;

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const FACEBOOK_TOKEN_URL: &str = "https://graph.facebook.com/v18.0/oauth/access_token";

/// OAuth application credentials shared by all campaigners.
#[derive(Debug, Clone)]
pub struct OAuthAppConfig {
    pub google_client_id: String,
    pub google_client_secret: String,
    pub facebook_app_id: String,
    pub facebook_app_secret: String,
    /// Override points for tests; production uses the provider defaults.
    pub google_token_url: String,
    pub facebook_token_url: String,
}

impl OAuthAppConfig {
    pub fn new(
        google_client_id: impl Into<String>,
        google_client_secret: impl Into<String>,
        facebook_app_id: impl Into<String>,
        facebook_app_secret: impl Into<String>,
    ) -> Self {
        Self {
            google_client_id: google_client_id.into(),
            google_client_secret: google_client_secret.into(),
            facebook_app_id: facebook_app_id.into(),
            facebook_app_secret: facebook_app_secret.into(),
            google_token_url: GOOGLE_TOKEN_URL.to_string(),
            facebook_token_url: FACEBOOK_TOKEN_URL.to_string(),
        }
    }
}

/// Full configuration for one deployment of the lifecycle core.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// OAuth app credentials; absent means the refresh subsystem is
    /// unconfigured and every platform needing a refresh is quarantined.
    pub oauth: Option<OAuthAppConfig>,
    /// Base URL of each platform's HTTP tool microservice.
    pub http_endpoints: HashMap<Platform, String>,
    /// Subprocess transport definition per platform (fallback path).
    pub stdio_servers: HashMap<Platform, StdioServerSpec>,

    pub enable_token_refresh: bool,
    pub enable_validation: bool,

    pub refresh_timeout: Duration,
    pub init_timeout: Duration,
    pub probe_timeout: Duration,
    pub alert_timeout: Duration,

    /// Failure-count threshold for `should_retry`.
    pub max_failures: u32,

    /// Incident sink endpoint; absent disables alerting.
    pub alert_endpoint: Option<String>,
    pub alert_token: Option<String>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            oauth: None,
            http_endpoints: HashMap::new(),
            stdio_servers: HashMap::new(),
            enable_token_refresh: true,
            enable_validation: true,
            refresh_timeout: Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
            init_timeout: Duration::from_secs(DEFAULT_INIT_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            alert_timeout: Duration::from_secs(DEFAULT_ALERT_TIMEOUT_SECS),
            max_failures: DEFAULT_MAX_FAILURES,
            alert_endpoint: None,
            alert_token: None,
        }
    }
}

impl ConnectConfig {
    /// Read deployment configuration from the environment.
    ///
    /// Unset endpoint variables simply leave the platform unconfigured; the
    /// negotiator surfaces that as a per-platform configuration failure.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.enable_token_refresh = env_flag("ADLINK_ENABLE_TOKEN_REFRESH", true);
        config.enable_validation = env_flag("ADLINK_ENABLE_VALIDATION", true);

        if let (Ok(google_id), Ok(google_secret), Ok(fb_id), Ok(fb_secret)) = (
            std::env::var("ADLINK_GOOGLE_CLIENT_ID"),
            std::env::var("ADLINK_GOOGLE_CLIENT_SECRET"),
            std::env::var("ADLINK_FACEBOOK_APP_ID"),
            std::env::var("ADLINK_FACEBOOK_APP_SECRET"),
        ) {
            config.oauth = Some(OAuthAppConfig::new(
                google_id,
                google_secret,
                fb_id,
                fb_secret,
            ));
        }

        let endpoint_vars = [
            (Platform::GoogleAnalytics, "ADLINK_GA_SERVICE_URL"),
            (Platform::GoogleAds, "ADLINK_GOOGLE_ADS_SERVICE_URL"),
            (Platform::FacebookAds, "ADLINK_FACEBOOK_SERVICE_URL"),
        ];
        for (platform, var) in endpoint_vars {
            if let Ok(url) = std::env::var(var) {
                config
                    .http_endpoints
                    .insert(platform, url.trim_end_matches('/').to_string());
            }
        }

        config.alert_endpoint = std::env::var("ADLINK_ALERT_URL").ok();
        config.alert_token = std::env::var("ADLINK_ALERT_TOKEN").ok();

        config
    }

    pub fn with_endpoint(mut self, platform: Platform, base_url: impl Into<String>) -> Self {
        let url: String = base_url.into();
        self.http_endpoints
            .insert(platform, url.trim_end_matches('/').to_string());
        self
    }

    pub fn with_stdio_server(mut self, platform: Platform, spec: StdioServerSpec) -> Self {
        self.stdio_servers.insert(platform, spec);
        self
    }

    pub fn with_oauth(mut self, oauth: OAuthAppConfig) -> Self {
        self.oauth = Some(oauth);
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        for timeout in [
            self.refresh_timeout,
            self.init_timeout,
            self.probe_timeout,
            self.alert_timeout,
        ] {
            if timeout < Duration::from_millis(MIN_TIMEOUT_MS) {
                return Err(anyhow::anyhow!(
                    "Timeouts must be at least {}ms",
                    MIN_TIMEOUT_MS
                ));
            }
        }

        if self.max_failures == 0 {
            return Err(anyhow::anyhow!("max_failures must be at least 1"));
        }

        for (platform, url) in &self.http_endpoints {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "Endpoint for {platform} is not an http(s) URL: {url}"
                ));
            }
        }

        Ok(())
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectConfig::default();
        assert!(config.enable_token_refresh);
        assert!(config.enable_validation);
        assert_eq!(config.probe_timeout, Duration::from_secs(10));
        assert_eq!(config.max_failures, 3);
        assert!(config.oauth.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_endpoint_strips_trailing_slash() {
        let config = ConnectConfig::default()
            .with_endpoint(Platform::GoogleAnalytics, "http://localhost:9100/");
        assert_eq!(
            config.http_endpoints.get(&Platform::GoogleAnalytics).unwrap(),
            "http://localhost:9100"
        );
    }

    #[test]
    fn test_validate_rejects_tiny_timeout() {
        let config = ConnectConfig {
            probe_timeout: Duration::from_millis(10),
            ..ConnectConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_max_failures() {
        let config = ConnectConfig {
            max_failures: 0,
            ..ConnectConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_http_endpoint() {
        let config =
            ConnectConfig::default().with_endpoint(Platform::FacebookAds, "ftp://somewhere");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oauth_config_uses_provider_defaults() {
        let oauth = OAuthAppConfig::new("id", "secret", "app", "app-secret");
        assert!(oauth.google_token_url.contains("googleapis.com"));
        assert!(oauth.facebook_token_url.contains("graph.facebook.com"));
    }
}
