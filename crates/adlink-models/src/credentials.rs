//! Ephemeral per-run credential material.
//!
//! A `CredentialBundle` is built fresh for each orchestration run from the
//! decrypted connection rows, mutated in place as tokens are refreshed, and
//! shrunk as platforms are quarantined. It never outlives the run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::platform::Platform;

/// Raw secret material needed to talk to one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "snake_case")]
pub enum PlatformCredentials {
    GoogleAnalytics {
        refresh_token: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        access_token: Option<String>,
        property_id: String,
        client_id: String,
        client_secret: String,
    },
    GoogleAds {
        refresh_token: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        access_token: Option<String>,
        customer_id: String,
        developer_token: String,
        client_id: String,
        client_secret: String,
    },
    FacebookAds {
        access_token: String,
        account_id: String,
    },
}

impl PlatformCredentials {
    pub fn platform(&self) -> Platform {
        match self {
            PlatformCredentials::GoogleAnalytics { .. } => Platform::GoogleAnalytics,
            PlatformCredentials::GoogleAds { .. } => Platform::GoogleAds,
            PlatformCredentials::FacebookAds { .. } => Platform::FacebookAds,
        }
    }

    /// The token handed to the provider's refresh endpoint: the refresh token
    /// for Google platforms, the current access token for Facebook's
    /// exchange-style flow.
    pub fn refresh_secret(&self) -> &str {
        match self {
            PlatformCredentials::GoogleAnalytics { refresh_token, .. } => refresh_token,
            PlatformCredentials::GoogleAds { refresh_token, .. } => refresh_token,
            PlatformCredentials::FacebookAds { access_token, .. } => access_token,
        }
    }

    /// Substitute a freshly issued access token into the bundle entry.
    pub fn apply_refreshed(&mut self, token: &str) {
        match self {
            PlatformCredentials::GoogleAnalytics { access_token, .. }
            | PlatformCredentials::GoogleAds { access_token, .. } => {
                *access_token = Some(token.to_string());
            }
            PlatformCredentials::FacebookAds { access_token, .. } => {
                *access_token = token.to_string();
            }
        }
    }

    /// Display-safe rendering of the primary secret.
    pub fn masked(&self) -> String {
        let value = self.refresh_secret();
        if value.len() <= 8 {
            return "*".repeat(value.len());
        }
        format!("{}...{}", &value[..4], &value[value.len() - 4..])
    }
}

/// Ordered map of platform → secret material for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialBundle {
    entries: BTreeMap<Platform, PlatformCredentials>,
}

impl CredentialBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert credentials; an entry for the same platform is replaced.
    pub fn insert(&mut self, credentials: PlatformCredentials) {
        self.entries.insert(credentials.platform(), credentials);
    }

    pub fn get(&self, platform: Platform) -> Option<&PlatformCredentials> {
        self.entries.get(&platform)
    }

    pub fn get_mut(&mut self, platform: Platform) -> Option<&mut PlatformCredentials> {
        self.entries.get_mut(&platform)
    }

    /// Remove a quarantined platform's secrets.
    pub fn remove(&mut self, platform: Platform) -> Option<PlatformCredentials> {
        self.entries.remove(&platform)
    }

    pub fn contains(&self, platform: Platform) -> bool {
        self.entries.contains_key(&platform)
    }

    pub fn platforms(&self) -> impl Iterator<Item = Platform> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
