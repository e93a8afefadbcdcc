//! Persisted connection and digital-asset records.
//!
//! A `Connection` binds one campaigner to one platform asset through an OAuth
//! grant, and carries the health telemetry the dashboard reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::platform::AssetType;

/// The external platform entity a connection is scoped to, e.g. one GA4
/// property or one Google Ads customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitalAsset {
    pub id: Uuid,
    pub asset_type: AssetType,
    /// Platform's own identifier (property id, customer id, ad account id).
    pub external_id: String,
    /// Human-readable name shown in the dashboard.
    pub name: String,
    /// Issuing provider ("Google", "Facebook").
    pub provider: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl DigitalAsset {
    pub fn new(
        asset_type: AssetType,
        external_id: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset_type,
            external_id: external_id.into(),
            name: name.into(),
            provider: provider.into(),
            is_active: true,
        }
    }
}

/// OAuth credential plus health state binding one campaigner to one asset.
///
/// Rows are never hard-deleted; revocation flips the `revoked` flag and
/// deletion is an external concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub digital_asset_id: Uuid,
    pub campaigner_id: i64,

    /// Encrypted token blobs (AES-GCM, nonce-prefixed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_enc: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_enc: Option<Vec<u8>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked: bool,
    /// Silent refresh is forbidden while set; cleared only by a successful
    /// refresh or an explicit re-authentication.
    #[serde(default)]
    pub needs_reauth: bool,

    #[serde(default)]
    pub failure_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_validated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(digital_asset_id: Uuid, campaigner_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            digital_asset_id,
            campaigner_id,
            access_token_enc: None,
            refresh_token_enc: None,
            expires_at: None,
            revoked: false,
            needs_reauth: false,
            failure_count: 0,
            failure_reason: None,
            last_failure_at: None,
            last_validated_at: None,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this connection may be exercised at all.
    pub fn is_usable(&self) -> bool {
        !self.revoked && !self.needs_reauth
    }
}
