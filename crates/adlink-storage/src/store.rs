//! Storage trait the lifecycle core depends on.
//!
//! The core never issues raw queries; it sees exactly these operations.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use adlink_models::{Connection, DigitalAsset, Platform};

/// Read/update access to connection rows.
///
/// Writes are read-modify-write per row; two near-simultaneous runs for the
/// same campaigner may race, and last-writer-wins is acceptable for the
/// failure counters (telemetry, not authorization state).
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Fetch a connection by id.
    async fn get(&self, id: Uuid) -> Result<Option<Connection>>;

    /// Fetch the live (non-revoked) connection binding a campaigner to a
    /// platform through an active digital asset.
    async fn get_by_platform(
        &self,
        platform: Platform,
        campaigner_id: i64,
    ) -> Result<Option<Connection>>;

    /// Persist a connection row, replacing any previous version.
    async fn save(&self, connection: &Connection) -> Result<()>;

    /// Fetch the digital asset a connection is scoped to.
    async fn get_asset(&self, id: Uuid) -> Result<Option<DigitalAsset>>;

    /// Persist a digital asset row.
    async fn save_asset(&self, asset: &DigitalAsset) -> Result<()>;

    /// Connections with at least `min_failure_count` recorded failures,
    /// excluding revoked rows. Feeds the connection-health dashboard.
    async fn failing_connections(&self, min_failure_count: u32) -> Result<Vec<Connection>>;
}
