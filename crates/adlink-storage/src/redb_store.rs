//! redb-backed connection store.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use uuid::Uuid;

use adlink_models::{Connection, DigitalAsset, Platform};

use crate::store::ConnectionStore;

const CONNECTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("connections");
const DIGITAL_ASSETS: TableDefinition<&str, &[u8]> = TableDefinition::new("digital_assets");

/// Connection store over an embedded redb database.
///
/// Rows are stored as JSON bytes keyed by uuid string. The platform lookup
/// scans connections and joins against the asset table; connection counts per
/// campaigner are small enough that an index is not worth its upkeep.
#[derive(Clone)]
pub struct RedbConnectionStore {
    db: Arc<Database>,
}

impl RedbConnectionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path.as_ref())
            .with_context(|| format!("Failed to open connection db at {:?}", path.as_ref()))?;
        Self::new(Arc::new(db))
    }

    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(CONNECTIONS)?;
        write_txn.open_table(DIGITAL_ASSETS)?;
        write_txn.commit()?;
        Ok(Self { db })
    }

    fn put_raw(
        &self,
        table: TableDefinition<&'static str, &'static [u8]>,
        id: &str,
        data: &[u8],
    ) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table)?;
            table.insert(id, data)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_raw(
        &self,
        table: TableDefinition<&'static str, &'static [u8]>,
        id: &str,
    ) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;
        if let Some(value) = table.get(id)? {
            Ok(Some(value.value().to_vec()))
        } else {
            Ok(None)
        }
    }

    fn list_connections(&self) -> Result<Vec<Connection>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONNECTIONS)?;
        let mut rows = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            let connection: Connection = serde_json::from_slice(value.value())
                .context("Failed to decode connection row")?;
            rows.push(connection);
        }
        Ok(rows)
    }
}

#[async_trait]
impl ConnectionStore for RedbConnectionStore {
    async fn get(&self, id: Uuid) -> Result<Option<Connection>> {
        match self.get_raw(CONNECTIONS, &id.to_string())? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).context("Failed to decode connection row")?,
            )),
            None => Ok(None),
        }
    }

    async fn get_by_platform(
        &self,
        platform: Platform,
        campaigner_id: i64,
    ) -> Result<Option<Connection>> {
        let asset_type = platform.asset_type();
        for connection in self.list_connections()? {
            if connection.campaigner_id != campaigner_id || connection.revoked {
                continue;
            }
            let asset = self.get_asset(connection.digital_asset_id).await?;
            if let Some(asset) = asset
                && asset.asset_type == asset_type
                && asset.is_active
            {
                return Ok(Some(connection));
            }
        }
        Ok(None)
    }

    async fn save(&self, connection: &Connection) -> Result<()> {
        let bytes = serde_json::to_vec(connection)?;
        self.put_raw(CONNECTIONS, &connection.id.to_string(), &bytes)
    }

    async fn get_asset(&self, id: Uuid) -> Result<Option<DigitalAsset>> {
        match self.get_raw(DIGITAL_ASSETS, &id.to_string())? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).context("Failed to decode asset row")?,
            )),
            None => Ok(None),
        }
    }

    async fn save_asset(&self, asset: &DigitalAsset) -> Result<()> {
        let bytes = serde_json::to_vec(asset)?;
        self.put_raw(DIGITAL_ASSETS, &asset.id.to_string(), &bytes)
    }

    async fn failing_connections(&self, min_failure_count: u32) -> Result<Vec<Connection>> {
        Ok(self
            .list_connections()?
            .into_iter()
            .filter(|c| !c.revoked && c.failure_count >= min_failure_count)
            .collect())
    }
}
