//! In-memory connection store for tests and embedded use.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use adlink_models::{Connection, DigitalAsset, Platform};

use crate::store::ConnectionStore;

/// Map-backed store with the same semantics as the redb implementation.
#[derive(Clone, Default)]
pub struct MemoryConnectionStore {
    connections: Arc<RwLock<HashMap<Uuid, Connection>>>,
    assets: Arc<RwLock<HashMap<Uuid, DigitalAsset>>>,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed helper: insert an asset and a connection bound to it.
    pub fn seed(&self, asset: DigitalAsset, connection: Connection) {
        self.assets.write().insert(asset.id, asset);
        self.connections.write().insert(connection.id, connection);
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn get(&self, id: Uuid) -> Result<Option<Connection>> {
        Ok(self.connections.read().get(&id).cloned())
    }

    async fn get_by_platform(
        &self,
        platform: Platform,
        campaigner_id: i64,
    ) -> Result<Option<Connection>> {
        let asset_type = platform.asset_type();
        let assets = self.assets.read();
        let connections = self.connections.read();
        Ok(connections
            .values()
            .filter(|c| c.campaigner_id == campaigner_id && !c.revoked)
            .find(|c| {
                assets
                    .get(&c.digital_asset_id)
                    .is_some_and(|a| a.asset_type == asset_type && a.is_active)
            })
            .cloned())
    }

    async fn save(&self, connection: &Connection) -> Result<()> {
        self.connections
            .write()
            .insert(connection.id, connection.clone());
        Ok(())
    }

    async fn get_asset(&self, id: Uuid) -> Result<Option<DigitalAsset>> {
        Ok(self.assets.read().get(&id).cloned())
    }

    async fn save_asset(&self, asset: &DigitalAsset) -> Result<()> {
        self.assets.write().insert(asset.id, asset.clone());
        Ok(())
    }

    async fn failing_connections(&self, min_failure_count: u32) -> Result<Vec<Connection>> {
        Ok(self
            .connections
            .read()
            .values()
            .filter(|c| !c.revoked && c.failure_count >= min_failure_count)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adlink_models::AssetType;

    #[tokio::test]
    async fn test_seed_and_lookup() {
        let store = MemoryConnectionStore::new();
        let asset = DigitalAsset::new(AssetType::Ga4Property, "p/9", "Site", "Google");
        let connection = Connection::new(asset.id, 77);
        let connection_id = connection.id;
        store.seed(asset, connection);

        let by_id = store.get(connection_id).await.unwrap().unwrap();
        assert_eq!(by_id.campaigner_id, 77);

        let by_platform = store
            .get_by_platform(Platform::GoogleAnalytics, 77)
            .await
            .unwrap();
        assert!(by_platform.is_some());
        assert!(store
            .get_by_platform(Platform::GoogleAds, 77)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = MemoryConnectionStore::new();
        let asset = DigitalAsset::new(AssetType::Ga4Property, "p/1", "Site", "Google");
        let mut connection = Connection::new(asset.id, 1);
        store.seed(asset, connection.clone());

        connection.failure_count = 4;
        store.save(&connection).await.unwrap();

        let loaded = store.get(connection.id).await.unwrap().unwrap();
        assert_eq!(loaded.failure_count, 4);
    }
}
