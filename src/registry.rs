//! Explicit registry of hubs, keyed by config entry id.
//!
//! The embedding platform creates one hub per configured doorbell and looks
//! it up by the entry id it assigned. Everything is owned by the registry
//! value the caller holds; there is no process-global state.

use std::collections::HashMap;

use log::{debug, info};
use parking_lot::RwLock;

use crate::config::DeviceConfig;
use crate::error::{DoorbellError, Result};
use crate::hub::Hub;
use crate::protocol::Connector;
use crate::store::HashStore;

/// Hubs by entry id. Cheap handles: [`Hub`] clones share state.
pub struct HubRegistry<C: Connector> {
    connector: C,
    hubs: RwLock<HashMap<String, Hub<C>>>,
}

impl<C: Connector> HubRegistry<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            hubs: RwLock::new(HashMap::new()),
        }
    }

    /// Create and register a hub for `entry_id`. Fails if the id is taken.
    pub fn create(
        &self,
        entry_id: &str,
        config: DeviceConfig,
        store: HashStore,
    ) -> Result<Hub<C>> {
        let mut hubs = self.hubs.write();
        if hubs.contains_key(entry_id) {
            return Err(DoorbellError::DuplicateHub(entry_id.to_string()));
        }
        let hub = Hub::new(config, self.connector.clone(), store);
        hubs.insert(entry_id.to_string(), hub.clone());
        info!("Registered hub '{}' ({})", entry_id, hub.device_id());
        Ok(hub)
    }

    pub fn get(&self, entry_id: &str) -> Result<Hub<C>> {
        self.hubs
            .read()
            .get(entry_id)
            .cloned()
            .ok_or_else(|| DoorbellError::HubNotFound(entry_id.to_string()))
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.hubs.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.hubs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hubs.read().is_empty()
    }

    /// Shut down and remove one hub.
    pub async fn remove(&self, entry_id: &str) -> Result<()> {
        let hub = self
            .hubs
            .write()
            .remove(entry_id)
            .ok_or_else(|| DoorbellError::HubNotFound(entry_id.to_string()))?;
        hub.shutdown().await;
        debug!("Removed hub '{}'", entry_id);
        Ok(())
    }

    /// Shut down and remove every hub.
    pub async fn shutdown_all(&self) {
        let hubs: Vec<(String, Hub<C>)> = self.hubs.write().drain().collect();
        for (entry_id, hub) in hubs {
            hub.shutdown().await;
            debug!("Shut down hub '{}'", entry_id);
        }
    }
}
