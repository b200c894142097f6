use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::device::discovery::DeviceDiscovery;
use crate::device::{DeviceId, DeviceState};
use crate::{FleetError, Result};

/// Tracks the known device set and the active device between refreshes.
///
/// Owned by the caller and passed by reference; there is deliberately no
/// process-wide registry instance.
pub struct DeviceRegistry {
    discovery: Arc<dyn DeviceDiscovery>,
    devices: Mutex<HashMap<DeviceId, DeviceState>>,
    active: Mutex<Option<DeviceId>>,
}

impl DeviceRegistry {
    pub fn new(discovery: Arc<dyn DeviceDiscovery>) -> Self {
        Self {
            discovery,
            devices: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
        }
    }

    /// Re-run discovery, replacing the known set. Devices that vanished are
    /// dropped; the active device is kept only while it is still present.
    pub async fn refresh(&self) -> Result<Vec<DeviceId>> {
        let discovered = self.discovery.list_devices().await?;

        let mut devices = self.devices.lock().unwrap();
        devices.clear();
        for id in &discovered {
            devices.insert(id.clone(), DeviceState::Connected);
        }
        drop(devices);

        let mut active = self.active.lock().unwrap();
        match active.as_ref() {
            Some(current) if discovered.contains(current) => {}
            _ => {
                *active = discovered.first().cloned();
                if let Some(id) = active.as_ref() {
                    debug!(device = id.short(), "auto-selected active device");
                }
            }
        }

        Ok(discovered)
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.lock().unwrap().contains_key(id)
    }

    pub fn state(&self, id: &DeviceId) -> DeviceState {
        self.devices
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(DeviceState::Unknown)
    }

    /// Known devices in a stable order.
    pub fn all(&self) -> Vec<DeviceId> {
        let mut ids: Vec<_> = self.devices.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn first(&self) -> Option<DeviceId> {
        self.all().into_iter().next()
    }

    pub fn active(&self) -> Option<DeviceId> {
        self.active.lock().unwrap().clone()
    }

    pub fn set_active(&self, id: &DeviceId) -> Result<()> {
        if !self.contains(id) {
            return Err(FleetError::DeviceNotFound(id.to_string()));
        }
        *self.active.lock().unwrap() = Some(id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StaticDiscovery(Vec<&'static str>);

    #[async_trait]
    impl DeviceDiscovery for StaticDiscovery {
        async fn list_devices(&self) -> Result<Vec<DeviceId>> {
            self.0.iter().map(|s| DeviceId::new(*s)).collect()
        }
    }

    fn registry(ids: Vec<&'static str>) -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(StaticDiscovery(ids)))
    }

    #[tokio::test]
    async fn refresh_populates_and_auto_selects_active() {
        let registry = registry(vec!["aaaa1111", "bbbb2222"]);
        let found = registry.refresh().await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(registry.active().unwrap().as_str(), "aaaa1111");
        assert_eq!(registry.state(&found[0]), DeviceState::Connected);
    }

    #[tokio::test]
    async fn set_active_rejects_unknown_device() {
        let registry = registry(vec!["aaaa1111"]);
        registry.refresh().await.unwrap();

        let stranger = DeviceId::new("ffff9999").unwrap();
        assert!(matches!(
            registry.set_active(&stranger),
            Err(FleetError::DeviceNotFound(_))
        ));
        assert_eq!(registry.active().unwrap().as_str(), "aaaa1111");
    }

    #[tokio::test]
    async fn refresh_replaces_stale_entries() {
        let registry = DeviceRegistry::new(Arc::new(StaticDiscovery(vec!["cccc3333"])));
        registry.refresh().await.unwrap();

        let gone = DeviceId::new("aaaa1111").unwrap();
        assert!(!registry.contains(&gone));
        assert_eq!(registry.state(&gone), DeviceState::Unknown);
        assert_eq!(registry.all().len(), 1);
    }
}
