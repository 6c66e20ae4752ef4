// Persisted device registry: saved devices, last-connected id, cached MAC and
// bridge endpoint override, kept together in one JSON document.

use crate::adb::{Device, RemoteError, RemoteResult};
use crate::config::BridgeEndpoint;
use crate::wol::MacAddress;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    pub devices: Vec<Device>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<BridgeEndpoint>,
}

/// Where the registry document is kept.
pub trait StateStore: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> RemoteResult<Option<PersistedState>>;
    fn save(&self, state: &PersistedState) -> RemoteResult<()>;
}

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn store_error(&self, e: impl ToString) -> RemoteError {
        RemoteError::Store {
            path: self.path.display().to_string(),
            description: e.to_string(),
        }
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> RemoteResult<Option<PersistedState>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.store_error(e)),
        };
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| self.store_error(e))
    }

    fn save(&self, state: &PersistedState) -> RemoteResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.store_error(e))?;
        }
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, json).map_err(|e| self.store_error(e))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<Option<PersistedState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> RemoteResult<Option<PersistedState>> {
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, state: &PersistedState) -> RemoteResult<()> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
        Ok(())
    }
}

pub struct DeviceRegistry {
    store: Box<dyn StateStore>,
    state: Mutex<PersistedState>,
}

impl DeviceRegistry {
    /// Load the registry. An unreadable or corrupt document starts empty.
    pub fn open(store: impl StateStore + 'static) -> Self {
        let state = match store.load() {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                log::warn!("Registry: ignoring unreadable state, starting empty: {e}");
                PersistedState::default()
            }
        };
        log::debug!("Registry: loaded {} device(s)", state.devices.len());
        Self {
            store: Box::new(store),
            state: Mutex::new(state),
        }
    }

    pub fn in_memory() -> Self {
        Self::open(MemoryStore::new())
    }

    fn lock(&self) -> MutexGuard<'_, PersistedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Apply a change and write the whole document back; memory only changes once saved
    fn update<T>(&self, change: impl FnOnce(&mut PersistedState) -> T) -> RemoteResult<T> {
        let mut state = self.lock();
        let mut next = state.clone();
        let result = change(&mut next);
        self.store.save(&next)?;
        *state = next;
        Ok(result)
    }

    /// Add a device by address. Adding the same `ip:port` again replaces the
    /// existing entry in place.
    pub fn add(&self, ip: &str, name: Option<&str>, port: u16) -> RemoteResult<Device> {
        let device = Device::new(ip.trim(), port, name);
        self.upsert(device.clone())?;
        log::info!("Registry: saved {} ({})", device.name, device.id);
        Ok(device)
    }

    pub fn upsert(&self, device: Device) -> RemoteResult<()> {
        self.update(|state| {
            match state.devices.iter_mut().find(|d| d.id == device.id) {
                Some(existing) => *existing = device,
                None => state.devices.push(device),
            }
        })
    }

    /// Returns whether an entry was removed.
    pub fn remove(&self, id: &str) -> RemoteResult<bool> {
        let removed = self.update(|state| {
            let before = state.devices.len();
            state.devices.retain(|d| d.id != id);
            if state.last_connected.as_deref() == Some(id) {
                state.last_connected = None;
            }
            state.devices.len() != before
        })?;
        if removed {
            log::info!("Registry: removed {id}");
        }
        Ok(removed)
    }

    pub fn list(&self) -> Vec<Device> {
        self.lock().devices.clone()
    }

    pub fn get(&self, id: &str) -> Option<Device> {
        self.lock().devices.iter().find(|d| d.id == id).cloned()
    }

    pub fn last_connected(&self) -> Option<Device> {
        let state = self.lock();
        let id = state.last_connected.as_deref()?;
        state.devices.iter().find(|d| d.id == id).cloned()
    }

    pub fn set_last_connected(&self, id: &str) -> RemoteResult<()> {
        self.update(|state| state.last_connected = Some(id.to_string()))
    }

    /// Cached MAC address; an unparseable stored value reads as absent.
    pub fn mac_address(&self) -> Option<MacAddress> {
        let stored = self.lock().mac_address.clone()?;
        match stored.parse() {
            Ok(mac) => Some(mac),
            Err(e) => {
                log::warn!("Registry: ignoring stored MAC: {e}");
                None
            }
        }
    }

    pub fn save_mac_address(&self, mac: &MacAddress) -> RemoteResult<()> {
        self.update(|state| state.mac_address = Some(mac.to_string()))
    }

    pub fn bridge_endpoint(&self) -> Option<BridgeEndpoint> {
        self.lock().bridge.clone()
    }

    pub fn set_bridge_endpoint(&self, endpoint: BridgeEndpoint) -> RemoteResult<()> {
        self.update(|state| state.bridge = Some(endpoint))
    }
}
