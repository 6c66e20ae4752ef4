// Uniform command surface over the registry and the connection manager.
// Device-addressed calls fail fast with NotConnected when no transport is active.

use crate::adb::{
    AppInfo, BridgeTransport, ConnectionState, DEFAULT_ADB_PORT, Device, RemoteError,
    RemoteResult, ScreenshotCapture, Transport,
};
use crate::config::{BridgeEndpoint, RemoteConfig};
use crate::manager::ConnectionManager;
use crate::registry::{DeviceRegistry, JsonFileStore};
use crate::wol::{self, MacAddress};
use std::sync::Arc;

pub struct RemoteControl {
    registry: DeviceRegistry,
    manager: ConnectionManager,
}

impl RemoteControl {
    /// Bridge endpoint precedence: explicit config, then the persisted
    /// override, then the default.
    pub fn new(config: &RemoteConfig, registry: DeviceRegistry) -> Self {
        let endpoint = config
            .bridge
            .clone()
            .or_else(|| registry.bridge_endpoint())
            .unwrap_or_default();
        log::debug!(
            "Remote: transport={} bridge={endpoint} state={}",
            config.transport,
            config.state_path.display()
        );
        Self {
            manager: ConnectionManager::new(config.transport, endpoint, config.timeouts.clone()),
            registry,
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        let registry = DeviceRegistry::open(JsonFileStore::new(&config.state_path));
        Self::new(config, registry)
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Find a saved device by id, or build one from an `ip[:port]` string.
    pub fn resolve_device(&self, id: &str) -> RemoteResult<Device> {
        if let Some(device) = self.registry.get(id) {
            return Ok(device);
        }
        let (ip, port) = match id.rsplit_once(':') {
            Some((ip, port)) => {
                let port = port.parse().map_err(|_| RemoteError::NotConnected {
                    device_id: id.to_string(),
                })?;
                (ip, port)
            }
            None => (id, DEFAULT_ADB_PORT),
        };
        if ip.is_empty() {
            return Err(RemoteError::NotConnected {
                device_id: id.to_string(),
            });
        }
        Ok(Device::new(ip, port, None))
    }

    pub async fn connect(&self, device: &Device) -> RemoteResult<Device> {
        let transport = self.manager.connect(device).await?;
        let connected = transport.device().clone();
        if let Err(e) = self
            .registry
            .upsert(connected.clone())
            .and_then(|_| self.registry.set_last_connected(&connected.id))
        {
            log::warn!("Remote: connected but could not save {}: {e}", connected.id);
        }
        Ok(connected)
    }

    pub async fn disconnect(&self, device_id: &str) -> RemoteResult<()> {
        if self.manager.disconnect(device_id).await {
            Ok(())
        } else {
            Err(RemoteError::NotConnected {
                device_id: device_id.to_string(),
            })
        }
    }

    pub async fn state(&self, device_id: &str) -> ConnectionState {
        self.manager.state(device_id).await
    }

    /// Ask the relay to scan the LAN and save what it finds.
    pub async fn scan_network(&self) -> RemoteResult<Vec<Device>> {
        let devices = BridgeTransport::scan(self.manager.endpoint(), self.manager.timeouts()).await?;
        for device in &devices {
            self.registry.upsert(device.clone())?;
        }
        Ok(devices)
    }

    pub fn add_device(&self, ip: &str, name: Option<&str>, port: Option<u16>) -> RemoteResult<Device> {
        self.registry.add(ip, name, port.unwrap_or(DEFAULT_ADB_PORT))
    }

    /// Forget a device, disconnecting it first when it is active.
    pub async fn remove_device(&self, device_id: &str) -> RemoteResult<bool> {
        if self.manager.disconnect(device_id).await {
            log::info!("Remote: disconnected {device_id} before removal");
        }
        self.registry.remove(device_id)
    }

    pub fn list_devices(&self) -> Vec<Device> {
        self.registry.list()
    }

    async fn transport(&self, device_id: &str) -> RemoteResult<Arc<Transport>> {
        self.manager
            .get(device_id)
            .await
            .ok_or_else(|| RemoteError::NotConnected {
                device_id: device_id.to_string(),
            })
    }

    // Drop the transport when the error says its connection is gone
    async fn settle<T>(&self, device_id: &str, result: RemoteResult<T>) -> RemoteResult<T> {
        if let Err(e) = &result {
            if e.is_connection_lost() {
                self.manager.discard(device_id, e.to_string()).await;
            }
        }
        result
    }

    pub async fn send_key(&self, device_id: &str, code: &str) -> RemoteResult<()> {
        let transport = self.transport(device_id).await?;
        let result = transport.send_key(code).await;
        self.settle(device_id, result).await
    }

    pub async fn send_text(&self, device_id: &str, text: &str) -> RemoteResult<()> {
        let transport = self.transport(device_id).await?;
        let result = transport.send_text(text).await;
        self.settle(device_id, result).await
    }

    pub async fn move_cursor(&self, device_id: &str, dx: i32, dy: i32) -> RemoteResult<()> {
        let transport = self.transport(device_id).await?;
        let result = transport.move_cursor(dx, dy).await;
        self.settle(device_id, result).await
    }

    pub async fn tap(&self, device_id: &str) -> RemoteResult<()> {
        let transport = self.transport(device_id).await?;
        let result = transport.tap().await;
        self.settle(device_id, result).await
    }

    pub async fn scroll(&self, device_id: &str, delta_y: i32) -> RemoteResult<()> {
        let transport = self.transport(device_id).await?;
        let result = transport.scroll(delta_y).await;
        self.settle(device_id, result).await
    }

    pub async fn fetch_apps(&self, device_id: &str) -> RemoteResult<Vec<AppInfo>> {
        let transport = self.transport(device_id).await?;
        let result = transport.get_apps().await;
        self.settle(device_id, result).await
    }

    pub async fn launch_app(&self, device_id: &str, package: &str) -> RemoteResult<()> {
        let transport = self.transport(device_id).await?;
        let result = transport.launch_app(package).await;
        self.settle(device_id, result).await
    }

    pub async fn power_off(&self, device_id: &str) -> RemoteResult<()> {
        let transport = self.transport(device_id).await?;
        let result = transport.power_off().await;
        self.settle(device_id, result).await
    }

    /// `Ok(None)` when the device did not deliver an image in time.
    pub async fn take_screenshot(&self, device_id: &str) -> RemoteResult<Option<ScreenshotCapture>> {
        let transport = self.transport(device_id).await?;
        let result = transport.take_screenshot().await;
        self.settle(device_id, result).await
    }

    /// Send a magic packet. Through the relay when `device_id` has an active
    /// bridge transport, otherwise from this host. Without an explicit MAC the
    /// cached one is used.
    pub async fn wake_on_lan(&self, device_id: Option<&str>, mac: Option<&str>) -> RemoteResult<bool> {
        let mac: MacAddress = match mac {
            Some(value) => value.parse()?,
            None => self
                .registry
                .mac_address()
                .ok_or_else(|| RemoteError::InvalidMacAddress {
                    value: String::new(),
                })?,
        };

        let transport = match device_id {
            Some(id) => self.manager.get(id).await,
            None => None,
        };
        match (transport, device_id) {
            (Some(transport), Some(id)) => {
                let result = transport.wake_on_lan(&mac).await;
                self.settle(id, result).await
            }
            _ => {
                wol::send_magic_packet(&mac).await?;
                Ok(true)
            }
        }
    }

    pub fn save_mac_address(&self, mac: &str) -> RemoteResult<MacAddress> {
        let mac: MacAddress = mac.parse()?;
        self.registry.save_mac_address(&mac)?;
        log::info!("Remote: saved MAC {mac}");
        Ok(mac)
    }

    /// Persist a bridge endpoint override; used by the next session.
    pub fn set_bridge_endpoint(&self, endpoint: BridgeEndpoint) -> RemoteResult<()> {
        self.registry.set_bridge_endpoint(endpoint)
    }

    /// Disconnect every device. Call before the process exits.
    pub async fn shutdown(&self) {
        self.manager.disconnect_all().await;
    }
}
