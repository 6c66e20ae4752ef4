// Bridge transport: ADB commands relayed through a WebSocket relay process
pub mod channel;
pub mod messages;
pub mod pending;

use self::channel::{BridgeChannel, BridgeEvent};
use self::messages::{BridgeRequest, BridgeResponse};
use super::error::{RemoteError, RemoteResult};
use super::types::{AppInfo, ConnectionState, Device, ScreenshotCapture};
use crate::config::{BridgeEndpoint, Timeouts};
use crate::wol::MacAddress;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

pub struct BridgeTransport {
    device: Device,
    channel: BridgeChannel,
    state: Arc<RwLock<ConnectionState>>,
    watcher: JoinHandle<()>,
    timeouts: Timeouts,
}

impl BridgeTransport {
    /// Open a channel to the relay and ask it to `adb connect` the device.
    pub async fn connect(
        device: Device,
        endpoint: &BridgeEndpoint,
        timeouts: Timeouts,
    ) -> RemoteResult<Self> {
        log::info!("Bridge: connecting to {} via relay {endpoint}", device.id);
        let channel = BridgeChannel::start(endpoint, &timeouts);

        if let Err(e) = channel.wait_open(timeouts.connect).await {
            channel.shutdown().await;
            return Err(RemoteError::connect_failure(&device.id, e));
        }

        let wanted = device.id.clone();
        let confirmed = channel
            .request(
                BridgeRequest::Connect {
                    device: device.clone(),
                },
                timeouts.relay_connect,
                |response| match response {
                    BridgeResponse::Connected { device } if device.id == wanted => {
                        Some(device.clone().normalized())
                    }
                    _ => None,
                },
            )
            .await;

        let confirmed = match confirmed {
            Ok(confirmed) => confirmed,
            Err(e) => {
                channel.shutdown().await;
                return Err(RemoteError::connect_failure(&device.id, e));
            }
        };
        // Relay knows nothing beyond what we sent; keep our name if it echoes an empty one
        let device = Device {
            name: if confirmed.name.is_empty() {
                device.name
            } else {
                confirmed.name
            },
            ..confirmed
        };
        log::info!("Bridge: connected to {} ({})", device.name, device.id);

        let state = Arc::new(RwLock::new(ConnectionState::Connected {
            device: device.clone(),
        }));
        let watcher = tokio::spawn(watch_channel(
            device.clone(),
            channel.subscribe(),
            channel.sender(),
            state.clone(),
        ));

        Ok(Self {
            device,
            channel,
            state,
            watcher,
            timeouts,
        })
    }

    /// Ask the relay to scan its subnet. Uses a short-lived channel; no
    /// device needs to be connected.
    pub async fn scan(endpoint: &BridgeEndpoint, timeouts: &Timeouts) -> RemoteResult<Vec<Device>> {
        let channel = BridgeChannel::start(endpoint, timeouts);
        let result = async {
            channel.wait_open(timeouts.connect).await?;
            channel
                .request(BridgeRequest::Scan, timeouts.scan, |response| match response {
                    BridgeResponse::ScanResult { devices } => Some(devices.clone()),
                    _ => None,
                })
                .await
        }
        .await;
        channel.shutdown().await;

        let devices: Vec<Device> = result?.into_iter().map(Device::normalized).collect();
        log::info!("Bridge: scan found {} device(s)", devices.len());
        Ok(devices)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub fn last_error(&self) -> Option<String> {
        self.channel.last_error()
    }

    /// Skip the remaining reconnect delay when the relay is down.
    pub fn reconnect(&self) {
        self.channel.reconnect();
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    pub async fn send_key(&self, code: &str) -> RemoteResult<()> {
        self.channel.send(BridgeRequest::Key {
            key_code: code.to_string(),
        })
    }

    pub async fn send_text(&self, text: &str) -> RemoteResult<()> {
        self.channel.send(BridgeRequest::Text {
            text: text.to_string(),
        })
    }

    pub async fn move_cursor(&self, dx: i32, dy: i32) -> RemoteResult<()> {
        self.channel.send(BridgeRequest::Cursor { x: dx, y: dy })
    }

    pub async fn tap(&self) -> RemoteResult<()> {
        self.channel.send(BridgeRequest::Tap)
    }

    pub async fn scroll(&self, delta_y: i32) -> RemoteResult<()> {
        self.channel.send(BridgeRequest::Scroll { delta_y })
    }

    pub async fn launch_app(&self, package: &str) -> RemoteResult<()> {
        self.channel.send(BridgeRequest::Launch {
            package_name: package.to_string(),
        })
    }

    pub async fn power_off(&self) -> RemoteResult<()> {
        self.channel.send(BridgeRequest::PowerOff)
    }

    pub async fn get_apps(&self) -> RemoteResult<Vec<AppInfo>> {
        self.channel
            .request(BridgeRequest::GetApps, self.timeouts.apps, |response| match response {
                BridgeResponse::Apps { apps } => Some(apps.clone()),
                _ => None,
            })
            .await
    }

    pub async fn take_screenshot(&self) -> RemoteResult<Option<ScreenshotCapture>> {
        let start = Instant::now();
        let Some(data) = self.channel.screenshot(self.timeouts.screenshot).await? else {
            return Ok(None);
        };
        match STANDARD.decode(data.trim()) {
            Ok(bytes) if !bytes.is_empty() => Ok(Some(ScreenshotCapture::from_bytes(
                bytes,
                start.elapsed().as_millis(),
            ))),
            Ok(_) => Ok(None),
            Err(e) => {
                log::warn!("Bridge: screenshot payload is not valid base64: {e}");
                Ok(None)
            }
        }
    }

    pub async fn wake_on_lan(&self, mac: &MacAddress) -> RemoteResult<bool> {
        self.channel
            .wake_on_lan(mac.to_string(), self.timeouts.wake_on_lan)
            .await
    }

    pub async fn disconnect(&self) {
        if self.channel.is_open() {
            if let Err(e) = self.channel.send(BridgeRequest::Disconnect) {
                log::debug!("Bridge: disconnect not delivered: {e}");
            }
        }
        self.watcher.abort();
        self.channel.shutdown().await;
        *self.state.write().await = ConnectionState::Disconnected;
        log::info!("Bridge: disconnected from {}", self.device.id);
    }
}

impl Drop for BridgeTransport {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

// Mirror channel events into the connection state. After the relay comes back
// the device is re-attached, since a restarted relay has no adb session.
async fn watch_channel(
    device: Device,
    mut events: tokio::sync::broadcast::Receiver<BridgeEvent>,
    outbound: tokio::sync::mpsc::UnboundedSender<BridgeRequest>,
    state: Arc<RwLock<ConnectionState>>,
) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };
        match event {
            BridgeEvent::Closed { reason } => {
                let mut state = state.write().await;
                if !matches!(*state, ConnectionState::Failed { .. }) {
                    log::warn!("Bridge: lost relay for {}: {reason}", device.id);
                }
                *state = ConnectionState::Failed { reason };
            }
            BridgeEvent::Opened => {
                *state.write().await = ConnectionState::Connecting;
                let request = BridgeRequest::Connect {
                    device: device.clone(),
                };
                if outbound.send(request).is_err() {
                    break;
                }
            }
            BridgeEvent::Message(BridgeResponse::Connected { device: confirmed })
                if confirmed.id == device.id =>
            {
                *state.write().await = ConnectionState::Connected {
                    device: device.clone(),
                };
            }
            BridgeEvent::Message(BridgeResponse::Disconnected) => {
                *state.write().await = ConnectionState::Disconnected;
            }
            BridgeEvent::Message(_) => {}
        }
    }
}
