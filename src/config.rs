// Runtime configuration: transport selection, bridge endpoint and timeouts
use crate::adb::TransportKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BRIDGE_HOST: &str = "127.0.0.1";
pub const DEFAULT_BRIDGE_PORT: u16 = 8765;
const STATE_DIR: &str = ".android-tv-remote";
const STATE_FILE: &str = "state.json";

/// Host/port of the relay process the bridge transport talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeEndpoint {
    pub host: String,
    pub port: u16,
}

impl Default for BridgeEndpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_BRIDGE_HOST.to_string(),
            port: DEFAULT_BRIDGE_PORT,
        }
    }
}

impl BridgeEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for BridgeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    pub screenshot: Duration,
    pub wake_on_lan: Duration,
    pub reconnect_delay: Duration,
    /// Single-frame reads on the wire transport.
    pub wire_read: Duration,
    pub connect: Duration,
    /// Round trip for the relay's own `adb connect`.
    pub relay_connect: Duration,
    pub scan: Duration,
    pub apps: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            screenshot: Duration::from_secs(10),
            wake_on_lan: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(3),
            wire_read: Duration::from_secs(2),
            connect: Duration::from_secs(5),
            relay_connect: Duration::from_secs(15),
            scan: Duration::from_secs(60),
            apps: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub transport: TransportKind,
    /// Explicit endpoint; when `None` the persisted override or the default is used.
    pub bridge: Option<BridgeEndpoint>,
    pub state_path: PathBuf,
    pub timeouts: Timeouts,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            bridge: None,
            state_path: default_state_path(),
            timeouts: Timeouts::default(),
        }
    }
}

/// `~/.android-tv-remote/state.json`, or the working directory when no home
/// directory can be determined.
pub fn default_state_path() -> PathBuf {
    homedir::my_home()
        .ok()
        .flatten()
        .map(|home| home.join(STATE_DIR).join(STATE_FILE))
        .unwrap_or_else(|| PathBuf::from(STATE_DIR).join(STATE_FILE))
}
