use crate::adb::TransportKind;
use crate::config::{BridgeEndpoint, DEFAULT_BRIDGE_HOST, DEFAULT_BRIDGE_PORT, RemoteConfig, default_state_path};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Android TV remote over ADB.
///
/// Commands go either through a WebSocket relay that runs `adb` for us
/// (`--transport bridge`) or straight to the TV's ADB port (`--transport wire`).
#[derive(Debug, Parser)]
#[command(name = "android-tv-remote", version, about)]
pub struct Args {
    /// How to reach the TV.
    #[arg(long, global = true, default_value = "bridge", env = "ADB_TRANSPORT")]
    pub transport: TransportKind,

    /// Relay host; overrides the saved endpoint.
    #[arg(long, global = true, env = "ADB_BRIDGE_HOST")]
    pub bridge_host: Option<String>,

    /// Relay port; overrides the saved endpoint.
    #[arg(long, global = true, env = "ADB_BRIDGE_PORT")]
    pub bridge_port: Option<u16>,

    /// State file with saved devices [default: ~/.android-tv-remote/state.json]
    #[arg(long, global = true, env = "ADB_REMOTE_STATE")]
    pub state: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List saved devices
    Devices,
    /// Save a device by IP address
    Add {
        ip: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Forget a saved device
    Remove { id: String },
    /// Ask the relay to scan the local network for TVs
    Scan,
    /// Send a key, e.g. KEYCODE_HOME, HOME or 3
    Key { id: String, code: String },
    /// Type text into the focused field
    Text { id: String, text: String },
    /// Move the pointer by a relative offset
    Cursor {
        id: String,
        #[arg(allow_hyphen_values = true)]
        dx: i32,
        #[arg(allow_hyphen_values = true)]
        dy: i32,
    },
    /// Tap the centre of the screen
    Tap { id: String },
    /// Scroll; positive scrolls down
    Scroll {
        id: String,
        #[arg(allow_hyphen_values = true)]
        delta: i32,
    },
    /// List installed third-party apps
    Apps { id: String },
    /// Launch an app by package name
    Launch { id: String, package: String },
    /// Send the power key
    PowerOff { id: String },
    /// Save a screenshot
    Screenshot {
        id: String,
        #[arg(long, short, default_value = "tv-screenshot.png")]
        output: PathBuf,
    },
    /// Send a Wake-on-LAN packet (uses the saved MAC when --mac is omitted)
    Wake {
        #[arg(long)]
        mac: Option<String>,
        /// Route through this device's active transport
        #[arg(long)]
        via: Option<String>,
    },
    /// Remember the TV's MAC address for Wake-on-LAN
    SaveMac { mac: String },
    /// Remember a relay endpoint for later sessions
    SetBridge { host: String, port: u16 },
}

impl Command {
    /// Device id for commands that need a live connection.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Command::Key { id, .. }
            | Command::Text { id, .. }
            | Command::Cursor { id, .. }
            | Command::Tap { id }
            | Command::Scroll { id, .. }
            | Command::Apps { id }
            | Command::Launch { id, .. }
            | Command::PowerOff { id }
            | Command::Screenshot { id, .. } => Some(id.as_str()),
            Command::Wake { via, .. } => via.as_deref(),
            _ => None,
        }
    }
}

impl Args {
    /// Bridge endpoint given on the command line or environment, if any.
    pub fn bridge_endpoint(&self) -> Option<BridgeEndpoint> {
        if self.bridge_host.is_none() && self.bridge_port.is_none() {
            return None;
        }
        Some(BridgeEndpoint::new(
            self.bridge_host
                .clone()
                .unwrap_or_else(|| DEFAULT_BRIDGE_HOST.to_string()),
            self.bridge_port.unwrap_or(DEFAULT_BRIDGE_PORT),
        ))
    }

    pub fn to_config(&self) -> RemoteConfig {
        RemoteConfig {
            transport: self.transport,
            bridge: self.bridge_endpoint(),
            state_path: self.state.clone().unwrap_or_else(default_state_path),
            ..RemoteConfig::default()
        }
    }
}
