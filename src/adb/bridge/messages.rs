// JSON messages exchanged with the relay: flat objects tagged by `type`.

use crate::adb::types::{AppInfo, Device};
use serde::{Deserialize, Serialize};

/// Messages the controller sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeRequest {
    Scan,
    Connect {
        device: Device,
    },
    Disconnect,
    Key {
        #[serde(rename = "keyCode")]
        key_code: String,
    },
    Text {
        text: String,
    },
    Cursor {
        x: i32,
        y: i32,
    },
    Tap,
    Scroll {
        #[serde(rename = "deltaY")]
        delta_y: i32,
    },
    GetApps,
    Launch {
        #[serde(rename = "packageName")]
        package_name: String,
    },
    PowerOff,
    Screenshot,
    WakeOnLan {
        #[serde(rename = "macAddress")]
        mac_address: String,
    },
}

impl BridgeRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeRequest::Scan => "scan",
            BridgeRequest::Connect { .. } => "connect",
            BridgeRequest::Disconnect => "disconnect",
            BridgeRequest::Key { .. } => "key",
            BridgeRequest::Text { .. } => "text",
            BridgeRequest::Cursor { .. } => "cursor",
            BridgeRequest::Tap => "tap",
            BridgeRequest::Scroll { .. } => "scroll",
            BridgeRequest::GetApps => "get_apps",
            BridgeRequest::Launch { .. } => "launch",
            BridgeRequest::PowerOff => "power_off",
            BridgeRequest::Screenshot => "screenshot",
            BridgeRequest::WakeOnLan { .. } => "wake_on_lan",
        }
    }
}

/// Messages the relay sends back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeResponse {
    ScanResult {
        #[serde(default)]
        devices: Vec<Device>,
    },
    Connected {
        device: Device,
    },
    Disconnected,
    Apps {
        #[serde(default)]
        apps: Vec<AppInfo>,
    },
    Screenshot {
        success: bool,
        #[serde(default)]
        data: Option<String>,
    },
    WolSent {
        success: bool,
    },
    Error {
        message: String,
    },

    // Acknowledgements for fire-and-forget commands
    KeySent {
        #[serde(default)]
        success: bool,
    },
    TextSent {
        #[serde(default)]
        success: bool,
    },
    CursorMoved,
    Tapped,
    Scrolled,
    Launched {
        #[serde(default)]
        success: bool,
    },
    PoweredOff {
        #[serde(default)]
        success: bool,
    },

    #[serde(other)]
    Unknown,
}

impl BridgeResponse {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
