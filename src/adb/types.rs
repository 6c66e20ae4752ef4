// Core device and transport types shared by the bridge and wire backends
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_ADB_PORT: u16 = 5555;

/// An Android TV device known to the registry.
///
/// `id` is always `ip:port`; it is the dedup key for the registry and the map
/// key for active connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    pub ip: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    // the relay echoes devices with snake_case keys
    #[serde(
        default,
        alias = "android_version",
        skip_serializing_if = "Option::is_none"
    )]
    pub android_version: Option<String>,
}

impl Device {
    pub fn new(ip: &str, port: u16, name: Option<&str>) -> Self {
        let name = match name.map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => format!("Android TV ({ip})"),
        };
        Self {
            id: Self::make_id(ip, port),
            name,
            ip: ip.to_string(),
            port,
            model: None,
            manufacturer: None,
            android_version: None,
        }
    }

    pub fn make_id(ip: &str, port: u16) -> String {
        format!("{ip}:{port}")
    }

    /// Socket address string used by the wire transport.
    pub fn address(&self) -> String {
        Self::make_id(&self.ip, self.port)
    }

    // The relay reports missing properties as empty strings
    pub(crate) fn normalized(mut self) -> Self {
        for field in [
            &mut self.model,
            &mut self.manufacturer,
            &mut self.android_version,
        ] {
            if field.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *field = None;
            }
        }
        if self.id.is_empty() {
            self.id = Self::make_id(&self.ip, self.port);
        }
        self
    }
}

/// Per-device connection state. Exactly one variant holds at any time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected { device: Device },
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected { device } => write!(f, "connected to {}", device.name),
            ConnectionState::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub package_name: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub is_system: bool,
}

impl AppInfo {
    /// Third-party app entry with a label guessed from the package name,
    /// e.g. `com.netflix.ninja_tv` -> `Ninja Tv`.
    pub fn from_package(package_name: &str) -> Self {
        let last = package_name.rsplit('.').next().unwrap_or(package_name);
        let label = last
            .replace('_', " ")
            .split_whitespace()
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => {
                        first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                    }
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            package_name: package_name.to_string(),
            label,
            icon: None,
            is_system: false,
        }
    }
}

// Screenshot result with metadata read from the image header
#[derive(Debug, Clone, Serialize)]
pub struct ScreenshotCapture {
    pub bytes: Vec<u8>,
    pub format: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_ms: u128,
}

impl ScreenshotCapture {
    pub fn from_bytes(bytes: Vec<u8>, duration_ms: u128) -> Self {
        let format = image::guess_format(&bytes)
            .ok()
            .map(|f| format!("{f:?}").to_lowercase());
        let dimensions = image::ImageReader::new(std::io::Cursor::new(&bytes))
            .with_guessed_format()
            .ok()
            .and_then(|reader| reader.into_dimensions().ok());
        Self {
            format,
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
            bytes,
            duration_ms,
        }
    }
}

/// Which transport strategy the connection manager builds for new devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Bridge,
    Wire,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Bridge => "bridge",
            TransportKind::Wire => "wire",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bridge" => Ok(TransportKind::Bridge),
            "wire" => Ok(TransportKind::Wire),
            other => Err(format!("unknown transport '{other}', expected 'bridge' or 'wire'")),
        }
    }
}
