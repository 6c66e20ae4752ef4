// ADB module - transports that carry remote-control commands to an Android TV.
// Two strategies: a WebSocket relay that runs the adb CLI for us (bridge), and
// a direct ADB client over TCP (wire).

pub mod backend;
pub mod bridge;
pub mod codec;
pub mod error;
pub mod keycodes;
pub mod types;
pub mod wire;

#[cfg(test)]
pub(crate) mod tests;

// Re-export the main types and functions for easy access
pub use backend::{RemoteTransport, Transport};
pub use bridge::BridgeTransport;
pub use error::{RemoteError, RemoteResult};
pub use types::{AppInfo, ConnectionState, DEFAULT_ADB_PORT, Device, ScreenshotCapture, TransportKind};
pub use wire::WireTransport;
