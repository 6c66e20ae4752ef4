use super::bridge::BridgeTransport;
use super::error::RemoteResult;
use super::types::{AppInfo, ConnectionState, Device, ScreenshotCapture, TransportKind};
use super::wire::WireTransport;
use crate::config::{BridgeEndpoint, Timeouts};
use crate::wol::MacAddress;

/// Operations every transport strategy supports for one connected device.
#[allow(async_fn_in_trait)]
pub trait RemoteTransport {
    fn kind(&self) -> TransportKind;
    fn device(&self) -> &Device;
    async fn state(&self) -> ConnectionState;

    async fn send_key(&self, code: &str) -> RemoteResult<()>;
    async fn send_text(&self, text: &str) -> RemoteResult<()>;
    async fn move_cursor(&self, dx: i32, dy: i32) -> RemoteResult<()>;
    /// Tap the centre of the screen.
    async fn tap(&self) -> RemoteResult<()>;
    async fn scroll(&self, delta_y: i32) -> RemoteResult<()>;
    async fn get_apps(&self) -> RemoteResult<Vec<AppInfo>>;
    async fn launch_app(&self, package: &str) -> RemoteResult<()>;
    async fn power_off(&self) -> RemoteResult<()>;
    async fn take_screenshot(&self) -> RemoteResult<Option<ScreenshotCapture>>;
    async fn wake_on_lan(&self, mac: &MacAddress) -> RemoteResult<bool>;
    async fn disconnect(&self);
}

impl RemoteTransport for WireTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Wire
    }

    fn device(&self) -> &Device {
        self.device()
    }

    async fn state(&self) -> ConnectionState {
        self.state().await
    }

    async fn send_key(&self, code: &str) -> RemoteResult<()> {
        self.send_key(code).await
    }

    async fn send_text(&self, text: &str) -> RemoteResult<()> {
        self.send_text(text).await
    }

    async fn move_cursor(&self, dx: i32, dy: i32) -> RemoteResult<()> {
        self.move_cursor(dx, dy).await
    }

    async fn tap(&self) -> RemoteResult<()> {
        self.tap_center().await
    }

    async fn scroll(&self, delta_y: i32) -> RemoteResult<()> {
        self.scroll(delta_y).await
    }

    async fn get_apps(&self) -> RemoteResult<Vec<AppInfo>> {
        self.get_apps().await
    }

    async fn launch_app(&self, package: &str) -> RemoteResult<()> {
        self.launch_app(package).await
    }

    async fn power_off(&self) -> RemoteResult<()> {
        self.power_off().await
    }

    async fn take_screenshot(&self) -> RemoteResult<Option<ScreenshotCapture>> {
        self.take_screenshot().await
    }

    async fn wake_on_lan(&self, mac: &MacAddress) -> RemoteResult<bool> {
        self.wake_on_lan(mac).await
    }

    async fn disconnect(&self) {
        self.disconnect().await
    }
}

impl RemoteTransport for BridgeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Bridge
    }

    fn device(&self) -> &Device {
        self.device()
    }

    async fn state(&self) -> ConnectionState {
        self.state().await
    }

    async fn send_key(&self, code: &str) -> RemoteResult<()> {
        self.send_key(code).await
    }

    async fn send_text(&self, text: &str) -> RemoteResult<()> {
        self.send_text(text).await
    }

    async fn move_cursor(&self, dx: i32, dy: i32) -> RemoteResult<()> {
        self.move_cursor(dx, dy).await
    }

    async fn tap(&self) -> RemoteResult<()> {
        self.tap().await
    }

    async fn scroll(&self, delta_y: i32) -> RemoteResult<()> {
        self.scroll(delta_y).await
    }

    async fn get_apps(&self) -> RemoteResult<Vec<AppInfo>> {
        self.get_apps().await
    }

    async fn launch_app(&self, package: &str) -> RemoteResult<()> {
        self.launch_app(package).await
    }

    async fn power_off(&self) -> RemoteResult<()> {
        self.power_off().await
    }

    async fn take_screenshot(&self) -> RemoteResult<Option<ScreenshotCapture>> {
        self.take_screenshot().await
    }

    async fn wake_on_lan(&self, mac: &MacAddress) -> RemoteResult<bool> {
        self.wake_on_lan(mac).await
    }

    async fn disconnect(&self) {
        self.disconnect().await
    }
}

/// The transport strategy chosen for a device connection.
pub enum Transport {
    Bridge(BridgeTransport),
    Wire(WireTransport),
}

impl Transport {
    pub async fn connect(
        kind: TransportKind,
        device: Device,
        endpoint: &BridgeEndpoint,
        timeouts: Timeouts,
    ) -> RemoteResult<Self> {
        match kind {
            TransportKind::Bridge => Ok(Transport::Bridge(
                BridgeTransport::connect(device, endpoint, timeouts).await?,
            )),
            TransportKind::Wire => Ok(Transport::Wire(WireTransport::connect(device, timeouts).await?)),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Bridge(_) => TransportKind::Bridge,
            Transport::Wire(_) => TransportKind::Wire,
        }
    }

    pub fn device(&self) -> &Device {
        match self {
            Transport::Bridge(b) => b.device(),
            Transport::Wire(w) => w.device(),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        match self {
            Transport::Bridge(b) => b.state().await,
            Transport::Wire(w) => w.state().await,
        }
    }

    pub async fn send_key(&self, code: &str) -> RemoteResult<()> {
        match self {
            Transport::Bridge(b) => b.send_key(code).await,
            Transport::Wire(w) => w.send_key(code).await,
        }
    }

    pub async fn send_text(&self, text: &str) -> RemoteResult<()> {
        match self {
            Transport::Bridge(b) => b.send_text(text).await,
            Transport::Wire(w) => w.send_text(text).await,
        }
    }

    pub async fn move_cursor(&self, dx: i32, dy: i32) -> RemoteResult<()> {
        match self {
            Transport::Bridge(b) => b.move_cursor(dx, dy).await,
            Transport::Wire(w) => w.move_cursor(dx, dy).await,
        }
    }

    pub async fn tap(&self) -> RemoteResult<()> {
        match self {
            Transport::Bridge(b) => b.tap().await,
            Transport::Wire(w) => w.tap_center().await,
        }
    }

    pub async fn scroll(&self, delta_y: i32) -> RemoteResult<()> {
        match self {
            Transport::Bridge(b) => b.scroll(delta_y).await,
            Transport::Wire(w) => w.scroll(delta_y).await,
        }
    }

    pub async fn get_apps(&self) -> RemoteResult<Vec<AppInfo>> {
        match self {
            Transport::Bridge(b) => b.get_apps().await,
            Transport::Wire(w) => w.get_apps().await,
        }
    }

    pub async fn launch_app(&self, package: &str) -> RemoteResult<()> {
        match self {
            Transport::Bridge(b) => b.launch_app(package).await,
            Transport::Wire(w) => w.launch_app(package).await,
        }
    }

    pub async fn power_off(&self) -> RemoteResult<()> {
        match self {
            Transport::Bridge(b) => b.power_off().await,
            Transport::Wire(w) => w.power_off().await,
        }
    }

    pub async fn take_screenshot(&self) -> RemoteResult<Option<ScreenshotCapture>> {
        match self {
            Transport::Bridge(b) => b.take_screenshot().await,
            Transport::Wire(w) => w.take_screenshot().await,
        }
    }

    pub async fn wake_on_lan(&self, mac: &MacAddress) -> RemoteResult<bool> {
        match self {
            Transport::Bridge(b) => b.wake_on_lan(mac).await,
            Transport::Wire(w) => w.wake_on_lan(mac).await,
        }
    }

    pub async fn disconnect(&self) {
        match self {
            Transport::Bridge(b) => b.disconnect().await,
            Transport::Wire(w) => w.disconnect().await,
        }
    }
}

impl RemoteTransport for Transport {
    fn kind(&self) -> TransportKind {
        self.kind()
    }

    fn device(&self) -> &Device {
        self.device()
    }

    async fn state(&self) -> ConnectionState {
        self.state().await
    }

    async fn send_key(&self, code: &str) -> RemoteResult<()> {
        self.send_key(code).await
    }

    async fn send_text(&self, text: &str) -> RemoteResult<()> {
        self.send_text(text).await
    }

    async fn move_cursor(&self, dx: i32, dy: i32) -> RemoteResult<()> {
        self.move_cursor(dx, dy).await
    }

    async fn tap(&self) -> RemoteResult<()> {
        self.tap().await
    }

    async fn scroll(&self, delta_y: i32) -> RemoteResult<()> {
        self.scroll(delta_y).await
    }

    async fn get_apps(&self) -> RemoteResult<Vec<AppInfo>> {
        self.get_apps().await
    }

    async fn launch_app(&self, package: &str) -> RemoteResult<()> {
        self.launch_app(package).await
    }

    async fn power_off(&self) -> RemoteResult<()> {
        self.power_off().await
    }

    async fn take_screenshot(&self) -> RemoteResult<Option<ScreenshotCapture>> {
        self.take_screenshot().await
    }

    async fn wake_on_lan(&self, mac: &MacAddress) -> RemoteResult<bool> {
        self.wake_on_lan(mac).await
    }

    async fn disconnect(&self) {
        self.disconnect().await
    }
}
