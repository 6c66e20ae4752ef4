// Direct ADB client over TCP (no adb server or relay process required)
use super::codec::{self, A_CLSE, A_OKAY, A_WRTE, AdbFrame, CodecError, HandshakeState};
use super::error::{RemoteError, RemoteResult};
use super::keycodes::resolve_keycode;
use super::types::{AppInfo, ConnectionState, Device, ScreenshotCapture};
use crate::config::Timeouts;
use crate::wol::{self, MacAddress};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};

// Reference point used for relative pointer moves and scrolls (1080p portrait)
const CURSOR_ORIGIN: (i32, i32) = (500, 500);
const CENTER: (u32, u32) = (540, 960);
const CURSOR_SWIPE_MS: u32 = 50;
const SCROLL_DISTANCE: i32 = 200;
const SCROLL_SWIPE_MS: u32 = 100;

pub struct WireTransport {
    device: Device,
    stream: Mutex<Option<TcpStream>>,
    next_local_id: AtomicU32,
    state: RwLock<ConnectionState>,
    handshake: HandshakeState,
    timeouts: Timeouts,
}

/// Android package names: dot-separated letters, digits and underscores.
pub fn validate_package(package: &str) -> RemoteResult<&str> {
    let valid = !package.is_empty()
        && package
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(package)
    } else {
        Err(RemoteError::InvalidArgument {
            what: "package name",
            value: package.to_string(),
        })
    }
}

/// Escape text for `input text "<...>"`: backslash-prefix shell metacharacters
/// and encode spaces as `%s`.
pub fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '\\' | '"' | '$' | '`' => {
                escaped.push('\\');
                escaped.push(c);
            }
            ' ' => escaped.push_str("%s"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Extract package names from `pm list packages` output.
pub fn parse_packages(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .map(|pkg| pkg.trim().to_string())
        .filter(|pkg| !pkg.is_empty())
        .collect()
}

impl WireTransport {
    /// Open the socket and perform the CNXN handshake.
    pub async fn connect(device: Device, timeouts: Timeouts) -> RemoteResult<Self> {
        let address = device.address();
        log::info!("Wire: connecting to {address}");

        let mut stream = match tokio::time::timeout(timeouts.connect, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(RemoteError::connect_failure(&device.id, e)),
            Err(_) => {
                return Err(RemoteError::connect_failure(
                    &device.id,
                    format!("TCP connect timed out after {:?}", timeouts.connect),
                ));
            }
        };
        stream.set_nodelay(true).ok();

        let mut handshake = HandshakeState::default();
        let cnxn = handshake.start();
        codec::write_frame(&mut stream, &cnxn)
            .await
            .map_err(|e| RemoteError::connect_failure(&device.id, e))?;

        let reply = match tokio::time::timeout(timeouts.connect, codec::read_frame(&mut stream)).await {
            Ok(Ok(Ok(frame))) => frame,
            Ok(Ok(Err(e))) => return Err(RemoteError::connect_failure(&device.id, e)),
            Ok(Err(e)) => return Err(RemoteError::connect_failure(&device.id, e)),
            Err(_) => {
                return Err(RemoteError::connect_failure(
                    &device.id,
                    "no handshake response from device",
                ));
            }
        };
        handshake
            .on_frame(&reply)
            .map_err(|e| RemoteError::connect_failure(&device.id, e))?;

        if let HandshakeState::Established {
            banner,
            auth_requested,
            ..
        } = &handshake
        {
            if *auth_requested {
                log::warn!(
                    "Wire: {address} answered with an AUTH challenge; key authorization is not performed, shell commands may be refused"
                );
            } else {
                log::debug!("Wire: {address} banner '{banner}'");
            }
        }
        log::info!("Wire: connected to {} ({address})", device.name);

        Ok(Self {
            state: RwLock::new(ConnectionState::Connected {
                device: device.clone(),
            }),
            device,
            stream: Mutex::new(Some(stream)),
            next_local_id: AtomicU32::new(1),
            handshake,
            timeouts,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn handshake(&self) -> &HandshakeState {
        &self.handshake
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    async fn mark_failed(&self, reason: String) {
        log::warn!("Wire: {} failed: {reason}", self.device.id);
        *self.state.write().await = ConnectionState::Failed { reason };
    }

    fn allocate_local_id(&self) -> u32 {
        self.next_local_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Run one shell command: OPEN a stream and treat the payload of the next
    /// frame as the complete output. A read timeout yields empty output.
    pub async fn shell(&self, command: &str) -> RemoteResult<String> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| RemoteError::unavailable(format!("{} socket closed", self.device.id)))?;

        let local_id = self.allocate_local_id();
        log::debug!("Wire: [{local_id}] shell:{command}");
        if let Err(e) = codec::write_frame(stream, &AdbFrame::open_shell(local_id, command)).await {
            drop(guard);
            self.mark_failed(e.to_string()).await;
            return Err(e.into());
        }

        match tokio::time::timeout(self.timeouts.wire_read, codec::read_frame(stream)).await {
            Ok(Ok(Ok(frame))) => {
                log::debug!("Wire: [{local_id}] <- {} ({} bytes)", frame.name(), frame.payload.len());
                Ok(frame.payload_text())
            }
            Ok(Ok(Err(e))) => {
                drop(guard);
                self.mark_failed(e.to_string()).await;
                Err(e.into())
            }
            Ok(Err(e)) => {
                drop(guard);
                self.mark_failed(e.to_string()).await;
                Err(e.into())
            }
            Err(_) => {
                log::warn!(
                    "Wire: '{command}' got no response within {:?}",
                    self.timeouts.wire_read
                );
                Ok(String::new())
            }
        }
    }

    /// Open a service stream and collect WRTE payloads until the device
    /// closes it. Returns `None` when the window elapses first.
    async fn collect_stream(&self, service: &str, window: Duration) -> RemoteResult<Option<Vec<u8>>> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| RemoteError::unavailable(format!("{} socket closed", self.device.id)))?;
        let local_id = self.allocate_local_id();
        if let Err(e) = codec::write_frame(stream, &AdbFrame::open(local_id, service)).await {
            drop(guard);
            self.mark_failed(e.to_string()).await;
            return Err(e.into());
        }

        let collect = async {
            let mut data = Vec::new();
            loop {
                let frame = codec::read_frame(stream).await??;
                if frame.arg1 != local_id {
                    log::debug!("Wire: ignoring {} for stream {}", frame.name(), frame.arg1);
                    continue;
                }
                match frame.command {
                    A_WRTE => {
                        data.extend_from_slice(&frame.payload);
                        codec::write_frame(stream, &AdbFrame::okay(local_id, frame.arg0)).await?;
                    }
                    A_OKAY => {}
                    A_CLSE => {
                        codec::write_frame(stream, &AdbFrame::new(A_CLSE, local_id, frame.arg0, Vec::new()))
                            .await?;
                        return Ok::<_, RemoteError>(data);
                    }
                    _ => {
                        return Err(CodecError::UnexpectedFrame {
                            received: frame.name(),
                            state: format!("reading {service}"),
                        }
                        .into());
                    }
                }
            }
        };

        match tokio::time::timeout(window, collect).await {
            Ok(Ok(data)) => Ok(Some(data)),
            Ok(Err(e)) => {
                drop(guard);
                if e.is_connection_lost() {
                    self.mark_failed(e.to_string()).await;
                }
                Err(e)
            }
            Err(_) => {
                log::warn!("Wire: {service} did not finish within {window:?}");
                Ok(None)
            }
        }
    }

    pub async fn send_key(&self, code: &str) -> RemoteResult<()> {
        self.shell(&format!("input keyevent {}", resolve_keycode(code)?))
            .await
            .map(drop)
    }

    pub async fn send_text(&self, text: &str) -> RemoteResult<()> {
        self.shell(&format!("input text \"{}\"", escape_text(text)))
            .await
            .map(drop)
    }

    pub async fn tap(&self, x: u32, y: u32) -> RemoteResult<()> {
        self.shell(&format!("input tap {x} {y}")).await.map(drop)
    }

    pub async fn tap_center(&self) -> RemoteResult<()> {
        self.tap(CENTER.0, CENTER.1).await
    }

    pub async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) -> RemoteResult<()> {
        self.shell(&format!("input swipe {x1} {y1} {x2} {y2} {duration_ms}"))
            .await
            .map(drop)
    }

    pub async fn move_cursor(&self, dx: i32, dy: i32) -> RemoteResult<()> {
        let (x, y) = CURSOR_ORIGIN;
        self.swipe(x, y, x.saturating_add(dx), y.saturating_add(dy), CURSOR_SWIPE_MS)
            .await
    }

    pub async fn scroll(&self, delta_y: i32) -> RemoteResult<()> {
        let direction = if delta_y > 0 { 1 } else { -1 };
        let (x, y) = (CENTER.0 as i32, CENTER.1 as i32);
        self.swipe(x, y, x, y - direction * SCROLL_DISTANCE, SCROLL_SWIPE_MS)
            .await
    }

    pub async fn launch_app(&self, package: &str) -> RemoteResult<()> {
        let package = validate_package(package)?;
        self.shell(&format!(
            "monkey -p {package} -c android.intent.category.LAUNCHER 1"
        ))
        .await
        .map(drop)
    }

    pub async fn power_off(&self) -> RemoteResult<()> {
        self.send_key("KEYCODE_POWER").await
    }

    pub async fn get_packages(&self) -> RemoteResult<Vec<String>> {
        let output = self.shell("pm list packages -3").await?;
        Ok(parse_packages(&output))
    }

    pub async fn get_apps(&self) -> RemoteResult<Vec<AppInfo>> {
        Ok(self
            .get_packages()
            .await?
            .iter()
            .map(|pkg| AppInfo::from_package(pkg))
            .collect())
    }

    pub async fn take_screenshot(&self) -> RemoteResult<Option<ScreenshotCapture>> {
        let start = Instant::now();
        let bytes = self
            .collect_stream("exec:screencap -p", self.timeouts.screenshot)
            .await?;
        Ok(bytes
            .filter(|b| !b.is_empty())
            .map(|b| ScreenshotCapture::from_bytes(b, start.elapsed().as_millis())))
    }

    /// The device is reachable over TCP, so the magic packet goes out locally.
    pub async fn wake_on_lan(&self, mac: &MacAddress) -> RemoteResult<bool> {
        wol::send_magic_packet(mac).await?;
        Ok(true)
    }

    pub async fn disconnect(&self) {
        if let Some(stream) = self.stream.lock().await.take() {
            drop(stream);
            log::info!("Wire: disconnected from {}", self.device.id);
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }
}
