// WebSocket channel to the relay, run as an actor task that owns the socket.
// Reconnects after a fixed delay until shut down.

use super::messages::{BridgeRequest, BridgeResponse};
use super::pending::PendingSlot;
use crate::adb::error::{RemoteError, RemoteResult};
use crate::config::{BridgeEndpoint, Timeouts};
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const EVENT_CAPACITY: usize = 64;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Opened,
    Closed { reason: String },
    Message(BridgeResponse),
}

// State shared between the handle and the actor task
struct Shared {
    url: String,
    open: watch::Sender<bool>,
    last_error: Mutex<Option<String>>,
    events: broadcast::Sender<BridgeEvent>,
    screenshot: PendingSlot<Option<String>>,
    wake: PendingSlot<bool>,
    reconnect: Notify,
}

impl Shared {
    fn set_error(&self, message: Option<String>) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = message;
    }

    fn publish(&self, event: BridgeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn fail_pending(&self) {
        if self.screenshot.fail() {
            log::debug!("Bridge: failed pending screenshot");
        }
        if self.wake.fail() {
            log::debug!("Bridge: failed pending wake_on_lan");
        }
    }

    fn handle_inbound(&self, text: &str) {
        let response = match BridgeResponse::parse(text) {
            Ok(response) => response,
            Err(e) => {
                let err = RemoteError::MalformedMessage {
                    description: e.to_string(),
                };
                log::warn!("Bridge: discarding inbound message: {err}");
                return;
            }
        };

        match &response {
            BridgeResponse::Screenshot { success, data } => {
                let payload = if *success { data.clone() } else { None };
                if !self.screenshot.resolve(payload) {
                    log::debug!("Bridge: discarding screenshot response with no waiting request");
                }
            }
            BridgeResponse::WolSent { success } => {
                if !self.wake.resolve(*success) {
                    log::debug!("Bridge: discarding wol_sent response with no waiting request");
                }
            }
            BridgeResponse::Error { message } => {
                log::warn!("Bridge: relay error: {message}");
                self.set_error(Some(message.clone()));
                self.fail_pending();
            }
            BridgeResponse::Unknown => {
                log::debug!("Bridge: ignoring message of unknown type: {text}");
            }
            other => log::debug!("Bridge: <- {other:?}"),
        }
        self.publish(BridgeEvent::Message(response));
    }
}

pub struct BridgeChannel {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<BridgeRequest>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeChannel {
    /// Spawn the actor; it starts connecting immediately.
    pub fn start(endpoint: &BridgeEndpoint, timeouts: &Timeouts) -> Self {
        let (open, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            url: endpoint.url(),
            open,
            last_error: Mutex::new(None),
            events,
            screenshot: PendingSlot::new("screenshot"),
            wake: PendingSlot::new("wake_on_lan"),
            reconnect: Notify::new(),
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run(
            shared.clone(),
            outbound_rx,
            shutdown_rx,
            timeouts.connect,
            timeouts.reconnect_delay,
        ));

        Self {
            shared,
            outbound,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn is_open(&self) -> bool {
        *self.shared.open.borrow()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.shared.events.subscribe()
    }

    pub async fn wait_open(&self, window: Duration) -> RemoteResult<()> {
        let mut open = self.shared.open.subscribe();
        match tokio::time::timeout(window, open.wait_for(|is_open| *is_open)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(RemoteError::unavailable("bridge channel stopped")),
            Err(_) => Err(RemoteError::unavailable(format!(
                "could not reach relay at {} within {window:?}{}",
                self.shared.url,
                self.last_error()
                    .map(|e| format!(" ({e})"))
                    .unwrap_or_default()
            ))),
        }
    }

    /// Queue a request for the relay. When the channel is not open the
    /// request is dropped and the failure recorded as the last error.
    pub fn send(&self, request: BridgeRequest) -> RemoteResult<()> {
        if !self.is_open() {
            let err = RemoteError::unavailable(format!(
                "bridge channel to {} is not open, '{}' not sent",
                self.shared.url,
                request.kind()
            ));
            self.shared.set_error(Some(err.to_string()));
            return Err(err);
        }
        log::debug!("Bridge: -> {}", request.kind());
        self.outbound
            .send(request)
            .map_err(|_| RemoteError::unavailable("bridge channel task has stopped"))
    }

    /// Send a request and wait for the first inbound message `accept` maps to
    /// a result. A relay `error` message ends the wait with [`RemoteError::Relay`].
    pub async fn request<T>(
        &self,
        request: BridgeRequest,
        window: Duration,
        accept: impl Fn(&BridgeResponse) -> Option<T>,
    ) -> RemoteResult<T> {
        let operation = request.kind();
        let mut events = self.subscribe();
        self.send(request)?;

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(BridgeEvent::Message(BridgeResponse::Error { message })) => {
                        return Err(RemoteError::Relay { message });
                    }
                    Ok(BridgeEvent::Message(response)) => {
                        if let Some(value) = accept(&response) {
                            return Ok(value);
                        }
                    }
                    Ok(BridgeEvent::Closed { reason }) => {
                        return Err(RemoteError::unavailable(format!(
                            "bridge channel closed during {operation}: {reason}"
                        )));
                    }
                    Ok(BridgeEvent::Opened) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Bridge: {operation} waiter skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(RemoteError::unavailable("bridge channel task has stopped"));
                    }
                }
            }
        };

        tokio::time::timeout(window, wait)
            .await
            .map_err(|_| RemoteError::ProtocolTimeout {
                operation: operation.to_string(),
                duration: window,
            })?
    }

    /// Request a screenshot; `Ok(None)` when the relay reports failure, the
    /// window elapses, or the relay errors out first.
    pub async fn screenshot(&self, window: Duration) -> RemoteResult<Option<String>> {
        let ticket = self.shared.screenshot.begin()?;
        if let Err(e) = self.send(BridgeRequest::Screenshot) {
            self.shared.screenshot.fail();
            return Err(e);
        }
        Ok(self.shared.screenshot.wait(ticket, window).await.flatten())
    }

    pub async fn wake_on_lan(&self, mac_address: String, window: Duration) -> RemoteResult<bool> {
        let ticket = self.shared.wake.begin()?;
        if let Err(e) = self.send(BridgeRequest::WakeOnLan { mac_address }) {
            self.shared.wake.fail();
            return Err(e);
        }
        Ok(self.shared.wake.wait(ticket, window).await.unwrap_or(false))
    }

    /// Retry now instead of waiting out the reconnect delay. Ignored while
    /// the channel is open.
    pub fn reconnect(&self) {
        self.shared.reconnect.notify_one();
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<BridgeRequest> {
        self.outbound.clone()
    }

    /// Stop the reconnect loop and close the socket.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut task) = task {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Bridge: channel task ended abnormally: {e}"),
                Err(_) => {
                    log::warn!("Bridge: channel task did not stop within {SHUTDOWN_GRACE:?}, aborting");
                    task.abort();
                }
            }
        }
        self.shared.fail_pending();
    }
}

impl Drop for BridgeChannel {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn run(
    shared: Arc<Shared>,
    mut outbound_rx: mpsc::UnboundedReceiver<BridgeRequest>,
    mut shutdown_rx: watch::Receiver<bool>,
    connect_window: Duration,
    reconnect_delay: Duration,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // A relay that accepts TCP but never answers the upgrade must not stall teardown
        let attempt = tokio::select! {
            attempt = tokio::time::timeout(connect_window, connect_async(shared.url.as_str())) => attempt,
            _ = shutdown_rx.changed() => break,
        };
        match attempt {
            Ok(Ok((ws, _))) => {
                log::info!("Bridge: connected to relay at {}", shared.url);
                shared.set_error(None);
                shared.open.send_replace(true);
                shared.publish(BridgeEvent::Opened);

                let reason = pump(&shared, ws, &mut outbound_rx, &mut shutdown_rx).await;

                shared.open.send_replace(false);
                shared.fail_pending();
                // Anything queued while closing is dropped, not replayed after reconnect
                let mut dropped = 0;
                while outbound_rx.try_recv().is_ok() {
                    dropped += 1;
                }
                if dropped > 0 {
                    log::warn!("Bridge: dropped {dropped} unsent commands");
                }
                log::info!("Bridge: channel to {} closed: {reason}", shared.url);
                shared.publish(BridgeEvent::Closed { reason });
            }
            Ok(Err(e)) => {
                log::warn!("Bridge: cannot reach relay at {}: {e}", shared.url);
                shared.set_error(Some(e.to_string()));
                shared.publish(BridgeEvent::Closed {
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                let reason = format!("no WebSocket handshake within {connect_window:?}");
                log::warn!("Bridge: cannot reach relay at {}: {reason}", shared.url);
                shared.set_error(Some(reason.clone()));
                shared.publish(BridgeEvent::Closed { reason });
            }
        }

        if *shutdown_rx.borrow() {
            break;
        }
        log::debug!("Bridge: reconnecting in {reconnect_delay:?}");
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = shared.reconnect.notified() => log::debug!("Bridge: reconnect requested"),
            _ = shutdown_rx.changed() => {}
        }
    }
    log::debug!("Bridge: channel task for {} stopped", shared.url);
}

// Shuttle messages until the socket closes or shutdown is requested
async fn pump(
    shared: &Shared,
    ws: WsStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<BridgeRequest>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> String {
    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    // Deliver what was queued before the shutdown, e.g. a final `disconnect`
                    while let Ok(request) = outbound_rx.try_recv() {
                        if let Ok(text) = serde_json::to_string(&request) {
                            let _ = write.send(Message::Text(text)).await;
                        }
                    }
                    let _ = write.send(Message::Close(None)).await;
                    return "shut down".to_string();
                }
            }
            _ = shared.reconnect.notified() => {
                log::debug!("Bridge: channel already open, skipping reconnect");
            }
            Some(request) = outbound_rx.recv() => {
                let text = match serde_json::to_string(&request) {
                    Ok(text) => text,
                    Err(e) => {
                        log::error!("Bridge: cannot encode {}: {e}", request.kind());
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    return format!("send failed: {e}");
                }
            }
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => shared.handle_inbound(&text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => shared.handle_inbound(&text),
                    Err(_) => log::warn!("Bridge: discarding non-UTF-8 binary message"),
                },
                Some(Ok(Message::Close(frame))) => {
                    return frame
                        .map(|f| format!("closed by relay: {}", f.reason))
                        .unwrap_or_else(|| "closed by relay".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return e.to_string(),
                None => return "stream ended".to_string(),
            },
        }
    }
}
