// Active transports keyed by device id
use crate::adb::{ConnectionState, Device, RemoteError, RemoteResult, Transport, TransportKind};
use crate::config::{BridgeEndpoint, Timeouts};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct Connections {
    transports: HashMap<String, Arc<Transport>>,
    // Connecting/Failed states for ids that have no transport (yet)
    pending: HashMap<String, ConnectionState>,
}

/// Owns one transport per connected device. The map lock is only held for
/// lookups and inserts, never across transport I/O, so slow devices do not
/// block each other.
pub struct ConnectionManager {
    kind: TransportKind,
    endpoint: BridgeEndpoint,
    timeouts: Timeouts,
    connections: Mutex<Connections>,
}

impl ConnectionManager {
    pub fn new(kind: TransportKind, endpoint: BridgeEndpoint, timeouts: Timeouts) -> Self {
        Self {
            kind,
            endpoint,
            timeouts,
            connections: Mutex::new(Connections::default()),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn endpoint(&self) -> &BridgeEndpoint {
        &self.endpoint
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Return the existing transport for `device.id`, or build and connect a
    /// new one. A failed attempt leaves the device `Disconnected`.
    pub async fn connect(&self, device: &Device) -> RemoteResult<Arc<Transport>> {
        {
            let mut conns = self.connections.lock().await;
            if let Some(existing) = conns.transports.get(&device.id) {
                log::debug!("Manager: reusing transport for {}", device.id);
                if let Transport::Bridge(bridge) = existing.as_ref() {
                    if !bridge.is_open() {
                        bridge.reconnect();
                    }
                }
                return Ok(existing.clone());
            }
            if matches!(conns.pending.get(&device.id), Some(ConnectionState::Connecting)) {
                return Err(RemoteError::OperationInFlight {
                    operation: "connect",
                });
            }
            conns
                .pending
                .insert(device.id.clone(), ConnectionState::Connecting);
        }

        log::info!("Manager: connecting {} over {}", device.id, self.kind);
        let result = Transport::connect(
            self.kind,
            device.clone(),
            &self.endpoint,
            self.timeouts.clone(),
        )
        .await;

        let mut conns = self.connections.lock().await;
        conns.pending.remove(&device.id);
        match result {
            Ok(transport) => {
                let transport = Arc::new(transport);
                conns
                    .transports
                    .insert(device.id.clone(), transport.clone());
                Ok(transport)
            }
            Err(e) => {
                log::warn!("Manager: {e}");
                Err(match e {
                    RemoteError::ConnectFailure { .. } => e,
                    other => RemoteError::connect_failure(&device.id, other),
                })
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Transport>> {
        self.connections.lock().await.transports.get(id).cloned()
    }

    /// Tear down and forget the transport for `id`. Returns whether one existed.
    pub async fn disconnect(&self, id: &str) -> bool {
        let removed = {
            let mut conns = self.connections.lock().await;
            conns.pending.remove(id);
            conns.transports.remove(id)
        };
        match removed {
            Some(transport) => {
                transport.disconnect().await;
                true
            }
            None => false,
        }
    }

    pub async fn disconnect_all(&self) {
        let drained: Vec<_> = {
            let mut conns = self.connections.lock().await;
            conns.pending.clear();
            conns.transports.drain().collect()
        };
        for (id, transport) in drained {
            log::debug!("Manager: tearing down {id}");
            transport.disconnect().await;
        }
    }

    /// Drop a transport whose connection was lost; its state becomes `Failed`.
    pub async fn discard(&self, id: &str, reason: String) {
        let removed = self.connections.lock().await.transports.remove(id);
        if let Some(transport) = removed {
            log::warn!("Manager: dropping {id}: {reason}");
            transport.disconnect().await;
            self.connections
                .lock()
                .await
                .pending
                .insert(id.to_string(), ConnectionState::Failed { reason });
        }
    }

    pub async fn state(&self, id: &str) -> ConnectionState {
        let (transport, pending) = {
            let conns = self.connections.lock().await;
            (conns.transports.get(id).cloned(), conns.pending.get(id).cloned())
        };
        match (transport, pending) {
            (Some(transport), _) => transport.state().await,
            (None, Some(state)) => state,
            (None, None) => ConnectionState::Disconnected,
        }
    }

    /// Ids with an active transport, sorted.
    pub async fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .connections
            .lock()
            .await
            .transports
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
