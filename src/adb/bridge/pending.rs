// Single-slot request correlation for bridge round trips.
//
// The relay protocol carries no request ids, so each operation kind owns one
// slot. A second request of the same kind while the slot is occupied is
// rejected instead of silently replacing the first caller's resolver.
use crate::adb::error::{RemoteError, RemoteResult};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

pub struct PendingSlot<T> {
    operation: &'static str,
    // (request generation, resolver)
    slot: Mutex<Option<(u64, oneshot::Sender<T>)>>,
    generation: Mutex<u64>,
}

/// Handle returned by [`PendingSlot::begin`]; await it with [`PendingSlot::wait`].
pub struct PendingTicket<T> {
    generation: u64,
    receiver: oneshot::Receiver<T>,
}

impl<T> PendingSlot<T> {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            slot: Mutex::new(None),
            generation: Mutex::new(0),
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(u64, oneshot::Sender<T>)>> {
        // A poisoned slot only means a panicking holder; the Option is still valid
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }

    /// Reserve the slot for a new request.
    pub fn begin(&self) -> RemoteResult<PendingTicket<T>> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(RemoteError::OperationInFlight {
                operation: self.operation,
            });
        }
        let generation = {
            let mut g = self.generation.lock().unwrap_or_else(|e| e.into_inner());
            *g += 1;
            *g
        };
        let (tx, rx) = oneshot::channel();
        *slot = Some((generation, tx));
        Ok(PendingTicket {
            generation,
            receiver: rx,
        })
    }

    /// Deliver a response. Returns `false` when nobody is waiting (late or
    /// unsolicited response), in which case the value is dropped.
    pub fn resolve(&self, value: T) -> bool {
        match self.lock().take() {
            Some((_, tx)) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Drop the waiting resolver so its caller observes a failure.
    pub fn fail(&self) -> bool {
        self.lock().take().is_some()
    }

    // Only clears the slot if it still belongs to `generation`
    fn release(&self, generation: u64) {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|(g, _)| *g == generation) {
            *slot = None;
        }
    }

    /// Wait for the response. `None` on timeout or when the slot was failed;
    /// either way the caller hears back exactly once.
    pub async fn wait(&self, ticket: PendingTicket<T>, window: Duration) -> Option<T> {
        let PendingTicket {
            generation,
            receiver,
        } = ticket;
        match tokio::time::timeout(window, receiver).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(_)) => {
                log::warn!("Bridge: {} request failed before a response arrived", self.operation);
                None
            }
            Err(_) => {
                self.release(generation);
                log::warn!("Bridge: {} timed out after {window:?}", self.operation);
                None
            }
        }
    }
}
