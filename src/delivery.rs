//! Turning an emitter acknowledgment into an operation result.
//!
//! The emitter reports delivery from a background task through a callback.
//! Resource operations need a plain success/failure answer, so each
//! operation creates a one-slot channel, hands the sending half to the
//! emitter callback and waits on the receiving half.
//!
//! A channel pair serves exactly one tracked event. Reusing a tracker
//! for a second event while the first is outstanding would race both
//! acknowledgments for the single slot.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::ProviderError;

/// Status recorded when the emitter never produced an unambiguous result.
pub const NO_STATUS: i32 = 0;

/// Create a connected status sender/receiver pair.
pub fn status_channel() -> (StatusSender, StatusReceiver) {
    let (tx, rx) = oneshot::channel();
    (
        StatusSender {
            slot: Mutex::new(Some(tx)),
        },
        StatusReceiver { rx },
    )
}

/// Sending half, held by the emitter callback.
#[derive(Debug)]
pub struct StatusSender {
    slot: Mutex<Option<oneshot::Sender<i32>>>,
}

impl StatusSender {
    /// Publish a status. Only the first call is delivered.
    ///
    /// Returns `false` if a status was already sent or the receiver is gone.
    pub fn send(&self, status: i32) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => tx.send(status).is_ok(),
            None => {
                warn!(status, "Dropping extra delivery status for a single-event channel");
                false
            },
        }
    }
}

/// Receiving half, awaited by the resource operation.
#[derive(Debug)]
pub struct StatusReceiver {
    rx: oneshot::Receiver<i32>,
}

impl StatusReceiver {
    /// Wait up to `timeout` for the status.
    ///
    /// If the sender is dropped without sending, [`NO_STATUS`] is returned
    /// so that classification reports it as a failed delivery.
    pub async fn wait(self, timeout: Duration) -> Result<i32, ProviderError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(status)) => {
                debug!(status, "Received delivery status");
                Ok(status)
            },
            Ok(Err(_)) => {
                warn!("Emitter callback dropped without reporting a status");
                Ok(NO_STATUS)
            },
            Err(_) => Err(ProviderError::Timeout(timeout)),
        }
    }
}

/// Classify a delivery status: 2xx and 3xx succeed, anything else fails.
pub fn check_status(status: i32) -> Result<(), ProviderError> {
    match status / 100 {
        2 | 3 => Ok(()),
        _ => Err(ProviderError::Delivery { status }),
    }
}
