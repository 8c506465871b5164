//! Broadcast channel with per-session percent clamping

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::ProgressEvent;
use crate::error::ProgressError;

/// Single-writer progress emitter
///
/// Percent values are clamped on push to the highest value seen so far, so
/// every subscriber observes a non-decreasing sequence. Delivery is best
/// effort: with no subscriber, or after every subscriber dropped, pushes
/// are silently discarded.
#[derive(Debug)]
pub struct ProgressChannel {
    tx: Mutex<Option<broadcast::Sender<ProgressEvent>>>,
    last_percent: AtomicU8,
    latest: Mutex<Option<ProgressEvent>>,
}

impl ProgressChannel {
    /// Create a channel buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
            last_percent: AtomicU8::new(0),
            latest: Mutex::new(None),
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<broadcast::Sender<ProgressEvent>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clamp and publish an event, returning the percent actually sent
    pub fn push(&self, mut event: ProgressEvent) -> u8 {
        let previous = self.last_percent.fetch_max(event.percent, Ordering::SeqCst);
        event.percent = event.percent.max(previous);
        let percent = event.percent;

        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(event.clone());

        if let Err(e) = self.deliver(event) {
            trace!(error = %e, "Dropping progress event");
        }
        percent
    }

    fn deliver(&self, event: ProgressEvent) -> Result<(), ProgressError> {
        match self.sender().as_ref() {
            Some(tx) => tx
                .send(event)
                .map(|_| ())
                .map_err(|_| ProgressError::ConsumerDisconnected),
            None => Err(ProgressError::ConsumerDisconnected),
        }
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> ProgressSubscription {
        let rx = match self.sender().as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                // closed: hand out a receiver that ends immediately
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                rx
            }
        };
        ProgressSubscription { rx }
    }

    /// Stop publishing. Subscribers drain what is buffered, then see the end.
    pub fn close(&self) {
        if self.sender().take().is_some() {
            debug!("Progress channel closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    /// Most recent event pushed, if any
    pub fn latest(&self) -> Option<ProgressEvent> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Highest percent published so far
    pub fn percent(&self) -> u8 {
        self.last_percent.load(Ordering::SeqCst)
    }
}

/// Read-only view of a [`ProgressChannel`]
#[derive(Debug)]
pub struct ProgressSubscription {
    rx: broadcast::Receiver<ProgressEvent>,
}

impl ProgressSubscription {
    /// Next event, or `None` once the channel is closed and drained.
    ///
    /// A consumer that fell behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Progress consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
