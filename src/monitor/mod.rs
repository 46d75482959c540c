//! Socket-destroy monitor.
//!
//! Runs as a background Tokio task fed by a bounded channel of destroy
//! events. Each event removes the socket's cookie-tag entry. The channel is
//! lossy: a send into a full channel drops the event and is accounted as an
//! overflow. Both ends share the drop counter, so lost events are reported
//! once to the registered error handler either in-band (the next send that
//! finds room) or by the task itself once the queue runs dry or it stops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::{SharedMap, StoreError};
use crate::types::{Cookie, UidTagValue};

/// Message carried on the destroy-event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketEvent {
    /// A socket was closed.
    Destroyed {
        /// The closed socket's cookie.
        cookie: Cookie,
    },
    /// Events were lost because the channel was full.
    Overflow {
        /// How many events were lost.
        dropped: u64,
    },
}

/// Error delivered to the registered handler. Never returned from a call.
#[derive(Debug, Clone, Error)]
pub enum MonitorError {
    /// The event channel dropped messages.
    #[error("socket event channel overflowed, {dropped} events lost")]
    ChannelOverflow {
        /// How many events were lost in this episode.
        dropped: u64,
        /// When the monitor saw the indication.
        observed_at: DateTime<Utc>,
    },
}

/// Callback invoked on monitor errors.
pub type ErrorHandler = Box<dyn FnMut(&MonitorError) + Send>;

/// Counters returned when the monitor task exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStats {
    /// Destroy events handled.
    pub events: u64,
    /// Cookie-tag entries actually removed.
    pub untagged: u64,
    /// Overflow indications handled.
    pub overflows: u64,
    /// Events reported lost across all overflows.
    pub dropped: u64,
}

// ── Sending side ──

/// Producer handle for destroy events. Cheap to clone.
#[derive(Clone)]
pub struct DestroyEventSender {
    tx: mpsc::Sender<SocketEvent>,
    pending_drops: Arc<AtomicU64>,
}

impl DestroyEventSender {
    /// Queue a destroy event without waiting.
    ///
    /// A pending overflow indication is queued first. Returns `false` when
    /// the event was dropped, either because the channel is full (the drop is
    /// counted) or because the monitor has stopped.
    pub fn notify_destroyed(&self, cookie: Cookie) -> bool {
        if !self.flush_overflow() {
            if !self.tx.is_closed() {
                self.pending_drops.fetch_add(1, Ordering::Relaxed);
            }
            return false;
        }
        match self.tx.try_send(SocketEvent::Destroyed { cookie }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.pending_drops.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Queue the pending overflow indication, if any.
    ///
    /// Returns `true` when nothing is left pending.
    pub fn flush_overflow(&self) -> bool {
        let dropped = self.pending_drops.swap(0, Ordering::Relaxed);
        if dropped == 0 {
            return true;
        }
        match self.tx.try_send(SocketEvent::Overflow { dropped }) {
            Ok(()) => true,
            Err(_) => {
                self.pending_drops.fetch_add(dropped, Ordering::Relaxed);
                false
            }
        }
    }

    /// Events dropped and not yet reported.
    pub fn pending_drops(&self) -> u64 {
        self.pending_drops.load(Ordering::Relaxed)
    }
}

// ── Receiving side ──

/// Consumer end of the destroy-event channel, handed to
/// [`SocketDestroyMonitor::spawn`].
pub struct DestroyEventReceiver {
    rx: mpsc::Receiver<SocketEvent>,
    pending_drops: Arc<AtomicU64>,
}

impl DestroyEventReceiver {
    /// Claim drops no overflow indication has carried yet.
    fn take_drops(&self) -> Option<SocketEvent> {
        match self.pending_drops.swap(0, Ordering::Relaxed) {
            0 => None,
            dropped => Some(SocketEvent::Overflow { dropped }),
        }
    }
}

// ── Monitor ──

/// Removes cookie-tag entries for destroyed sockets.
///
/// Holds at most one error handler; registering replaces the previous one.
/// The handler runs on the monitor task between events, never concurrently
/// with event processing.
pub struct SocketDestroyMonitor {
    cookie_tags: SharedMap<Cookie, UidTagValue>,
    handler: Arc<Mutex<Option<ErrorHandler>>>,
}

impl SocketDestroyMonitor {
    /// Monitor over the given cookie-tag table.
    pub fn new(cookie_tags: SharedMap<Cookie, UidTagValue>) -> Self {
        Self {
            cookie_tags,
            handler: Arc::new(Mutex::new(None)),
        }
    }

    /// Bounded event channel. A zero capacity is raised to one.
    pub fn channel(capacity: usize) -> (DestroyEventSender, DestroyEventReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let pending_drops = Arc::new(AtomicU64::new(0));
        let sender = DestroyEventSender {
            tx,
            pending_drops: Arc::clone(&pending_drops),
        };
        (sender, DestroyEventReceiver { rx, pending_drops })
    }

    /// Install `handler`, replacing any previous one.
    pub fn register_error_handler(&self, handler: impl FnMut(&MonitorError) + Send + 'static) {
        match self.handler.lock() {
            Ok(mut slot) => {
                if slot.replace(Box::new(handler)).is_some() {
                    debug!("replaced monitor error handler");
                }
            }
            Err(e) => warn!(error = %e, "monitor handler slot poisoned, handler not installed"),
        }
    }

    /// Start consuming `events` on a new task.
    ///
    /// The task exits when every sender is gone, when `shutdown` flips to
    /// `true`, or when the shutdown sender is dropped. On shutdown the channel
    /// is closed and events already queued are still handled. Drops no
    /// indication has carried are reported whenever the queue is empty and
    /// once more before the task exits.
    pub fn spawn(
        &self,
        mut events: DestroyEventReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<MonitorStats> {
        let dispatcher = Dispatcher {
            cookie_tags: Arc::clone(&self.cookie_tags),
            handler: Arc::clone(&self.handler),
            stats: MonitorStats::default(),
        };
        tokio::spawn(async move {
            let mut dispatcher = dispatcher;
            info!("socket destroy monitor started");
            loop {
                if events.rx.is_empty() {
                    if let Some(overflow) = events.take_drops() {
                        dispatcher.dispatch(overflow);
                    }
                }
                tokio::select! {
                    event = events.rx.recv() => match event {
                        Some(event) => dispatcher.dispatch(event),
                        None => break,
                    },
                    result = shutdown.changed() => {
                        if result.is_err() || *shutdown.borrow() {
                            events.rx.close();
                            while let Some(event) = events.rx.recv().await {
                                dispatcher.dispatch(event);
                            }
                            break;
                        }
                    }
                }
            }
            if let Some(overflow) = events.take_drops() {
                dispatcher.dispatch(overflow);
            }
            let stats = dispatcher.stats;
            info!(
                events = stats.events,
                untagged = stats.untagged,
                overflows = stats.overflows,
                "socket destroy monitor stopped"
            );
            stats
        })
    }
}

struct Dispatcher {
    cookie_tags: SharedMap<Cookie, UidTagValue>,
    handler: Arc<Mutex<Option<ErrorHandler>>>,
    stats: MonitorStats,
}

impl Dispatcher {
    fn dispatch(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Destroyed { cookie } => {
                self.stats.events = self.stats.events.saturating_add(1);
                match self.cookie_tags.delete(&cookie) {
                    Ok(()) => {
                        self.stats.untagged = self.stats.untagged.saturating_add(1);
                        debug!(cookie, "removed tag of destroyed socket");
                    }
                    Err(StoreError::NotFound) => {}
                    Err(e) => warn!(cookie, error = %e, "failed to remove tag of destroyed socket"),
                }
            }
            SocketEvent::Overflow { dropped } => {
                self.stats.overflows = self.stats.overflows.saturating_add(1);
                self.stats.dropped = self.stats.dropped.saturating_add(dropped);
                let err = MonitorError::ChannelOverflow {
                    dropped,
                    observed_at: Utc::now(),
                };
                warn!(dropped, "socket event channel overflowed");
                match self.handler.lock() {
                    Ok(mut slot) => {
                        if let Some(handler) = slot.as_mut() {
                            handler(&err);
                        }
                    }
                    Err(e) => warn!(error = %e, "monitor handler slot poisoned"),
                }
            }
        }
    }
}
