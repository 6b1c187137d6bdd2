//! Connection supervisor.
//!
//! Owns the link to the broker and the [`SessionCell`]. A connected
//! supervisor always has a session: if the first derivation fails the link is
//! closed and `connect` returns an error. After every transport reconnect the
//! supervisor re-derives the session before publishing it and invoking
//! reconnect callbacks. A failed re-derivation marks the cell stale.
//!
//! The supervisor never retries connecting itself; the transport's client
//! does that and reports the outcome through link events.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use warden_broker::{ConnectOptions, Link, LinkEvent, Session, Transport};
use warden_core::SessionGeneration;

use crate::error::{ConsumerError, ConsumerResult};
use crate::session_cell::{SessionCell, SessionSlot};

// -----------------------------------------------------------------------------
// Lifecycle events
// -----------------------------------------------------------------------------

/// Connection lifecycle change reported to a [`LifecycleObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Connected and holding a session.
    Connected {
        /// The broker address.
        address: String,
    },
    /// The connection was lost.
    Disconnected,
    /// The connection was restored and a new session published.
    Reconnected {
        /// Generation of the new session.
        generation: SessionGeneration,
    },
    /// The connection was closed.
    Closed,
    /// The broker, client or session derivation reported an error.
    Error {
        /// Error message.
        message: String,
    },
}

/// Receives lifecycle events from a supervisor.
pub trait LifecycleObserver: Send + Sync {
    /// Called once per event, in order.
    fn on_event(&self, event: &LifecycleEvent);
}

impl<F> LifecycleObserver for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn on_event(&self, event: &LifecycleEvent) {
        self(event);
    }
}

/// Observer that writes every event as a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl LifecycleObserver for TracingObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Connected { address } => info!(address = %address, "Connected to broker"),
            LifecycleEvent::Disconnected => warn!("Disconnected from broker"),
            LifecycleEvent::Reconnected { generation } => {
                info!(generation = %generation, "Reconnected to broker");
            }
            LifecycleEvent::Closed => info!("Broker connection closed"),
            LifecycleEvent::Error { message } => error!(error = %message, "Broker connection error"),
        }
    }
}

// -----------------------------------------------------------------------------
// Supervisor
// -----------------------------------------------------------------------------

type ReconnectCallback = Box<dyn Fn(&Arc<dyn Session>) + Send + Sync>;
type Callbacks = Arc<Mutex<Vec<ReconnectCallback>>>;

/// Owns the broker link and publishes the current session.
pub struct Supervisor {
    link: Arc<dyn Link>,
    cell: Arc<SessionCell>,
    callbacks: Callbacks,
    closed: AtomicBool,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Connects to `address` and derives the first session.
    ///
    /// # Errors
    /// Returns `Connect` if the transport fails, or `Session` if the first
    /// session cannot be derived (the link is closed first).
    pub async fn connect(
        transport: &dyn Transport,
        address: &str,
        options: &ConnectOptions,
        observer: Arc<dyn LifecycleObserver>,
    ) -> ConsumerResult<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = transport
            .connect(address, options, tx)
            .await
            .map_err(|source| ConsumerError::Connect {
                address: address.to_string(),
                source,
            })?;

        let session = match link.derive_session().await {
            Ok(session) => session,
            Err(source) => {
                link.close().await;
                return Err(ConsumerError::Session { source });
            }
        };

        let cell = Arc::new(SessionCell::new(session));
        let callbacks: Callbacks = Arc::new(Mutex::new(Vec::new()));
        observer.on_event(&LifecycleEvent::Connected {
            address: address.to_string(),
        });

        let watcher = tokio::spawn(watch(
            Arc::clone(&link),
            Arc::clone(&cell),
            Arc::clone(&callbacks),
            observer,
            rx,
        ));

        Ok(Self {
            link,
            cell,
            callbacks,
            closed: AtomicBool::new(false),
            watcher: Mutex::new(Some(watcher)),
        })
    }

    /// Registers a callback invoked with every re-derived session.
    ///
    /// Callbacks run on the supervisor's event task and must not block.
    pub fn on_reconnect<F>(&self, callback: F)
    where
        F: Fn(&Arc<dyn Session>) + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(callback));
    }

    /// Returns the cell the current session is published in.
    #[must_use]
    pub fn session_cell(&self) -> Arc<SessionCell> {
        Arc::clone(&self.cell)
    }

    /// Returns the current session slot.
    #[must_use]
    pub fn session(&self) -> Arc<SessionSlot> {
        self.cell.current()
    }

    /// Returns the broker address.
    #[must_use]
    pub fn address(&self) -> &str {
        self.link.address()
    }

    /// Returns true while the link is up and not closed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.link.is_connected()
    }

    /// Closes the link and waits for the event task to finish. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.link.close().await;

        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            if let Err(e) = watcher.await {
                warn!(error = %e, "Supervisor event task ended abnormally");
            }
        }
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("address", &self.link.address())
            .field("cell", &self.cell)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Reacts to link events until the link closes.
async fn watch(
    link: Arc<dyn Link>,
    cell: Arc<SessionCell>,
    callbacks: Callbacks,
    observer: Arc<dyn LifecycleObserver>,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Connected => debug!(address = link.address(), "Link reports connected"),
            LinkEvent::Disconnected => observer.on_event(&LifecycleEvent::Disconnected),
            LinkEvent::Reconnected => match link.derive_session().await {
                Ok(session) => {
                    let generation = cell.publish(Arc::clone(&session));
                    for callback in callbacks
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .iter()
                    {
                        callback(&session);
                    }
                    observer.on_event(&LifecycleEvent::Reconnected { generation });
                }
                Err(e) => {
                    let generation = cell.mark_stale(e.to_string());
                    error!(
                        generation = %generation,
                        error = %e,
                        "Failed to re-derive broker session after reconnect"
                    );
                    observer.on_event(&LifecycleEvent::Error {
                        message: format!("session re-derivation failed: {e}"),
                    });
                }
            },
            LinkEvent::Closed => {
                observer.on_event(&LifecycleEvent::Closed);
                break;
            }
            LinkEvent::Error { message } => observer.on_event(&LifecycleEvent::Error { message }),
        }
    }
}
