//! Simulated transport, link, session and pull subscription.
//!
//! Links share one [`SimulatedBroker`]. Tests drive connectivity with
//! [`SimulatedLink::drop_connection`] and [`SimulatedLink::restore_connection`],
//! which emit the same lifecycle events a real client would.

#![allow(clippy::significant_drop_tightening)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;
use warden_core::StreamSpec;

use super::broker::SimulatedBroker;
use crate::error::{BrokerError, BrokerResult};
use crate::info::{CursorConfig, CursorInfo, StreamInfo};
use crate::message::FetchedMessage;
use crate::session::{
    ConnectOptions, FetchRequest, Link, LinkEvent, LinkEventSender, PullSubscription, Session,
    Transport,
};

// -----------------------------------------------------------------------------
// SimulatedTransport
// -----------------------------------------------------------------------------

/// Transport that opens links to a [`SimulatedBroker`].
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    broker: SimulatedBroker,
    links: Arc<Mutex<Vec<SimulatedLink>>>,
}

impl SimulatedTransport {
    /// Creates a transport for the given broker.
    #[must_use]
    pub fn new(broker: SimulatedBroker) -> Self {
        Self {
            broker,
            links: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns the broker behind this transport.
    #[must_use]
    pub const fn broker(&self) -> &SimulatedBroker {
        &self.broker
    }

    /// Returns the most recently opened link.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn last_link(&self) -> Option<SimulatedLink> {
        self.links.lock().expect("links lock poisoned").last().cloned()
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn connect(
        &self,
        address: &str,
        options: &ConnectOptions,
        events: LinkEventSender,
    ) -> BrokerResult<Arc<dyn Link>> {
        if self.broker.take_connect_fault() {
            return Err(BrokerError::Connect {
                address: address.to_string(),
                message: "simulated connect failure (forced)".to_string(),
            });
        }

        let link = SimulatedLink {
            inner: Arc::new(LinkInner {
                address: address.to_string(),
                broker: self.broker.clone(),
                connected: Arc::new(AtomicBool::new(true)),
                closed: AtomicBool::new(false),
                events,
            }),
        };
        debug!(address, client = %options.name, "Simulated link connected");
        self.links
            .lock()
            .expect("links lock poisoned")
            .push(link.clone());
        Ok(Arc::new(link))
    }
}

// -----------------------------------------------------------------------------
// SimulatedLink
// -----------------------------------------------------------------------------

#[derive(Debug)]
struct LinkInner {
    address: String,
    broker: SimulatedBroker,
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
    events: LinkEventSender,
}

/// Link to a simulated broker. Clones share connectivity.
#[derive(Debug, Clone)]
pub struct SimulatedLink {
    inner: Arc<LinkInner>,
}

impl SimulatedLink {
    /// Simulates losing the connection.
    pub fn drop_connection(&self) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        if self.inner.connected.swap(false, Ordering::AcqRel) {
            let _ = self.inner.events.send(LinkEvent::Disconnected);
        }
    }

    /// Simulates the client restoring a lost connection.
    pub fn restore_connection(&self) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        if !self.inner.connected.swap(true, Ordering::AcqRel) {
            let _ = self.inner.events.send(LinkEvent::Reconnected);
        }
    }

    /// Emits an error event without changing connectivity.
    pub fn report_error(&self, message: impl Into<String>) {
        let _ = self.inner.events.send(LinkEvent::Error {
            message: message.into(),
        });
    }

    /// Returns true once the link has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Link for SimulatedLink {
    fn address(&self) -> &str {
        &self.inner.address
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    async fn derive_session(&self) -> BrokerResult<Arc<dyn Session>> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        if !self.is_connected() {
            return Err(BrokerError::Request {
                operation: "session derive",
                message: "link disconnected".to_string(),
            });
        }
        let id = self.inner.broker.register_session()?;
        Ok(Arc::new(SimulatedSession {
            id,
            broker: self.inner.broker.clone(),
            connected: Arc::clone(&self.inner.connected),
        }))
    }

    async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.connected.store(false, Ordering::Release);
        let _ = self.inner.events.send(LinkEvent::Closed);
    }
}

// -----------------------------------------------------------------------------
// SimulatedSession
// -----------------------------------------------------------------------------

struct SimulatedSession {
    id: u64,
    broker: SimulatedBroker,
    connected: Arc<AtomicBool>,
}

impl SimulatedSession {
    fn ensure_connected(&self, operation: &'static str) -> BrokerResult<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BrokerError::Request {
                operation,
                message: "link disconnected".to_string(),
            })
        }
    }
}

#[async_trait]
impl Session for SimulatedSession {
    async fn stream_info(&self, stream: &str) -> BrokerResult<StreamInfo> {
        self.ensure_connected("stream lookup")?;
        self.broker.stream_info(stream)
    }

    async fn create_stream(&self, spec: &StreamSpec) -> BrokerResult<StreamInfo> {
        self.ensure_connected("stream create")?;
        self.broker.create_stream(spec)
    }

    async fn update_stream(&self, spec: &StreamSpec) -> BrokerResult<StreamInfo> {
        self.ensure_connected("stream update")?;
        self.broker.update_stream(spec)
    }

    async fn delete_stream(&self, stream: &str) -> BrokerResult<()> {
        self.ensure_connected("stream delete")?;
        self.broker.delete_stream(stream)
    }

    async fn cursor_info(&self, stream: &str, durable: &str) -> BrokerResult<CursorInfo> {
        self.ensure_connected("cursor lookup")?;
        self.broker.cursor_info(stream, durable)
    }

    async fn create_cursor(
        &self,
        stream: &str,
        config: &CursorConfig,
    ) -> BrokerResult<CursorInfo> {
        self.ensure_connected("cursor create")?;
        self.broker.create_cursor(stream, config)
    }

    async fn delete_cursor(&self, stream: &str, durable: &str) -> BrokerResult<()> {
        self.ensure_connected("cursor delete")?;
        self.broker.delete_cursor(stream, durable)
    }

    async fn pull_subscribe(
        &self,
        stream: &str,
        durable: &str,
    ) -> BrokerResult<Box<dyn PullSubscription>> {
        self.ensure_connected("pull subscribe")?;
        let info = self.broker.cursor_info(stream, durable)?;
        if info.is_push() {
            return Err(BrokerError::Request {
                operation: "pull subscribe",
                message: format!("cursor {durable} is push-style"),
            });
        }
        Ok(Box::new(SimulatedSubscription {
            session_id: self.id,
            broker: self.broker.clone(),
            stream: stream.to_string(),
            durable: durable.to_string(),
            connected: Arc::clone(&self.connected),
            drained: false,
        }))
    }
}

// -----------------------------------------------------------------------------
// SimulatedSubscription
// -----------------------------------------------------------------------------

struct SimulatedSubscription {
    session_id: u64,
    broker: SimulatedBroker,
    stream: String,
    durable: String,
    connected: Arc<AtomicBool>,
    drained: bool,
}

#[async_trait]
impl PullSubscription for SimulatedSubscription {
    async fn fetch(&mut self, request: FetchRequest) -> BrokerResult<Vec<FetchedMessage>> {
        if self.drained {
            return Ok(Vec::new());
        }
        if !self.connected.load(Ordering::Acquire) {
            return Err(BrokerError::Request {
                operation: "fetch",
                message: "link disconnected".to_string(),
            });
        }
        self.broker
            .fetch(
                self.session_id,
                &self.stream,
                &self.durable,
                request,
                &self.connected,
            )
            .await
    }

    async fn drain(&mut self) -> BrokerResult<()> {
        self.drained = true;
        Ok(())
    }

    fn is_drained(&self) -> bool {
        self.drained
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use warden_core::DurableCursorSpec;

    use super::*;

    async fn connect(
        transport: &SimulatedTransport,
    ) -> (Arc<dyn Link>, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = transport
            .connect("sim://local", &ConnectOptions::default(), tx)
            .await
            .unwrap();
        (link, rx)
    }

    #[tokio::test]
    async fn test_connectivity_events() {
        let transport = SimulatedTransport::new(SimulatedBroker::new(42));
        let (link, mut rx) = connect(&transport).await;
        let handle = transport.last_link().unwrap();

        handle.drop_connection();
        handle.drop_connection();
        assert!(!link.is_connected());
        handle.restore_connection();
        assert!(link.is_connected());
        link.close().await;
        link.close().await;

        assert_eq!(rx.recv().await, Some(LinkEvent::Disconnected));
        assert_eq!(rx.recv().await, Some(LinkEvent::Reconnected));
        assert_eq!(rx.recv().await, Some(LinkEvent::Closed));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forced_connect_failure() {
        let broker = SimulatedBroker::with_faults(
            1,
            crate::BrokerFaultConfig::none().with_force_connect_fail(),
        );
        let transport = SimulatedTransport::new(broker);
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = transport
            .connect("sim://local", &ConnectOptions::default(), tx)
            .await;
        assert!(matches!(result, Err(BrokerError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_session_fails_while_disconnected() {
        let transport = SimulatedTransport::new(SimulatedBroker::new(42));
        let (link, _rx) = connect(&transport).await;
        let session = link.derive_session().await.unwrap();
        transport.last_link().unwrap().drop_connection();

        assert!(session.stream_info("EVENTS").await.is_err());
        assert!(link.derive_session().await.is_err());
    }

    #[tokio::test]
    async fn test_drained_subscription_returns_empty_without_fetching() {
        let transport = SimulatedTransport::new(SimulatedBroker::new(42));
        let (link, _rx) = connect(&transport).await;
        let session = link.derive_session().await.unwrap();
        session.create_stream(&StreamSpec::default()).await.unwrap();
        session
            .create_cursor("EVENTS", &CursorConfig::pull(&DurableCursorSpec::default()))
            .await
            .unwrap();
        transport.broker().publish("events.a", b"1".as_slice());

        let mut sub = session
            .pull_subscribe("EVENTS", "events-audit-durable")
            .await
            .unwrap();
        sub.drain().await.unwrap();
        assert!(sub.is_drained());
        assert!(sub.fetch(FetchRequest::default()).await.unwrap().is_empty());
        assert_eq!(transport.broker().calls().fetches, 0);
    }
}
