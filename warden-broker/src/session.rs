//! Transport, link, session and pull-subscription traits.
//!
//! A [`Transport`] opens a physical [`Link`]. The link reports lifecycle
//! changes through a [`LinkEventSender`] and derives [`Session`]s: handles
//! to the broker's management and fetch APIs. Sessions are cheap to derive
//! and are replaced wholesale after a reconnect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use warden_core::{defaults, StreamSpec};

use crate::error::BrokerResult;
use crate::info::{CursorConfig, CursorInfo, StreamInfo};
use crate::message::FetchedMessage;

// -----------------------------------------------------------------------------
// Link events
// -----------------------------------------------------------------------------

/// Lifecycle change reported by a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The first connection was established.
    Connected,
    /// The connection was lost; the link is trying to restore it.
    Disconnected,
    /// The connection was restored after a loss.
    Reconnected,
    /// The link was closed and will not reconnect.
    Closed,
    /// The broker or client reported an error.
    Error {
        /// Error message.
        message: String,
    },
}

/// Channel a link reports its lifecycle events on.
pub type LinkEventSender = mpsc::UnboundedSender<LinkEvent>;

// -----------------------------------------------------------------------------
// Options
// -----------------------------------------------------------------------------

/// Options for opening a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Client name announced to the broker.
    pub name: String,
    /// Timeout of the initial connection attempt.
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            name: defaults::CLIENT_NAME.to_string(),
            connect_timeout: defaults::CONNECT_TIMEOUT,
        }
    }
}

/// A bounded-wait batch fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    /// Maximum messages to return.
    pub batch_size: u32,
    /// Maximum time to wait for the first message.
    pub max_wait: Duration,
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self {
            batch_size: defaults::PULL_BATCH_SIZE,
            max_wait: defaults::PULL_WAIT,
        }
    }
}

// -----------------------------------------------------------------------------
// Traits
// -----------------------------------------------------------------------------

/// Opens links to a broker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connects to `address`.
    ///
    /// Lifecycle changes after the connection is established are sent on
    /// `events` until the link is closed.
    ///
    /// # Errors
    ///
    /// Returns `Connect` if the broker is unreachable within the timeout.
    async fn connect(
        &self,
        address: &str,
        options: &ConnectOptions,
        events: LinkEventSender,
    ) -> BrokerResult<Arc<dyn Link>>;
}

/// A physical connection to the broker.
#[async_trait]
pub trait Link: Send + Sync {
    /// Address the link is connected to.
    fn address(&self) -> &str;

    /// Returns true while the connection is up.
    fn is_connected(&self) -> bool;

    /// Derives a fresh session on this link.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker does not provide the session API.
    async fn derive_session(&self) -> BrokerResult<Arc<dyn Session>>;

    /// Closes the link. Idempotent.
    async fn close(&self);
}

/// Handle to the broker's management and fetch APIs.
#[async_trait]
pub trait Session: Send + Sync {
    /// Looks up a stream.
    ///
    /// # Errors
    ///
    /// Returns `StreamNotFound` if the stream does not exist.
    async fn stream_info(&self, stream: &str) -> BrokerResult<StreamInfo>;

    /// Creates a stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream exists or the broker rejects the spec.
    async fn create_stream(&self, spec: &StreamSpec) -> BrokerResult<StreamInfo>;

    /// Updates a stream's mutable configuration.
    ///
    /// # Errors
    ///
    /// Returns `StreamNotFound` if the stream does not exist, or an error if
    /// the broker rejects the change.
    async fn update_stream(&self, spec: &StreamSpec) -> BrokerResult<StreamInfo>;

    /// Deletes a stream and its cursors.
    ///
    /// # Errors
    ///
    /// Returns `StreamNotFound` if the stream does not exist.
    async fn delete_stream(&self, stream: &str) -> BrokerResult<()>;

    /// Looks up a durable cursor.
    ///
    /// # Errors
    ///
    /// Returns `CursorNotFound` if the cursor does not exist.
    async fn cursor_info(&self, stream: &str, durable: &str) -> BrokerResult<CursorInfo>;

    /// Creates a durable cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is missing or the broker rejects the
    /// configuration.
    async fn create_cursor(&self, stream: &str, config: &CursorConfig)
        -> BrokerResult<CursorInfo>;

    /// Deletes a durable cursor.
    ///
    /// # Errors
    ///
    /// Returns `CursorNotFound` if the cursor does not exist.
    async fn delete_cursor(&self, stream: &str, durable: &str) -> BrokerResult<()>;

    /// Opens a pull subscription bound to an existing durable cursor.
    ///
    /// # Errors
    ///
    /// Returns `CursorNotFound` if the cursor does not exist.
    async fn pull_subscribe(
        &self,
        stream: &str,
        durable: &str,
    ) -> BrokerResult<Box<dyn PullSubscription>>;
}

/// A pull subscription bound to one durable cursor.
#[async_trait]
pub trait PullSubscription: Send {
    /// Fetches up to `request.batch_size` messages, waiting at most
    /// `request.max_wait` for the first one.
    ///
    /// An empty batch means the wait expired with nothing to deliver; it is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch request failed.
    async fn fetch(&mut self, request: FetchRequest) -> BrokerResult<Vec<FetchedMessage>>;

    /// Stops further fetches from reaching the broker. Subsequent fetches
    /// return an empty batch immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if pending broker-side requests could not be flushed.
    async fn drain(&mut self) -> BrokerResult<()>;

    /// Returns true once the subscription has been drained.
    fn is_drained(&self) -> bool;
}
