//! Default values for every tunable.
//!
//! Following `TigerStyle`: put limits on everything. Each value the
//! operator can override has exactly one named default here, and the
//! configuration layers only ever pass these through.

use std::time::Duration;

/// Broker address used when none is configured.
pub const BROKER_ADDRESS: &str = "nats://localhost:4222";

/// Client name announced to the broker.
pub const CLIENT_NAME: &str = "warden-jetstream-listener";

/// Subject filter for both the stream and the cursor.
pub const SUBJECT: &str = "events.>";

/// Stream name.
pub const STREAM_NAME: &str = "EVENTS";

/// Human-readable consumer label stored as the cursor description.
pub const CONSUMER_LABEL: &str = "events-audit-consumer";

/// Durable cursor name.
pub const DURABLE_NAME: &str = "events-audit-durable";

/// Transport connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum delivery attempts before a failing message is terminated.
pub const MAX_DELIVER: u32 = 3;

/// Per-message acknowledgment deadline.
pub const ACK_WAIT: Duration = Duration::from_secs(30);

/// Messages requested per fetch.
pub const PULL_BATCH_SIZE: u32 = 10;

/// Bounded wait of a single fetch.
pub const PULL_WAIT: Duration = Duration::from_secs(5);

/// Sleep after a fetch error before the next attempt.
pub const FETCH_BACKOFF: Duration = Duration::from_secs(1);

/// Whether the stream is created or updated at startup.
pub const CREATE_STREAM: bool = true;

/// Stream retention: maximum message age (24 hours).
pub const STREAM_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Stream retention: maximum bytes (1 GiB).
pub const STREAM_MAX_BYTES: i64 = 1024 * 1024 * 1024;

/// Stream retention: maximum message count (1M messages).
pub const STREAM_MAX_MESSAGES: i64 = 1_000_000;

/// Stream replica count.
pub const STREAM_REPLICAS: u32 = 1;

/// Upper bound on the replica count a broker cluster accepts.
pub const STREAM_REPLICAS_MAX: u32 = 5;

/// Upper bound on a single fetch batch.
pub const PULL_BATCH_SIZE_MAX: u32 = 10_000;
