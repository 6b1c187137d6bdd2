//! Desired broker topology: the stream and the durable cursor over it.
//!
//! Both specs are supplied at startup, validated once, and then compared
//! against live broker state by the reconciler. Broker policy choices are
//! explicit enums; the `#[default]` variant is what the consumer asks for
//! when nothing is configured.

use std::time::Duration;

use crate::defaults;
use crate::error::{CoreError, CoreResult};
use crate::subject;

// -----------------------------------------------------------------------------
// Broker policy enums
// -----------------------------------------------------------------------------

/// Where the broker persists stream data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageClass {
    /// On-disk storage.
    #[default]
    File,
    /// In-memory storage; lost on broker restart.
    Memory,
}

/// When the broker may discard messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RetentionPolicy {
    /// Messages are retained until a retention limit is hit.
    #[default]
    Limits,
    /// Messages are retained while any cursor has interest.
    Interest,
    /// Messages are removed once acknowledged.
    WorkQueue,
}

/// Which messages go when a retention limit is hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DiscardPolicy {
    /// Oldest messages are dropped to make room.
    #[default]
    Old,
    /// New messages are rejected.
    New,
}

/// Where a new cursor starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeliverPolicy {
    /// From the first message in the stream.
    #[default]
    All,
    /// From the last message in the stream.
    Last,
    /// Only messages published after the cursor is created.
    New,
    /// From the last message of each subject.
    LastPerSubject,
}

/// Pace at which stored messages are replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReplayPolicy {
    /// As fast as the consumer pulls.
    #[default]
    Instant,
    /// At the rate they were originally published.
    Original,
}

/// How the broker hands messages to the cursor's client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeliveryMode {
    /// The client fetches batches on demand.
    #[default]
    Pull,
    /// The broker pushes to a deliver subject.
    Push,
}

/// How deliveries are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AckMode {
    /// Every message must be acknowledged individually.
    #[default]
    Explicit,
}

// -----------------------------------------------------------------------------
// StreamSpec
// -----------------------------------------------------------------------------

/// Retention limits of a stream. These are the only stream fields the
/// reconciler updates in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionLimits {
    /// Maximum age of a stored message.
    pub max_age: Duration,
    /// Maximum total bytes stored.
    pub max_bytes: i64,
    /// Maximum number of stored messages.
    pub max_messages: i64,
}

impl Default for RetentionLimits {
    fn default() -> Self {
        Self {
            max_age: defaults::STREAM_MAX_AGE,
            max_bytes: defaults::STREAM_MAX_BYTES,
            max_messages: defaults::STREAM_MAX_MESSAGES,
        }
    }
}

/// Desired configuration of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    /// Stream name.
    pub name: String,
    /// Subject pattern captured by the stream.
    pub subject: String,
    /// Retention limits.
    pub limits: RetentionLimits,
    /// Replica count.
    pub replicas: u32,
    /// Storage class. Never changed in place.
    pub storage: StorageClass,
    /// Retention policy.
    pub retention: RetentionPolicy,
    /// Discard policy.
    pub discard: DiscardPolicy,
}

impl Default for StreamSpec {
    fn default() -> Self {
        Self {
            name: defaults::STREAM_NAME.to_string(),
            subject: defaults::SUBJECT.to_string(),
            limits: RetentionLimits::default(),
            replicas: defaults::STREAM_REPLICAS,
            storage: StorageClass::default(),
            retention: RetentionPolicy::default(),
            discard: DiscardPolicy::default(),
        }
    }
}

impl StreamSpec {
    /// Creates a spec with the given name and subject and default limits.
    #[must_use]
    pub fn new(name: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subject: subject.into(),
            ..Self::default()
        }
    }

    /// Sets the retention limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: RetentionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the replica count.
    #[must_use]
    pub const fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    /// Sets the storage class.
    #[must_use]
    pub const fn with_storage(mut self, storage: StorageClass) -> Self {
        self.storage = storage;
        self
    }

    /// Validates the spec.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpec` or `InvalidSubject` describing the first
    /// violated constraint.
    pub fn validate(&self) -> CoreResult<()> {
        validate_name("stream name", &self.name)?;
        subject::validate_pattern(&self.subject)?;

        if self.replicas == 0 || self.replicas > defaults::STREAM_REPLICAS_MAX {
            return Err(CoreError::InvalidSpec {
                field: "replicas",
                reason: format!(
                    "must be in 1..={}, got {}",
                    defaults::STREAM_REPLICAS_MAX,
                    self.replicas
                ),
            });
        }
        if self.limits.max_age.is_zero() {
            return Err(CoreError::InvalidSpec {
                field: "max_age",
                reason: "must be positive".to_string(),
            });
        }
        if self.limits.max_bytes <= 0 {
            return Err(CoreError::InvalidSpec {
                field: "max_bytes",
                reason: format!("must be positive, got {}", self.limits.max_bytes),
            });
        }
        if self.limits.max_messages <= 0 {
            return Err(CoreError::InvalidSpec {
                field: "max_messages",
                reason: format!("must be positive, got {}", self.limits.max_messages),
            });
        }
        Ok(())
    }

    /// Returns true if `live` differs from this spec in a field that is
    /// updated in place (max age, max bytes, max messages).
    #[must_use]
    pub fn needs_update(&self, live: &Self) -> bool {
        self.limits != live.limits
    }
}

// -----------------------------------------------------------------------------
// DurableCursorSpec
// -----------------------------------------------------------------------------

/// Desired configuration of the durable cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableCursorSpec {
    /// Durable name; the cursor's identity on the broker.
    pub durable_name: String,
    /// Human-readable label.
    pub description: String,
    /// Subject filter; equal to or narrower than the stream subject.
    pub subject: String,
    /// Delivery mode. Must be pull.
    pub delivery: DeliveryMode,
    /// Acknowledgment mode.
    pub ack: AckMode,
    /// Maximum delivery attempts per message.
    pub max_deliver: u32,
    /// Acknowledgment deadline per delivery.
    pub ack_wait: Duration,
    /// Start position for a new cursor.
    pub deliver_policy: DeliverPolicy,
    /// Replay pace.
    pub replay_policy: ReplayPolicy,
}

impl Default for DurableCursorSpec {
    fn default() -> Self {
        Self {
            durable_name: defaults::DURABLE_NAME.to_string(),
            description: defaults::CONSUMER_LABEL.to_string(),
            subject: defaults::SUBJECT.to_string(),
            delivery: DeliveryMode::default(),
            ack: AckMode::default(),
            max_deliver: defaults::MAX_DELIVER,
            ack_wait: defaults::ACK_WAIT,
            deliver_policy: DeliverPolicy::default(),
            replay_policy: ReplayPolicy::default(),
        }
    }
}

impl DurableCursorSpec {
    /// Creates a pull cursor spec with the given name and filter.
    #[must_use]
    pub fn new(durable_name: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            durable_name: durable_name.into(),
            subject: subject.into(),
            ..Self::default()
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the maximum delivery attempts.
    #[must_use]
    pub const fn with_max_deliver(mut self, max_deliver: u32) -> Self {
        self.max_deliver = max_deliver;
        self
    }

    /// Sets the acknowledgment deadline.
    #[must_use]
    pub const fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    /// Sets the deliver policy.
    #[must_use]
    pub const fn with_deliver_policy(mut self, policy: DeliverPolicy) -> Self {
        self.deliver_policy = policy;
        self
    }

    /// Validates the spec against the stream it will live on.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpec` or `InvalidSubject` describing the first
    /// violated constraint.
    pub fn validate(&self, stream: &StreamSpec) -> CoreResult<()> {
        validate_name("durable name", &self.durable_name)?;
        subject::validate_pattern(&self.subject)?;

        if !subject::is_subset(&self.subject, &stream.subject) {
            return Err(CoreError::InvalidSpec {
                field: "cursor subject",
                reason: format!(
                    "'{}' is not within stream subject '{}'",
                    self.subject, stream.subject
                ),
            });
        }
        if self.delivery != DeliveryMode::Pull {
            return Err(CoreError::InvalidSpec {
                field: "delivery mode",
                reason: "durable cursor must be pull".to_string(),
            });
        }
        if self.max_deliver == 0 {
            return Err(CoreError::InvalidSpec {
                field: "max_deliver",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.ack_wait.is_zero() {
            return Err(CoreError::InvalidSpec {
                field: "ack_wait",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn validate_name(field: &'static str, name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::InvalidSpec {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    if name
        .chars()
        .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace())
    {
        return Err(CoreError::InvalidSpec {
            field,
            reason: format!("'{name}' must not contain '.', '*', '>' or whitespace"),
        });
    }
    Ok(())
}
