//! Consumer configuration.
//!
//! Every field passes through verbatim to the stream spec, cursor spec,
//! connect options or pull loop. Defaults live in `warden_core::defaults`.

use std::time::Duration;

use warden_broker::ConnectOptions;
use warden_core::{defaults, CoreError, DurableCursorSpec, StreamSpec};

use crate::error::ConsumerResult;

/// Configuration of the pull loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullConfig {
    /// Messages requested per fetch.
    pub batch_size: u32,
    /// Bounded wait of a single fetch.
    pub max_wait: Duration,
    /// Sleep after a fetch error.
    pub fetch_backoff: Duration,
    /// Delivery count at which a failing message is terminated.
    pub max_deliver: u32,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::PULL_BATCH_SIZE,
            max_wait: defaults::PULL_WAIT,
            fetch_backoff: defaults::FETCH_BACKOFF,
            max_deliver: defaults::MAX_DELIVER,
        }
    }
}

impl PullConfig {
    /// Validates the pull-loop settings.
    ///
    /// # Errors
    /// Returns `InvalidConfig` describing the first violated constraint.
    pub fn validate(&self) -> ConsumerResult<()> {
        if self.batch_size == 0 || self.batch_size > defaults::PULL_BATCH_SIZE_MAX {
            return Err(invalid(
                "batch_size",
                format!(
                    "must be in 1..={}, got {}",
                    defaults::PULL_BATCH_SIZE_MAX,
                    self.batch_size
                ),
            ));
        }
        if self.max_wait.is_zero() {
            return Err(invalid("max_wait", "must be positive".to_string()));
        }
        if self.max_deliver == 0 {
            return Err(invalid("max_deliver", "must be positive".to_string()));
        }
        Ok(())
    }
}

/// Full configuration of a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Broker address.
    pub address: String,
    /// Client name announced to the broker.
    pub client_name: String,
    /// Timeout of the initial connection.
    pub connect_timeout: Duration,
    /// Desired stream.
    pub stream: StreamSpec,
    /// Desired durable cursor.
    pub cursor: DurableCursorSpec,
    /// Whether the stream is created or updated at startup.
    pub create_stream: bool,
    /// Messages requested per fetch.
    pub batch_size: u32,
    /// Bounded wait of a single fetch.
    pub max_wait: Duration,
    /// Sleep after a fetch error.
    pub fetch_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            address: defaults::BROKER_ADDRESS.to_string(),
            client_name: defaults::CLIENT_NAME.to_string(),
            connect_timeout: defaults::CONNECT_TIMEOUT,
            stream: StreamSpec::default(),
            cursor: DurableCursorSpec::default(),
            create_stream: defaults::CREATE_STREAM,
            batch_size: defaults::PULL_BATCH_SIZE,
            max_wait: defaults::PULL_WAIT,
            fetch_backoff: defaults::FETCH_BACKOFF,
        }
    }
}

impl ConsumerConfig {
    /// Creates a config for the given broker address with defaults elsewhere.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Creates a config suitable for testing (short waits).
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            address: "sim://local".to_string(),
            max_wait: Duration::from_millis(500),
            fetch_backoff: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// Sets the stream spec.
    #[must_use]
    pub fn with_stream(mut self, stream: StreamSpec) -> Self {
        self.stream = stream;
        self
    }

    /// Sets the cursor spec.
    #[must_use]
    pub fn with_cursor(mut self, cursor: DurableCursorSpec) -> Self {
        self.cursor = cursor;
        self
    }

    /// Sets whether the stream is ensured at startup.
    #[must_use]
    pub const fn with_create_stream(mut self, create_stream: bool) -> Self {
        self.create_stream = create_stream;
        self
    }

    /// Sets the fetch batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the bounded fetch wait.
    #[must_use]
    pub const fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Sets the fetch error backoff.
    #[must_use]
    pub const fn with_fetch_backoff(mut self, fetch_backoff: Duration) -> Self {
        self.fetch_backoff = fetch_backoff;
        self
    }

    /// Returns the link options.
    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            name: self.client_name.clone(),
            connect_timeout: self.connect_timeout,
        }
    }

    /// Returns the pull-loop configuration.
    #[must_use]
    pub const fn pull_config(&self) -> PullConfig {
        PullConfig {
            batch_size: self.batch_size,
            max_wait: self.max_wait,
            fetch_backoff: self.fetch_backoff,
            max_deliver: self.cursor.max_deliver,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` describing the first violated constraint.
    pub fn validate(&self) -> ConsumerResult<()> {
        if self.address.is_empty() {
            return Err(invalid("address", "must not be empty".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(invalid("connect_timeout", "must be positive".to_string()));
        }
        self.stream.validate()?;
        self.cursor.validate(&self.stream)?;
        self.pull_config().validate()
    }
}

fn invalid(field: &'static str, reason: String) -> crate::ConsumerError {
    crate::ConsumerError::InvalidConfig(CoreError::InvalidSpec { field, reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ConsumerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.address, "nats://localhost:4222");
        assert_eq!(config.stream.name, "EVENTS");
        assert_eq!(config.cursor.durable_name, "events-audit-durable");
        assert_eq!(config.cursor.description, "events-audit-consumer");
        assert!(config.create_stream);
    }

    #[test]
    fn test_pull_config_takes_max_deliver_from_cursor() {
        let config = ConsumerConfig::for_testing()
            .with_cursor(DurableCursorSpec::default().with_max_deliver(7))
            .with_batch_size(3);
        let pull = config.pull_config();
        assert_eq!(pull.max_deliver, 7);
        assert_eq!(pull.batch_size, 3);
        assert_eq!(pull.max_wait, Duration::from_millis(500));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ConsumerConfig::new("").validate().is_err());
        assert!(ConsumerConfig::default().with_batch_size(0).validate().is_err());
        assert!(ConsumerConfig::default()
            .with_max_wait(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ConsumerConfig::default()
            .with_cursor(DurableCursorSpec::new("durable", "orders.>"))
            .validate()
            .is_err());
    }

    #[test]
    fn test_pull_config_rejects_zero_values() {
        assert!(PullConfig::default().validate().is_ok());
        for (field, config) in [
            ("max_deliver", PullConfig { max_deliver: 0, ..PullConfig::default() }),
            ("batch_size", PullConfig { batch_size: 0, ..PullConfig::default() }),
            ("max_wait", PullConfig { max_wait: Duration::ZERO, ..PullConfig::default() }),
        ] {
            let err = config.validate().unwrap_err();
            assert!(
                matches!(
                    &err,
                    crate::ConsumerError::InvalidConfig(CoreError::InvalidSpec { field: f, .. }) if *f == field
                ),
                "unexpected {err:?} for {field}"
            );
        }
    }
}
