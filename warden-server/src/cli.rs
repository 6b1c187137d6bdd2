//! Command-line interface.
//!
//! Every flag can also be set through a `WARDEN_*` environment variable.
//! Durations accept humane strings such as `30s`, `5m` or `24h`.

use std::net::SocketAddr;

use clap::{ArgAction, Parser, ValueEnum};
use warden_consumer::ConsumerConfig;
use warden_core::{defaults, DurableCursorSpec, RetentionLimits, StreamSpec};

use crate::error::{ServerError, ServerResult};
use crate::event_logger::EventLogMode;
use crate::logging::LogFormat;

/// Audit backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AuditBackend {
    /// Consume events from a NATS `JetStream` stream.
    Nats,
    /// Auditing disabled; the process exits immediately.
    #[default]
    Nope,
}

/// Warden audit listener.
#[derive(Parser, Debug, Clone)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log level or filter directive (trace, debug, info, warn, error).
    #[arg(long, env = "WARDEN_LOG_LEVEL", default_value = "debug")]
    pub log_level: String,

    /// Log line format.
    #[arg(long, env = "WARDEN_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Address of the health endpoint.
    #[arg(long, env = "WARDEN_HEALTH_ADDR", default_value = "0.0.0.0:3000")]
    pub health_addr: SocketAddr,

    /// Audit backend.
    #[arg(long, env = "WARDEN_AUDIT", value_enum, default_value_t = AuditBackend::Nope)]
    pub audit: AuditBackend,

    /// How message payloads are logged.
    #[arg(long, env = "WARDEN_EVENT_LOG_MODE", value_enum, default_value_t = EventLogMode::Structured)]
    pub event_log_mode: EventLogMode,

    /// Broker address.
    #[arg(long, env = "WARDEN_NATS_ADDR", default_value = defaults::BROKER_ADDRESS)]
    pub nats_addr: String,

    /// Subject filter for both the stream and the cursor.
    #[arg(long, env = "WARDEN_SUBJECT", default_value = defaults::SUBJECT)]
    pub subject: String,

    /// Stream name.
    #[arg(long, env = "WARDEN_STREAM_NAME", default_value = defaults::STREAM_NAME)]
    pub stream_name: String,

    /// Consumer label, stored as the cursor description.
    #[arg(long, env = "WARDEN_CONSUMER_NAME", default_value = defaults::CONSUMER_LABEL)]
    pub consumer_name: String,

    /// Durable cursor name.
    #[arg(long, env = "WARDEN_DURABLE_NAME", default_value = defaults::DURABLE_NAME)]
    pub durable_name: String,

    /// Create or update the stream at startup.
    #[arg(
        long,
        env = "WARDEN_CREATE_STREAM",
        action = ArgAction::Set,
        default_value_t = defaults::CREATE_STREAM
    )]
    pub create_stream: bool,

    /// Maximum delivery attempts before a failing message is terminated.
    #[arg(long, env = "WARDEN_MAX_DELIVER", default_value_t = defaults::MAX_DELIVER)]
    pub max_deliver: u32,

    /// Per-message acknowledgment deadline.
    #[arg(long, env = "WARDEN_ACK_WAIT", default_value_t = defaults::ACK_WAIT.into())]
    pub ack_wait: humantime::Duration,

    /// Messages requested per fetch.
    #[arg(long, env = "WARDEN_PULL_MAX_MESSAGES", default_value_t = defaults::PULL_BATCH_SIZE)]
    pub pull_max_messages: u32,

    /// Bounded wait of a single fetch.
    #[arg(long, env = "WARDEN_PULL_TIMEOUT", default_value_t = defaults::PULL_WAIT.into())]
    pub pull_timeout: humantime::Duration,

    /// Sleep after a fetch error.
    #[arg(long, env = "WARDEN_FETCH_BACKOFF", default_value_t = defaults::FETCH_BACKOFF.into())]
    pub fetch_backoff: humantime::Duration,

    /// Timeout of the initial connection.
    #[arg(long, env = "WARDEN_CONNECT_TIMEOUT", default_value_t = defaults::CONNECT_TIMEOUT.into())]
    pub connect_timeout: humantime::Duration,

    /// Stream retention: maximum message age.
    #[arg(long, env = "WARDEN_STREAM_MAX_AGE", default_value_t = defaults::STREAM_MAX_AGE.into())]
    pub stream_max_age: humantime::Duration,

    /// Stream retention: maximum bytes.
    #[arg(long, env = "WARDEN_STREAM_MAX_BYTES", default_value_t = defaults::STREAM_MAX_BYTES)]
    pub stream_max_bytes: i64,

    /// Stream retention: maximum message count.
    #[arg(long, env = "WARDEN_STREAM_MAX_MSGS", default_value_t = defaults::STREAM_MAX_MESSAGES)]
    pub stream_max_msgs: i64,

    /// Stream replica count.
    #[arg(long, env = "WARDEN_STREAM_REPLICAS", default_value_t = defaults::STREAM_REPLICAS)]
    pub stream_replicas: u32,
}

impl Args {
    /// Builds the consumer configuration and validates it.
    ///
    /// # Errors
    /// Returns `InvalidArgs` if the broker address is empty, or `Consumer`
    /// if the resulting configuration is invalid.
    pub fn consumer_config(&self) -> ServerResult<ConsumerConfig> {
        if self.nats_addr.trim().is_empty() {
            return Err(ServerError::InvalidArgs {
                message: "a broker address is required when audit is 'nats'".to_string(),
            });
        }

        let limits = RetentionLimits {
            max_age: self.stream_max_age.into(),
            max_bytes: self.stream_max_bytes,
            max_messages: self.stream_max_msgs,
        };
        let stream = StreamSpec::new(&self.stream_name, &self.subject)
            .with_limits(limits)
            .with_replicas(self.stream_replicas);
        let cursor = DurableCursorSpec::new(&self.durable_name, &self.subject)
            .with_description(&self.consumer_name)
            .with_max_deliver(self.max_deliver)
            .with_ack_wait(self.ack_wait.into());

        let config = ConsumerConfig {
            address: self.nats_addr.clone(),
            client_name: defaults::CLIENT_NAME.to_string(),
            connect_timeout: self.connect_timeout.into(),
            stream,
            cursor,
            create_stream: self.create_stream,
            batch_size: self.pull_max_messages,
            max_wait: self.pull_timeout.into(),
            fetch_backoff: self.fetch_backoff.into(),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_defaults_match_consumer_defaults() {
        let args = Args::try_parse_from(["warden"]).unwrap();
        assert_eq!(args.audit, AuditBackend::Nope);
        assert_eq!(args.log_level, "debug");
        assert_eq!(args.log_format, LogFormat::Text);
        assert_eq!(args.health_addr, "0.0.0.0:3000".parse().unwrap());

        let config = args.consumer_config().unwrap();
        assert_eq!(config, ConsumerConfig::default());
    }

    #[test]
    fn test_humane_durations_and_overrides() {
        let args = Args::try_parse_from([
            "warden",
            "--audit",
            "nats",
            "--nats-addr",
            "nats://broker:4222",
            "--subject",
            "audit.>",
            "--stream-name",
            "AUDIT",
            "--create-stream",
            "false",
            "--ack-wait",
            "45s",
            "--pull-timeout",
            "250ms",
            "--stream-max-age",
            "7days",
            "--max-deliver",
            "5",
        ])
        .unwrap();
        assert_eq!(args.audit, AuditBackend::Nats);

        let config = args.consumer_config().unwrap();
        assert_eq!(config.address, "nats://broker:4222");
        assert!(!config.create_stream);
        assert_eq!(config.stream.name, "AUDIT");
        assert_eq!(config.stream.subject, "audit.>");
        assert_eq!(config.cursor.subject, "audit.>");
        assert_eq!(config.cursor.ack_wait, Duration::from_secs(45));
        assert_eq!(config.cursor.max_deliver, 5);
        assert_eq!(config.max_wait, Duration::from_millis(250));
        assert_eq!(
            config.stream.limits.max_age,
            Duration::from_secs(7 * 24 * 60 * 60)
        );
    }

    #[test]
    fn test_empty_address_is_rejected() {
        let args = Args::try_parse_from(["warden", "--nats-addr", ""]).unwrap();
        assert!(matches!(
            args.consumer_config(),
            Err(ServerError::InvalidArgs { .. })
        ));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Args::try_parse_from(["warden", "--audit", "nsq"]).is_err());
        assert!(Args::try_parse_from(["warden", "--ack-wait", "soon"]).is_err());

        let args = Args::try_parse_from(["warden", "--pull-max-messages", "0"]).unwrap();
        assert!(matches!(
            args.consumer_config(),
            Err(ServerError::Consumer(_))
        ));
    }
}
