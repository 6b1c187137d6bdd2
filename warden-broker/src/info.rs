//! Live broker state as reported by a session.

use std::time::Duration;

use warden_core::{CursorSequence, DeliverPolicy, DurableCursorSpec, ReplayPolicy, StreamSpec};

/// Live configuration and state of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Live configuration, expressed in the same terms as the desired spec.
    pub spec: StreamSpec,
    /// Current contents.
    pub state: StreamState,
}

/// Current contents of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamState {
    /// Stored message count.
    pub messages: u64,
    /// Stored bytes.
    pub bytes: u64,
    /// First stored stream sequence.
    pub first_sequence: u64,
    /// Last assigned stream sequence.
    pub last_sequence: u64,
    /// Number of cursors on the stream.
    pub cursor_count: usize,
}

/// Live configuration of a durable cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorConfig {
    /// Durable name.
    pub durable_name: String,
    /// Description.
    pub description: String,
    /// Subject filter.
    pub filter_subject: String,
    /// Push target. `Some` means the cursor is push-style.
    pub deliver_subject: Option<String>,
    /// Acknowledgment deadline.
    pub ack_wait: Duration,
    /// Maximum delivery attempts.
    pub max_deliver: u32,
    /// Start position.
    pub deliver_policy: DeliverPolicy,
    /// Replay pace.
    pub replay_policy: ReplayPolicy,
}

impl CursorConfig {
    /// Builds a pull-cursor configuration from the desired spec.
    #[must_use]
    pub fn pull(spec: &DurableCursorSpec) -> Self {
        Self {
            durable_name: spec.durable_name.clone(),
            description: spec.description.clone(),
            filter_subject: spec.subject.clone(),
            deliver_subject: None,
            ack_wait: spec.ack_wait,
            max_deliver: spec.max_deliver,
            deliver_policy: spec.deliver_policy,
            replay_policy: spec.replay_policy,
        }
    }

    /// Returns true if the cursor pushes to a deliver subject.
    #[must_use]
    pub const fn is_push(&self) -> bool {
        self.deliver_subject.is_some()
    }

    /// Names the fields where this live config differs from the desired spec.
    #[must_use]
    pub fn drift_from(&self, spec: &DurableCursorSpec) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.filter_subject != spec.subject {
            fields.push("filter_subject");
        }
        if self.ack_wait != spec.ack_wait {
            fields.push("ack_wait");
        }
        if self.max_deliver != spec.max_deliver {
            fields.push("max_deliver");
        }
        if self.deliver_policy != spec.deliver_policy {
            fields.push("deliver_policy");
        }
        if self.replay_policy != spec.replay_policy {
            fields.push("replay_policy");
        }
        fields
    }
}

/// Live configuration and delivery state of a durable cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorInfo {
    /// Owning stream.
    pub stream: String,
    /// Live configuration.
    pub config: CursorConfig,
    /// Deliveries awaiting acknowledgment.
    pub num_ack_pending: u64,
    /// Last delivered cursor sequence.
    pub delivered: CursorSequence,
    /// Messages delivered more than once.
    pub num_redelivered: u64,
    /// Matching messages not yet delivered.
    pub num_pending: u64,
}

impl CursorInfo {
    /// Returns true if the cursor is push-style.
    #[must_use]
    pub const fn is_push(&self) -> bool {
        self.config.is_push()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_config_has_no_drift() {
        let spec = DurableCursorSpec::default();
        let config = CursorConfig::pull(&spec);
        assert!(!config.is_push());
        assert!(config.drift_from(&spec).is_empty());
    }

    #[test]
    fn test_drift_names_changed_fields() {
        let spec = DurableCursorSpec::default();
        let mut config = CursorConfig::pull(&spec);
        config.max_deliver = 9;
        config.ack_wait = Duration::from_secs(1);
        // Description is a label, not drift.
        config.description = "other".to_string();

        assert_eq!(config.drift_from(&spec), vec!["ack_wait", "max_deliver"]);
    }
}
