//! Fault configuration for the simulated broker.

/// Configuration for fault injection in the simulated broker.
///
/// Rates are probabilities drawn from the broker's seeded RNG; `force_*`
/// flags fail the next matching operation once and then reset.
#[derive(Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct BrokerFaultConfig {
    /// Probability of a fetch failing. Range: 0.0 - 1.0.
    pub fetch_fail_rate: f64,
    /// Probability of an acknowledgment failing. Range: 0.0 - 1.0.
    pub ack_fail_rate: f64,
    /// Probability of a fetched message losing its reply subject. Range: 0.0 - 1.0.
    pub strip_reply_rate: f64,
    /// If true, the next connect fails (one-shot).
    pub force_connect_fail: bool,
    /// If true, the next session derivation fails (one-shot).
    pub force_session_fail: bool,
    /// If true, the next stream or cursor lookup fails (one-shot).
    pub force_lookup_fail: bool,
    /// If true, the next stream or cursor create fails (one-shot).
    pub force_create_fail: bool,
    /// If true, the next stream update fails (one-shot).
    pub force_update_fail: bool,
    /// If true, the next stream or cursor delete fails (one-shot).
    pub force_delete_fail: bool,
    /// If true, the next fetch fails (one-shot).
    pub force_fetch_fail: bool,
    /// If true, the next acknowledgment fails (one-shot).
    pub force_ack_fail: bool,
    /// If true, the next fetched message has no reply subject (one-shot).
    pub force_strip_reply: bool,
}

impl BrokerFaultConfig {
    /// Creates a fault config with no faults (for basic testing).
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Creates a fault config that simulates a flaky broker.
    #[must_use]
    pub fn flaky() -> Self {
        Self {
            fetch_fail_rate: 0.05,
            ack_fail_rate: 0.02,
            strip_reply_rate: 0.01,
            ..Self::default()
        }
    }

    /// Sets the fetch failure rate.
    ///
    /// # Panics
    ///
    /// Panics if rate is not in range 0.0..=1.0.
    #[must_use]
    pub fn with_fetch_fail_rate(mut self, rate: f64) -> Self {
        assert!((0.0..=1.0).contains(&rate), "rate must be in 0.0..=1.0");
        self.fetch_fail_rate = rate;
        self
    }

    /// Sets the acknowledgment failure rate.
    ///
    /// # Panics
    ///
    /// Panics if rate is not in range 0.0..=1.0.
    #[must_use]
    pub fn with_ack_fail_rate(mut self, rate: f64) -> Self {
        assert!((0.0..=1.0).contains(&rate), "rate must be in 0.0..=1.0");
        self.ack_fail_rate = rate;
        self
    }

    /// Sets the reply-stripping rate.
    ///
    /// # Panics
    ///
    /// Panics if rate is not in range 0.0..=1.0.
    #[must_use]
    pub fn with_strip_reply_rate(mut self, rate: f64) -> Self {
        assert!((0.0..=1.0).contains(&rate), "rate must be in 0.0..=1.0");
        self.strip_reply_rate = rate;
        self
    }

    /// Forces the next connect to fail (one-shot).
    #[must_use]
    pub const fn with_force_connect_fail(mut self) -> Self {
        self.force_connect_fail = true;
        self
    }

    /// Forces the next session derivation to fail (one-shot).
    #[must_use]
    pub const fn with_force_session_fail(mut self) -> Self {
        self.force_session_fail = true;
        self
    }

    /// Forces the next lookup to fail (one-shot).
    #[must_use]
    pub const fn with_force_lookup_fail(mut self) -> Self {
        self.force_lookup_fail = true;
        self
    }

    /// Forces the next create to fail (one-shot).
    #[must_use]
    pub const fn with_force_create_fail(mut self) -> Self {
        self.force_create_fail = true;
        self
    }

    /// Forces the next update to fail (one-shot).
    #[must_use]
    pub const fn with_force_update_fail(mut self) -> Self {
        self.force_update_fail = true;
        self
    }

    /// Forces the next delete to fail (one-shot).
    #[must_use]
    pub const fn with_force_delete_fail(mut self) -> Self {
        self.force_delete_fail = true;
        self
    }

    /// Forces the next fetch to fail (one-shot).
    #[must_use]
    pub const fn with_force_fetch_fail(mut self) -> Self {
        self.force_fetch_fail = true;
        self
    }

    /// Forces the next acknowledgment to fail (one-shot).
    #[must_use]
    pub const fn with_force_ack_fail(mut self) -> Self {
        self.force_ack_fail = true;
        self
    }

    /// Strips the reply subject of the next fetched message (one-shot).
    #[must_use]
    pub const fn with_force_strip_reply(mut self) -> Self {
        self.force_strip_reply = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let config = BrokerFaultConfig::none()
            .with_fetch_fail_rate(0.5)
            .with_force_ack_fail();
        assert!((config.fetch_fail_rate - 0.5).abs() < f64::EPSILON);
        assert!(config.force_ack_fail);
        assert!(!config.force_fetch_fail);
    }

    #[test]
    #[should_panic(expected = "rate must be in 0.0..=1.0")]
    fn test_rate_out_of_range_panics() {
        let _ = BrokerFaultConfig::none().with_ack_fail_rate(1.5);
    }
}
