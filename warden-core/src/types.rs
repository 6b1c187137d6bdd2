//! Strongly-typed sequence numbers and the per-message disposition.
//!
//! Following `TigerStyle`: explicit types prevent bugs from mixing up a
//! stream sequence with a cursor sequence or a session generation.

use std::fmt;

/// Macro to generate strongly-typed sequence wrappers.
///
/// Each type wraps a u64 and provides:
/// - Type safety (can't mix `StreamSequence` with `CursorSequence`)
/// - Debug/Display formatting
/// - Zero-cost abstraction (same as raw u64)
macro_rules! define_sequence {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new value from a raw u64.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Returns the next value in sequence.
            ///
            /// # Panics
            /// Panics if the value would overflow.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Self {
                assert!(self.0 < u64::MAX, "sequence overflow");
                Self(self.0 + 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(seq: $name) -> Self {
                seq.get()
            }
        }
    };
}

define_sequence!(StreamSequence, "sseq", "Position of a message in its stream.");
define_sequence!(CursorSequence, "cseq", "Delivery position of a message on a durable cursor.");
define_sequence!(
    SessionGeneration,
    "gen",
    "Generation of a broker session; bumped on every successful re-derivation."
);

/// What the engine tells the broker about one dispatched message.
///
/// Derived per message from the handler outcome and the delivery count.
/// Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Handler succeeded; the message is acknowledged.
    Ack,
    /// Handler failed below the delivery limit; the broker redelivers.
    Retry,
    /// Handler failed at or over the delivery limit; the message is
    /// removed from redelivery permanently.
    Terminal,
}

impl Disposition {
    /// Decides the disposition for a handled message.
    ///
    /// `delivered` is the cumulative delivery count reported by the broker,
    /// including the current delivery. A failure on the `max_deliver`-th
    /// delivery (or later) is terminal.
    ///
    /// # Panics
    ///
    /// Panics if `max_deliver` is zero.
    #[must_use]
    pub fn decide(handler_succeeded: bool, delivered: u64, max_deliver: u32) -> Self {
        assert!(max_deliver > 0, "max_deliver must be positive");

        if handler_succeeded {
            Self::Ack
        } else if delivered >= u64::from(max_deliver) {
            Self::Terminal
        } else {
            Self::Retry
        }
    }

    /// Short lowercase name for log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Retry => "retry",
            Self::Terminal => "terminal",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
