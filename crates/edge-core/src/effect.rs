//! Error classification shared by every layer that decides whether to retry.

use crate::enum_str;

/// Whether retrying the failed operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retrying with the same inputs will fail the same way.
    Permanent,
    /// Dial failures, timeouts and resets; a later attempt may succeed.
    Retryable,
    /// The failure happened somewhere we cannot classify.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// What is known about remote side effects when an error is returned.
///
/// An event write that times out waiting for its ack is `Unknown`: Mirage
/// may already have ingested it, which is why acks are idempotent.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    None,
    Some,
    Unknown,
}

enum_str! {
    impl Transience {
        pub fn as_str(&self) -> &'static str;
        pub fn parse_str(raw: &str) -> Option<Self>;
        variants {
            Permanent => ["permanent"],
            Retryable => ["retryable"],
            Unknown => ["unknown"],
        }
    }
}

enum_str! {
    impl Effect {
        pub fn as_str(&self) -> &'static str;
        pub fn parse_str(raw: &str) -> Option<Self>;
        variants {
            None => ["none"],
            Some => ["some"],
            Unknown => ["unknown"],
        }
    }
}
