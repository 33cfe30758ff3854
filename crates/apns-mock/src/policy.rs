//! Failure and feedback injection.
//!
//! A [`DecisionPolicy`] is consulted once per decoded push frame: first
//! [`should_feedback`](DecisionPolicy::should_feedback), then
//! [`next_error`](DecisionPolicy::next_error). Frames rejected for an invalid
//! token never reach the policy.

use apns_common::ErrorCode;
use rand::Rng;
use std::fmt;
use std::sync::Arc;

/// Decides how the gateway reacts to each well-formed frame.
pub trait DecisionPolicy: Send + Sync + fmt::Debug {
    /// Error to report for the current frame, if any. Returning a code makes
    /// the gateway answer with it and close the connection.
    fn next_error(&self) -> Option<ErrorCode>;

    /// Whether the current frame's token should be reported on the feedback
    /// service.
    fn should_feedback(&self) -> bool;
}

/// Never injects errors or feedback.
#[derive(Debug, Default, Clone, Copy)]
pub struct Disabled;

impl DecisionPolicy for Disabled {
    fn next_error(&self) -> Option<ErrorCode> {
        None
    }

    fn should_feedback(&self) -> bool {
        false
    }
}

/// Coin-flip injection; each half can be switched on independently.
#[derive(Debug, Clone, Copy)]
pub struct Randomized {
    errors: bool,
    feedback: bool,
}

impl Randomized {
    /// Lowest error code picked by the random policy.
    pub const MIN_CODE: u8 = 1;
    /// Highest error code picked by the random policy.
    pub const MAX_CODE: u8 = 8;

    /// Creates a policy injecting errors and/or feedback with probability 0.5.
    #[must_use]
    pub const fn new(errors: bool, feedback: bool) -> Self {
        Self { errors, feedback }
    }
}

impl DecisionPolicy for Randomized {
    fn next_error(&self) -> Option<ErrorCode> {
        if !self.errors {
            return None;
        }
        let mut rng = rand::thread_rng();
        if !rng.gen_bool(0.5) {
            return None;
        }
        ErrorCode::try_from(rng.gen_range(Self::MIN_CODE..=Self::MAX_CODE)).ok()
    }

    fn should_feedback(&self) -> bool {
        self.feedback && rand::thread_rng().gen_bool(0.5)
    }
}

/// Builds the policy selected by the two injection switches.
#[must_use]
pub fn from_flags(random_errors: bool, random_feedback: bool) -> Arc<dyn DecisionPolicy> {
    if random_errors || random_feedback {
        Arc::new(Randomized::new(random_errors, random_feedback))
    } else {
        Arc::new(Disabled)
    }
}
