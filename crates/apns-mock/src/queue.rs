use apns_common::Token;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Unbounded FIFO of tokens waiting to be reported on the feedback service.
///
/// Gateway sessions push, feedback sessions pop. Each token is handed to
/// exactly one consumer; concurrent consumers compete for entries. Once
/// [closed](Self::close), pushes are refused and every pending and future
/// [`pop`](Self::pop) returns `None`.
#[derive(Debug, Default)]
pub struct FeedbackQueue {
    tokens: Mutex<VecDeque<Token>>,
    notify: Notify,
    closed: AtomicBool,
}

impl FeedbackQueue {
    /// Creates an empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tokens(&self) -> MutexGuard<'_, VecDeque<Token>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a token. Returns `false` if the queue is closed.
    pub fn push(&self, token: Token) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tokens().push_back(token);
        self.notify.notify_one();
        true
    }

    /// Removes the oldest token without waiting.
    #[must_use]
    pub fn try_pop(&self) -> Option<Token> {
        if self.is_closed() {
            return None;
        }
        self.tokens().pop_front()
    }

    /// Waits for the oldest token. Returns `None` once the queue is closed.
    ///
    /// Cancel-safe: a token is only removed in the same poll that returns it.
    pub async fn pop(&self) -> Option<Token> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before checking so a concurrent push cannot be missed
            notified.as_mut().enable();

            if self.is_closed() {
                return None;
            }
            if let Some(token) = self.tokens().pop_front() {
                return Some(token);
            }
            notified.await;
        }
    }

    /// Closes the queue and wakes every waiting consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of queued tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens().len()
    }

    /// Returns `true` if no tokens are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens().is_empty()
    }
}
