//! Feedback side of the mock: streams queued tokens to connected clients.

use crate::error::MockError;
use crate::metrics::counters;
use crate::queue::FeedbackQueue;
use apns_common::frame::FeedbackRecord;
use apns_common::types::unix_now;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// How a feedback session ended without a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackEnd {
    /// The queue was closed because the server is shutting down.
    QueueClosed {
        /// Records written before the queue closed.
        delivered: u64,
    },
    /// The client closed the connection.
    ClientClosed {
        /// Records written before the client left.
        delivered: u64,
    },
}

/// One feedback connection draining the shared [`FeedbackQueue`].
#[derive(Debug)]
pub struct FeedbackSession {
    queue: Arc<FeedbackQueue>,
}

impl FeedbackSession {
    /// Creates a session draining `queue`.
    #[must_use]
    pub fn new(queue: Arc<FeedbackQueue>) -> Self {
        Self { queue }
    }

    /// Writes one record per dequeued token until the queue closes or the
    /// client disconnects.
    ///
    /// A token is gone from the queue once dequeued; if writing its record
    /// fails it is not put back.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Io`] if reading from or writing to the client
    /// fails.
    pub async fn run<S>(self, stream: S) -> Result<FeedbackEnd, MockError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        // clients never send anything; reads only detect disconnects
        let mut discard = [0u8; 64];
        let mut delivered = 0u64;

        loop {
            let token = tokio::select! {
                token = self.queue.pop() => match token {
                    Some(token) => token,
                    None => break,
                },
                read = reader.read(&mut discard) => {
                    if read? == 0 {
                        return Ok(FeedbackEnd::ClientClosed { delivered });
                    }
                    continue;
                }
            };

            let record = FeedbackRecord::new(unix_now(), token);
            writer.write_all(&record.serialize()).await?;
            writer.flush().await?;
            delivered += 1;
            counters::feedback_delivered_total();
            debug!(token = %token, "delivered feedback");
        }

        if let Err(e) = writer.shutdown().await {
            debug!("failed to close feedback connection: {}", e);
        }
        Ok(FeedbackEnd::QueueClosed { delivered })
    }
}
