//! Gateway side of the mock: one [`GatewaySession`] per accepted connection.
//!
//! The session reads the socket into a [`FrameDecoder`] and handles every
//! complete frame in arrival order. A frame may enqueue its token for the
//! feedback service and may end the connection with an error response.
//! At most one error response is written per connection, and the connection
//! is closed right after it; frames still buffered at that point are dropped.

use crate::error::MockError;
use crate::metrics::counters;
use crate::policy::DecisionPolicy;
use crate::queue::FeedbackQueue;
use apns_common::decoder::{Decoded, FrameDecoder};
use apns_common::frame::{ErrorResponse, PushFrame};
use apns_common::ErrorCode;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// Size of a single socket read.
const READ_CHUNK_SIZE: usize = 4096;

/// How a gateway session ended without a transport or framing error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed the connection.
    Closed,
    /// An error response was sent and the connection closed.
    Rejected(ErrorResponse),
}

/// State of one gateway connection.
#[derive(Debug)]
pub struct GatewaySession {
    decoder: FrameDecoder,
    queue: Arc<FeedbackQueue>,
    policy: Arc<dyn DecisionPolicy>,
}

impl GatewaySession {
    /// Creates a session feeding `queue` and consulting `policy`.
    #[must_use]
    pub fn new(queue: Arc<FeedbackQueue>, policy: Arc<dyn DecisionPolicy>) -> Self {
        Self {
            decoder: FrameDecoder::with_capacity(READ_CHUNK_SIZE),
            queue,
            policy,
        }
    }

    /// Serves the connection until the client disconnects or an error
    /// response has been sent.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Io`] if reading fails and [`MockError::Frame`] if
    /// a header cannot be decoded. No response is written in either case.
    pub async fn run<S>(mut self, mut stream: S) -> Result<SessionEnd, MockError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(SessionEnd::Closed);
            }
            self.decoder.extend(&chunk[..n]);

            let outcome = self.process_buffered().map_err(|e| {
                warn!("malformed push frame, closing connection: {}", e);
                e
            })?;
            if let Some(response) = outcome {
                send_error_response(&mut stream, response).await;
                return Ok(SessionEnd::Rejected(response));
            }
        }
    }

    /// Handles every complete frame currently buffered. Returns the error
    /// response that must end the session, if any.
    fn process_buffered(&mut self) -> Result<Option<ErrorResponse>, MockError> {
        while let Some(item) = self.decoder.next_frame()? {
            match item {
                Decoded::InvalidToken(header) => {
                    debug!(
                        identifier = header.identifier,
                        token_length = header.token_length,
                        "invalid token"
                    );
                    return Ok(Some(ErrorResponse::new(
                        ErrorCode::InvalidToken,
                        header.identifier,
                    )));
                }
                Decoded::Frame(frame) => {
                    if let Some(response) = self.handle_frame(&frame) {
                        return Ok(Some(response));
                    }
                }
            }
        }
        self.decoder.compact();
        Ok(None)
    }

    fn handle_frame(&self, frame: &PushFrame) -> Option<ErrorResponse> {
        counters::frames_total();
        trace!(
            identifier = frame.identifier,
            token = %frame.token,
            payload_len = frame.payload.len(),
            "push frame"
        );

        if self.policy.should_feedback() {
            if self.queue.push(frame.token) {
                counters::feedback_enqueued_total();
                debug!(token = %frame.token, "queued feedback");
            } else {
                debug!(token = %frame.token, "feedback queue closed, token dropped");
            }
        }

        self.policy
            .next_error()
            .map(|code| ErrorResponse::new(code, frame.identifier))
    }
}

/// Writes the response and closes the write side. Delivery is best effort.
async fn send_error_response<S>(stream: &mut S, response: ErrorResponse)
where
    S: AsyncWrite + Unpin,
{
    counters::error_responses_total(response.code);
    debug!(
        code = %response.code,
        identifier = response.identifier,
        "sending error response"
    );
    if let Err(e) = write_and_close(stream, &response.serialize()).await {
        debug!("failed to deliver error response: {}", e);
    }
}

async fn write_and_close<S>(stream: &mut S, bytes: &[u8]) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(bytes).await?;
    stream.flush().await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Disabled;
    use apns_common::frame::{ERROR_RESPONSE_SIZE, HEADER_SIZE};
    use apns_common::Token;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    /// Replays a fixed list of decisions, one per frame.
    #[derive(Debug, Default)]
    struct Scripted {
        errors: Mutex<VecDeque<Option<ErrorCode>>>,
        feedback: Mutex<VecDeque<bool>>,
        consulted: AtomicUsize,
    }

    impl Scripted {
        fn errors(errors: &[Option<ErrorCode>]) -> Self {
            Self {
                errors: Mutex::new(errors.iter().copied().collect()),
                ..Self::default()
            }
        }

        fn feedback(feedback: &[bool]) -> Self {
            Self {
                feedback: Mutex::new(feedback.iter().copied().collect()),
                ..Self::default()
            }
        }
    }

    impl DecisionPolicy for Scripted {
        fn next_error(&self) -> Option<ErrorCode> {
            self.consulted.fetch_add(1, Ordering::SeqCst);
            self.errors.lock().unwrap().pop_front().flatten()
        }

        fn should_feedback(&self) -> bool {
            self.consulted.fetch_add(1, Ordering::SeqCst);
            self.feedback.lock().unwrap().pop_front().unwrap_or(false)
        }
    }

    fn token(n: u8) -> Token {
        Token::new([n; 32])
    }

    fn abc_frame() -> PushFrame {
        PushFrame::new(42, 0, token(0xA1), b"abc")
    }

    fn spawn_session(
        policy: Arc<dyn DecisionPolicy>,
    ) -> (
        DuplexStream,
        Arc<FeedbackQueue>,
        tokio::task::JoinHandle<Result<SessionEnd, MockError>>,
    ) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let queue = Arc::new(FeedbackQueue::new());
        let session = GatewaySession::new(queue.clone(), policy);
        let handle = tokio::spawn(session.run(server));
        (client, queue, handle)
    }

    async fn read_to_end(client: &mut DuplexStream) -> Vec<u8> {
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(1), client.read_to_end(&mut out))
            .await
            .expect("session should close the connection")
            .unwrap();
        out
    }

    #[tokio::test]
    async fn accepted_frame_keeps_connection_open() {
        let (mut client, queue, handle) = spawn_session(Arc::new(Disabled));
        client
            .write_all(&abc_frame().serialize().unwrap())
            .await
            .unwrap();

        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_millis(100), client.read(&mut buf)).await;
        assert!(read.is_err(), "no response expected");
        assert!(!handle.is_finished());
        assert!(queue.is_empty());

        drop(client);
        assert_eq!(handle.await.unwrap().unwrap(), SessionEnd::Closed);
    }

    #[tokio::test]
    async fn feedback_decision_enqueues_token_once() {
        let (mut client, queue, handle) = spawn_session(Arc::new(Scripted::feedback(&[true])));
        client
            .write_all(&abc_frame().serialize().unwrap())
            .await
            .unwrap();
        drop(client);

        assert_eq!(handle.await.unwrap().unwrap(), SessionEnd::Closed);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_pop(), Some(token(0xA1)));
    }

    #[tokio::test]
    async fn injected_error_is_sent_then_connection_closes() {
        let policy = Scripted::errors(&[Some(ErrorCode::MissingDeviceToken)]);
        let (mut client, _queue, handle) = spawn_session(Arc::new(policy));
        client
            .write_all(&abc_frame().serialize().unwrap())
            .await
            .unwrap();

        let response = read_to_end(&mut client).await;
        assert_eq!(response, [0x08, 0x02, 0x00, 0x00, 0x00, 0x2A]);
        assert_eq!(
            handle.await.unwrap().unwrap(),
            SessionEnd::Rejected(ErrorResponse::new(ErrorCode::MissingDeviceToken, 42))
        );
    }

    #[tokio::test]
    async fn invalid_token_skips_policy() {
        let policy = Arc::new(Scripted::default());
        let (mut client, queue, handle) = spawn_session(policy.clone());
        let mut frame = PushFrame::new(0x0102_0304, 0, token(1), b"xyz");
        frame.token_length = 16;
        client.write_all(&frame.serialize().unwrap()).await.unwrap();

        let response = read_to_end(&mut client).await;
        assert_eq!(response, [0x08, 0x08, 0x01, 0x02, 0x03, 0x04]);
        assert!(matches!(
            handle.await.unwrap().unwrap(),
            SessionEnd::Rejected(ErrorResponse {
                code: ErrorCode::InvalidToken,
                ..
            })
        ));
        assert_eq!(policy.consulted.load(Ordering::SeqCst), 0);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn error_discards_remaining_buffered_frames() {
        let policy = Arc::new(Scripted {
            errors: Mutex::new([None, Some(ErrorCode::ProcessingError)].into()),
            feedback: Mutex::new([true, true, true].into()),
            consulted: AtomicUsize::new(0),
        });
        let (mut client, queue, handle) = spawn_session(policy.clone());

        let bytes: Vec<u8> = (1..=3)
            .flat_map(|i| PushFrame::new(i, 0, token(i as u8), b"p").serialize().unwrap())
            .collect();
        client.write_all(&bytes).await.unwrap();

        let response = read_to_end(&mut client).await;
        assert_eq!(response.len(), ERROR_RESPONSE_SIZE);
        assert_eq!(
            ErrorResponse::parse(&response).unwrap(),
            ErrorResponse::new(ErrorCode::ProcessingError, 2)
        );
        handle.await.unwrap().unwrap();

        // frames 1 and 2 were handled, frame 3 never reached the policy
        assert_eq!(policy.consulted.load(Ordering::SeqCst), 4);
        assert_eq!(queue.try_pop(), Some(token(1)));
        assert_eq!(queue.try_pop(), Some(token(2)));
        assert_eq!(queue.try_pop(), None);
    }

    #[tokio::test]
    async fn frames_split_across_writes_are_reassembled() {
        let feedback = vec![true; 4];
        let (mut client, queue, handle) = spawn_session(Arc::new(Scripted::feedback(&feedback)));

        let payloads: [&[u8]; 4] = [b"first", b"", b"third frame", b"4"];
        let bytes: Vec<u8> = payloads
            .iter()
            .enumerate()
            .flat_map(|(i, p)| {
                PushFrame::new(i as u32, 0, token(i as u8), p)
                    .serialize()
                    .unwrap()
            })
            .collect();
        for chunk in bytes.chunks(7) {
            client.write_all(chunk).await.unwrap();
            client.flush().await.unwrap();
            tokio::task::yield_now().await;
        }
        drop(client);

        assert_eq!(handle.await.unwrap().unwrap(), SessionEnd::Closed);
        for i in 0..4u8 {
            assert_eq!(queue.try_pop(), Some(token(i)));
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn zero_payload_frame_is_processed() {
        let (mut client, queue, handle) = spawn_session(Arc::new(Scripted::feedback(&[true])));
        let bytes = PushFrame::new(5, 0, token(5), b"").serialize().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        client.write_all(&bytes).await.unwrap();
        drop(client);

        handle.await.unwrap().unwrap();
        assert_eq!(queue.try_pop(), Some(token(5)));
    }

    #[tokio::test]
    async fn partial_frame_at_eof_is_discarded() {
        let (mut client, queue, handle) = spawn_session(Arc::new(Scripted::feedback(&[true])));
        let bytes = abc_frame().serialize().unwrap();
        client.write_all(&bytes[..bytes.len() - 1]).await.unwrap();
        drop(client);

        assert_eq!(handle.await.unwrap().unwrap(), SessionEnd::Closed);
        assert!(queue.is_empty());
    }
}
