//! Binary wire formats of the legacy push gateway.
//!
//! Three messages exist, all big-endian:
//!
//! - push frame (client → gateway):
//!   `u8 command | u32 identifier | u32 expiry | u16 token_len | [u8; 32] token | u16 payload_len | payload`
//! - error response (gateway → client): `u8 command(=8) | u8 status | u32 identifier`
//! - feedback record (feedback service → client): `u32 timestamp | u16 token_len | [u8; 32] token`

use crate::types::{ErrorCode, Token, TOKEN_SIZE};
use thiserror::Error;

/// Command byte of the enhanced push notification format.
pub const COMMAND_ENHANCED: u8 = 1;
/// Command byte of an error response.
pub const COMMAND_ERROR_RESPONSE: u8 = 8;

/// Fixed size of a push frame header, up to and including `payload_len`.
pub const HEADER_SIZE: usize = 1 + 4 + 4 + 2 + TOKEN_SIZE + 2; // 45 bytes
/// Size of an error response.
pub const ERROR_RESPONSE_SIZE: usize = 1 + 1 + 4;
/// Size of a feedback record.
pub const FEEDBACK_RECORD_SIZE: usize = 4 + 2 + TOKEN_SIZE; // 38 bytes
/// Largest payload a push frame can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Errors that can occur while parsing wire messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The input is shorter than the message it must contain.
    #[error("frame too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected byte count.
        expected: usize,
        /// Actual byte count received.
        actual: usize,
    },
    /// The command byte does not match the expected message.
    #[error("unexpected command {0}")]
    UnexpectedCommand(u8),
    /// A feedback record declared a token length other than 32.
    #[error("invalid token length {0}")]
    InvalidTokenLength(u16),
    /// The status byte is not one of the defined error codes.
    #[error("unknown error code {0}")]
    UnknownErrorCode(u8),
    /// The payload does not fit in the 16-bit length field.
    #[error("payload too large: max {max}, got {actual}")]
    PayloadTooLarge {
        /// Maximum allowed payload size.
        max: usize,
        /// Actual payload size.
        actual: usize,
    },
}

/// Safely convert a byte slice to a fixed-size array.
fn try_into_array<const N: usize>(data: &[u8]) -> Result<[u8; N], FrameError> {
    data.try_into().map_err(|_| FrameError::TooShort {
        expected: N,
        actual: data.len(),
    })
}

fn ensure_len(data: &[u8], expected: usize) -> Result<(), FrameError> {
    if data.len() < expected {
        return Err(FrameError::TooShort {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// The fixed 45-byte prefix of a push frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol command byte; not validated.
    pub command: u8,
    /// Client-chosen identifier, echoed back in error responses.
    pub identifier: u32,
    /// Expiry timestamp; opaque.
    pub expiry: u32,
    /// Declared token length. Well-formed frames carry 32.
    pub token_length: u16,
    /// Device token.
    pub token: Token,
    /// Length of the payload that follows the header.
    pub payload_length: u16,
}

impl FrameHeader {
    /// Parses the header at the start of `data`. Bytes past the header are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooShort`] if fewer than [`HEADER_SIZE`] bytes
    /// are given.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        ensure_len(data, HEADER_SIZE)?;
        Ok(Self {
            command: data[0],
            identifier: u32::from_be_bytes(try_into_array(&data[1..5])?),
            expiry: u32::from_be_bytes(try_into_array(&data[5..9])?),
            token_length: u16::from_be_bytes(try_into_array(&data[9..11])?),
            token: Token::new(try_into_array(&data[11..43])?),
            payload_length: u16::from_be_bytes(try_into_array(&data[43..45])?),
        })
    }

    /// Total size of the frame this header introduces.
    #[must_use]
    pub const fn frame_size(&self) -> usize {
        HEADER_SIZE + self.payload_length as usize
    }

    /// Whether the header describes a well-formed 32-byte token.
    ///
    /// This is the only invalid-token rule: any 32 raw bytes are a usable
    /// token, so a frame is rejected with code 8 only when `token_length`
    /// is not 32. Frame size never depends on `token_length`.
    #[must_use]
    pub const fn has_valid_token(&self) -> bool {
        self.token_length as usize == TOKEN_SIZE
    }
}

/// A complete push request received on the gateway connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFrame {
    /// Protocol command byte.
    pub command: u8,
    /// Client-chosen identifier.
    pub identifier: u32,
    /// Expiry timestamp; opaque.
    pub expiry: u32,
    /// Declared token length.
    pub token_length: u16,
    /// Device token.
    pub token: Token,
    /// Notification body.
    pub payload: Vec<u8>,
}

impl PushFrame {
    /// Creates an enhanced-format frame with a well-formed token length.
    #[must_use]
    pub fn new(identifier: u32, expiry: u32, token: Token, payload: &[u8]) -> Self {
        Self {
            command: COMMAND_ENHANCED,
            identifier,
            expiry,
            token_length: TOKEN_SIZE as u16,
            token,
            payload: payload.to_vec(),
        }
    }

    /// Joins a parsed header with its payload.
    #[must_use]
    pub fn from_parts(header: FrameHeader, payload: Vec<u8>) -> Self {
        Self {
            command: header.command,
            identifier: header.identifier,
            expiry: header.expiry,
            token_length: header.token_length,
            token: header.token,
            payload,
        }
    }

    /// Serializes the frame for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadTooLarge`] if the payload does not fit the
    /// 16-bit length field.
    ///
    /// # Examples
    ///
    /// ```
    /// use apns_common::frame::{PushFrame, HEADER_SIZE};
    /// use apns_common::Token;
    /// let frame = PushFrame::new(42, 0, Token::new([7; 32]), b"abc");
    /// let bytes = frame.serialize().unwrap();
    /// assert_eq!(bytes.len(), HEADER_SIZE + 3);
    /// assert_eq!(PushFrame::parse(&bytes).unwrap(), frame);
    /// ```
    pub fn serialize(&self) -> Result<Vec<u8>, FrameError> {
        let payload_length =
            u16::try_from(self.payload.len()).map_err(|_| FrameError::PayloadTooLarge {
                max: MAX_PAYLOAD,
                actual: self.payload.len(),
            })?;
        let mut v = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        v.push(self.command);
        v.extend_from_slice(&self.identifier.to_be_bytes());
        v.extend_from_slice(&self.expiry.to_be_bytes());
        v.extend_from_slice(&self.token_length.to_be_bytes());
        v.extend_from_slice(self.token.as_bytes());
        v.extend_from_slice(&payload_length.to_be_bytes());
        v.extend_from_slice(&self.payload);
        Ok(v)
    }

    /// Parses one complete frame from the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooShort`] if `data` holds less than the header
    /// or less than the payload the header announces.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        let header = FrameHeader::parse(data)?;
        let frame_size = header.frame_size();
        ensure_len(data, frame_size)?;
        Ok(Self::from_parts(
            header,
            data[HEADER_SIZE..frame_size].to_vec(),
        ))
    }

    /// Size of this frame on the wire.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Error response written back on the gateway connection before it closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Reported status.
    pub code: ErrorCode,
    /// Identifier of the frame that triggered the error.
    pub identifier: u32,
}

impl ErrorResponse {
    /// Creates a new error response.
    #[must_use]
    pub const fn new(code: ErrorCode, identifier: u32) -> Self {
        Self { code, identifier }
    }

    /// Serializes the response.
    ///
    /// ```
    /// use apns_common::frame::ErrorResponse;
    /// use apns_common::ErrorCode;
    /// let bytes = ErrorResponse::new(ErrorCode::MissingDeviceToken, 42).serialize();
    /// assert_eq!(bytes, [0x08, 0x02, 0x00, 0x00, 0x00, 0x2A]);
    /// ```
    #[must_use]
    pub fn serialize(&self) -> [u8; ERROR_RESPONSE_SIZE] {
        let mut v = [0u8; ERROR_RESPONSE_SIZE];
        v[0] = COMMAND_ERROR_RESPONSE;
        v[1] = self.code.as_u8();
        v[2..].copy_from_slice(&self.identifier.to_be_bytes());
        v
    }

    /// Parses a response.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the input is short, the command byte is not
    /// 8, or the status is not a defined error code.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        ensure_len(data, ERROR_RESPONSE_SIZE)?;
        if data[0] != COMMAND_ERROR_RESPONSE {
            return Err(FrameError::UnexpectedCommand(data[0]));
        }
        Ok(Self {
            code: ErrorCode::try_from(data[1])?,
            identifier: u32::from_be_bytes(try_into_array(&data[2..6])?),
        })
    }
}

/// A token reported on the feedback connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackRecord {
    /// Seconds since the UNIX epoch.
    pub timestamp: u32,
    /// Reported device token.
    pub token: Token,
}

impl FeedbackRecord {
    /// Creates a new record.
    #[must_use]
    pub const fn new(timestamp: u32, token: Token) -> Self {
        Self { timestamp, token }
    }

    /// Serializes the record.
    #[must_use]
    pub fn serialize(&self) -> [u8; FEEDBACK_RECORD_SIZE] {
        let mut v = [0u8; FEEDBACK_RECORD_SIZE];
        v[..4].copy_from_slice(&self.timestamp.to_be_bytes());
        v[4..6].copy_from_slice(&(TOKEN_SIZE as u16).to_be_bytes());
        v[6..].copy_from_slice(self.token.as_bytes());
        v
    }

    /// Parses a record.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the input is short or the token length is
    /// not 32.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        ensure_len(data, FEEDBACK_RECORD_SIZE)?;
        let token_length = u16::from_be_bytes(try_into_array(&data[4..6])?);
        if token_length as usize != TOKEN_SIZE {
            return Err(FrameError::InvalidTokenLength(token_length));
        }
        Ok(Self {
            timestamp: u32::from_be_bytes(try_into_array(&data[..4])?),
            token: Token::new(try_into_array(&data[6..FEEDBACK_RECORD_SIZE])?),
        })
    }
}
