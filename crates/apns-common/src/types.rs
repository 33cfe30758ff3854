//! Core type definitions and protocol constants for the binary push gateway.

use std::fmt;
use std::str::FromStr;

use crate::frame::FrameError;

/// Size in bytes of a device token on the wire.
pub const TOKEN_SIZE: usize = 32;

/// Canonical gateway port of the legacy protocol.
pub const DEFAULT_GATEWAY_PORT: u16 = 2195;
/// Canonical feedback port of the legacy protocol.
pub const DEFAULT_FEEDBACK_PORT: u16 = 2196;

/// A 32-byte device token.
///
/// Tokens travel as raw bytes on the wire and are shown as lowercase hex
/// everywhere else (logs, `Display`, `FromStr`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token([u8; TOKEN_SIZE]);

impl Token {
    /// Wraps raw token bytes.
    #[must_use]
    pub const fn new(bytes: [u8; TOKEN_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw token bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; TOKEN_SIZE] {
        &self.0
    }

    /// Hex encoding of the token.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Decodes a 64-character hex string into a token.
    ///
    /// # Errors
    ///
    /// Returns [`hex::FromHexError`] if the string is not exactly 64 hex
    /// characters.
    ///
    /// # Examples
    ///
    /// ```
    /// use apns_common::Token;
    /// let token = Token::from_hex(&"ab".repeat(32)).unwrap();
    /// assert_eq!(token.as_bytes(), &[0xAB; 32]);
    /// ```
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; TOKEN_SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<[u8; TOKEN_SIZE]> for Token {
    fn from(bytes: [u8; TOKEN_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.to_hex())
    }
}

impl FromStr for Token {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Status codes carried in the `errorCode` field of an error response.
///
/// This is a closed set; the numeric values are a fixed contract with
/// clients of the real gateway and must round-trip exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// No errors encountered.
    NoError = 0,
    /// Processing error.
    ProcessingError = 1,
    /// Missing device token.
    MissingDeviceToken = 2,
    /// Missing topic.
    MissingTopic = 3,
    /// Missing payload.
    MissingPayload = 4,
    /// Invalid token size.
    InvalidTokenSize = 5,
    /// Invalid topic size.
    InvalidTopicSize = 6,
    /// Invalid payload size.
    InvalidPayloadSize = 7,
    /// Invalid token.
    InvalidToken = 8,
    /// The gateway is shutting down.
    Shutdown = 10,
    /// None (unknown).
    Unknown = 255,
}

impl ErrorCode {
    /// All defined codes, in ascending numeric order.
    pub const ALL: [Self; 11] = [
        Self::NoError,
        Self::ProcessingError,
        Self::MissingDeviceToken,
        Self::MissingTopic,
        Self::MissingPayload,
        Self::InvalidTokenSize,
        Self::InvalidTopicSize,
        Self::InvalidPayloadSize,
        Self::InvalidToken,
        Self::Shutdown,
        Self::Unknown,
    ];

    /// Wire value of this code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Short human-readable description, as used in logs and metric labels.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::NoError => "no errors encountered",
            Self::ProcessingError => "processing error",
            Self::MissingDeviceToken => "missing device token",
            Self::MissingTopic => "missing topic",
            Self::MissingPayload => "missing payload",
            Self::InvalidTokenSize => "invalid token size",
            Self::InvalidTopicSize => "invalid topic size",
            Self::InvalidPayloadSize => "invalid payload size",
            Self::InvalidToken => "invalid token",
            Self::Shutdown => "shutdown",
            Self::Unknown => "unknown",
        }
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_u8() == value)
            .ok_or(FrameError::UnknownErrorCode(value))
    }
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> Self {
        code.as_u8()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_u8(), self.description())
    }
}

/// Current UNIX time in seconds, truncated to the 32-bit width used by
/// feedback records.
///
/// ```
/// let now = apns_common::types::unix_now();
/// assert!(now > 1_700_000_000);
/// ```
#[must_use]
pub fn unix_now() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
