//! Incremental push frame decoder.
//!
//! Socket reads deliver arbitrary slices of the gateway stream. The decoder
//! keeps an accumulation buffer plus a `processed` cursor into it:
//!
//! 1. [`FrameDecoder::extend`] appends a read to the buffer.
//! 2. [`FrameDecoder::next_frame`] is called until it returns `Ok(None)`.
//!    Each call looks at the bytes past `processed`; once a whole frame is
//!    present it is returned and `processed` moves past it.
//! 3. [`FrameDecoder::compact`] drops the consumed prefix so only the
//!    unconsumed tail is carried into the next read.
//!
//! [`FrameDecoder::push`] runs all three steps for callers that do not need
//! to interleave side effects between frames.

use bytes::{Buf, BytesMut};

use crate::frame::{FrameError, FrameHeader, PushFrame, HEADER_SIZE};

/// Something the decoder found in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete, well-formed frame.
    Frame(PushFrame),
    /// A header whose token is not a valid 32-byte token. The frame is not
    /// consumed; the connection is expected to end here.
    InvalidToken(FrameHeader),
}

/// Reassembles push frames from a byte stream delivered in arbitrary chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    processed: usize,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty decoder with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            processed: 0,
        }
    }

    /// Appends freshly read bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extracts the next item past the cursor.
    ///
    /// Returns `Ok(None)` when fewer than a header's worth of bytes, or fewer
    /// than the announced frame size, are available. The cursor only moves
    /// when a [`Decoded::Frame`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the header cannot be decoded.
    pub fn next_frame(&mut self) -> Result<Option<Decoded>, FrameError> {
        let available = &self.buffer[self.processed..];
        if available.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = FrameHeader::parse(&available[..HEADER_SIZE])?;
        if !header.has_valid_token() {
            return Ok(Some(Decoded::InvalidToken(header)));
        }

        let frame_size = header.frame_size();
        if available.len() < frame_size {
            return Ok(None);
        }

        let payload = available[HEADER_SIZE..frame_size].to_vec();
        self.processed += frame_size;
        Ok(Some(Decoded::Frame(PushFrame::from_parts(header, payload))))
    }

    /// Discards everything before the cursor and resets it to zero.
    pub fn compact(&mut self) {
        self.buffer.advance(self.processed);
        self.processed = 0;
    }

    /// Appends `data`, extracts every complete frame, then compacts.
    ///
    /// Extraction stops at the first [`Decoded::InvalidToken`], which is
    /// returned as the last element.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if a header cannot be decoded.
    ///
    /// # Examples
    ///
    /// ```
    /// use apns_common::decoder::{Decoded, FrameDecoder};
    /// use apns_common::frame::PushFrame;
    /// use apns_common::Token;
    ///
    /// let bytes = PushFrame::new(1, 0, Token::new([1; 32]), b"hi").serialize().unwrap();
    /// let mut decoder = FrameDecoder::new();
    /// assert!(decoder.push(&bytes[..10]).unwrap().is_empty());
    /// let frames = decoder.push(&bytes[10..]).unwrap();
    /// assert!(matches!(&frames[..], [Decoded::Frame(f)] if f.identifier == 1));
    /// ```
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Decoded>, FrameError> {
        self.extend(data);
        let mut out = Vec::new();
        while let Some(item) = self.next_frame()? {
            let stop = matches!(item, Decoded::InvalidToken(_));
            out.push(item);
            if stop {
                break;
            }
        }
        self.compact();
        Ok(out)
    }

    /// Bytes buffered but not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.processed
    }

    /// Offset of the cursor into the buffer.
    #[must_use]
    pub const fn processed(&self) -> usize {
        self.processed
    }

    /// Returns `true` if no unconsumed bytes are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}
