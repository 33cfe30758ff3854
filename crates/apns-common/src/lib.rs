//! Wire protocol of the legacy binary push gateway.
//!
//! This crate provides:
//! - Token and error-code definitions plus protocol constants ([`types`])
//! - Push frame, error response and feedback record codecs ([`frame`])
//! - An incremental decoder that reassembles frames from partial reads ([`decoder`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod decoder;
pub mod frame;
pub mod types;

pub use frame::FrameError;
pub use types::{ErrorCode, Token};
