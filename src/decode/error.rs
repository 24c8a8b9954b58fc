//! Decode faults.

use thiserror::Error;

/// Malformed log or call-data payload.
///
/// Any of these aborts decoding of the current block and fails the sync attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("read of {len} bytes at offset {offset} exceeds payload of {available} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        available: usize,
    },
    #[error("abi word at offset {offset} does not fit a length or offset")]
    LengthOverflow { offset: usize },
    #[error("parallel arrays differ in length: {left} vs {right}")]
    ArrayLengthMismatch { left: usize, right: usize },
    #[error("log is missing topic {index}")]
    MissingTopic { index: usize },
    #[error("string field is not valid utf-8")]
    InvalidUtf8,
}

pub type DecodeResult<T> = Result<T, DecodeError>;
