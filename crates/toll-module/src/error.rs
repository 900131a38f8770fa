//! Codec error types.

use thiserror::Error;

/// Errors raised while decoding or encoding a wasm binary.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The input bytes do not follow the binary grammar: bad preamble,
    /// unknown section or opcode byte, truncated stream, or a section whose
    /// declared length does not match its content.
    #[error("malformed binary: {0}")]
    MalformedBinary(String),

    /// The structured module contains a shape the encoder's fixed tables
    /// cannot serialize.
    #[error("unsupported structure: {0}")]
    UnsupportedStructure(String),
}

/// Codec result type alias.
pub type CodecResult<T> = Result<T, CodecError>;
