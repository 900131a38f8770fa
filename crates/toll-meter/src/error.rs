//! Metering error types.

use thiserror::Error;
use toll_module::CodecError;

/// Errors that can occur while metering a module.
#[derive(Debug, Error)]
pub enum MeterError {
    /// The input binary could not be decoded, or the transformed module
    /// could not be re-encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The module already imports the name reserved for the metering
    /// function.
    #[error("importing the metering function is not allowed: {module}.{field} already imported")]
    DuplicateMeteringImport { module: String, field: String },
}

/// Metering result type alias.
pub type MeterResult<T> = Result<T, MeterError>;
