use std::{array::TryFromSliceError, fmt::Debug, num::TryFromIntError};

use ark_serialize::SerializationError;
use cosmian_crypto_core::CryptoCoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),
    #[error("invalid boolean expression: {0}")]
    InvalidBooleanExpression(String),
    /// Deliberately carries no detail: the caller must not learn which part
    /// of the policy was not satisfied.
    #[error("access denied")]
    AccessDenied,
    #[error("authenticated decryption failed: ciphertext is corrupted or tampered")]
    AeadAuthenticationFailure,
    #[error("concurrent counter conflict: {0}")]
    ConcurrentCounterConflict(String),
    #[error("out-of-order index update: {0}")]
    OutOfOrderUpdate(String),
    #[error("unknown record {0}")]
    UnknownRecord(String),
    #[error("hash to curve failed: {0}")]
    HashToCurve(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("conversion failed: {0}")]
    ConversionFailed(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    CryptoCoreError(CryptoCoreError),
}

impl From<CryptoCoreError> for Error {
    fn from(e: CryptoCoreError) -> Self {
        Self::CryptoCoreError(e)
    }
}

impl From<SerializationError> for Error {
    fn from(e: SerializationError) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<TryFromIntError> for Error {
    fn from(e: TryFromIntError) -> Self {
        Self::ConversionFailed(e.to_string())
    }
}

impl From<TryFromSliceError> for Error {
    fn from(e: TryFromSliceError) -> Self {
        Self::ConversionFailed(e.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(e: std::str::Utf8Error) -> Self {
        Self::ConversionFailed(format!("UTF8 error: {e}"))
    }
}
