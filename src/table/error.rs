use crate::coordination::types::{Code, KeeperError, MultiError};
use std::time::Duration;
use thiserror::Error;

/// How a caller should react to a [`TableError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Fix the configuration or the request; retrying will not help.
    Configuration,
    /// The batch would break the key limit. Nothing was applied.
    Limit,
    /// Connection trouble, a lost race, or a timeout. Safe to retry.
    Transient,
    /// A broken protocol invariant.
    Internal,
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(
        "Limit would be exceeded by inserting {new_keys} new key(s). Limit is {limit}, while the number of keys would be {would_be}"
    )]
    LimitExceeded {
        new_keys: usize,
        limit: u64,
        would_be: u64,
    },

    #[error(
        "Cannot create metadata for table, because it is removed concurrently or because of wrong root_path ({root}), gave up after {attempts} attempts"
    )]
    LifecycleExhausted { root: String, attempts: usize },

    #[error(transparent)]
    Keeper(#[from] KeeperError),

    #[error(transparent)]
    Multi(#[from] MultiError),

    #[error("logical error: {0}")]
    Logic(String),

    #[error("Keeper did not answer for {pending} value(s): timeout after {timeout:?}")]
    Timeout { pending: usize, timeout: Duration },

    #[error("Failed to activate table because of connection issues")]
    Unavailable,

    #[error(
        "Failed to activate table because of invalid metadata in keeper ({path}). Please detach the table"
    )]
    InvalidTable { path: String },

    #[error("row codec error: {0}")]
    Codec(#[from] CodecError),
}

impl TableError {
    /// The coordination code behind this error, if any.
    pub fn keeper_code(&self) -> Option<Code> {
        match self {
            TableError::Keeper(e) => Some(e.code),
            TableError::Multi(e) => Some(e.code),
            _ => None,
        }
    }

    pub fn is_hardware_error(&self) -> bool {
        self.keeper_code().is_some_and(Code::is_hardware_error)
    }

    /// Connectivity loss, or a conflict with a concurrent peer that a retry
    /// can resolve.
    fn is_transient_keeper_error(&self) -> bool {
        self.keeper_code().is_some_and(|code| {
            code.is_hardware_error()
                || matches!(
                    code,
                    Code::NodeExists | Code::NoNode | Code::NotEmpty | Code::BadVersion
                )
        })
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            TableError::Configuration(_) | TableError::InvalidTable { .. } => {
                ErrorClass::Configuration
            }
            TableError::LimitExceeded { .. } => ErrorClass::Limit,
            TableError::LifecycleExhausted { .. }
            | TableError::Timeout { .. }
            | TableError::Unavailable => ErrorClass::Transient,
            TableError::Keeper(_) | TableError::Multi(_) if self.is_transient_keeper_error() => {
                ErrorClass::Transient
            }
            TableError::Keeper(_)
            | TableError::Multi(_)
            | TableError::Logic(_)
            | TableError::Codec(_) => ErrorClass::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode row: {0}")]
    Encode(String),
    #[error("failed to decode row: {0}")]
    Decode(String),
    #[error("invalid key encoding '{key}': {reason}")]
    Key { key: String, reason: String },
}

pub type TableResult<T> = Result<T, TableError>;
