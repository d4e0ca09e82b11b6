use std::time::Duration;

use rollcall_kv::StoreError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// A transaction was handed to a dictionary of another store.
    #[error("transaction {0} belongs to a different store")]
    ForeignTransaction(u64),

    /// The key's lock was not acquired within the configured timeout.
    #[error("timed out after {timeout:?} waiting for the lock on '{key}' in '{dictionary}'")]
    LockTimeout {
        /// Dictionary holding the key.
        dictionary: String,
        /// The contended key.
        key: String,
        /// How long the transaction waited.
        timeout: Duration,
    },
}

impl StoreError for Error {}
