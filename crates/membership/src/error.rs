//! Error types for membership model parsing

use thiserror::Error;

/// Errors produced while parsing or converting silo addresses.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum AddressError {
    /// The `@<generation>` suffix is missing
    #[error("missing generation in silo address '{0}'")]
    MissingGeneration(String),

    /// The endpoint part is not a valid socket address
    #[error("invalid endpoint in silo address '{address}': {reason}")]
    InvalidEndpoint {
        /// The rejected address
        address: String,
        /// Why parsing failed
        reason: String,
    },

    /// The generation part is not a valid integer
    #[error("invalid generation in silo address '{address}': {reason}")]
    InvalidGeneration {
        /// The rejected address
        address: String,
        /// Why parsing failed
        reason: String,
    },

    /// A gateway URI could not be formed from the address
    #[error("invalid gateway uri '{uri}': {reason}")]
    InvalidGatewayUri {
        /// The rejected URI
        uri: String,
        /// Why parsing failed
        reason: String,
    },
}
