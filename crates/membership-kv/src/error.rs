//! Error types for membership-kv

use rollcall_kv::StoreError;
use rollcall_membership::{AddressError, GatewayListProviderError, MembershipTableError};
use thiserror::Error;

/// Result type used throughout this crate
pub type Result<T, SE> = std::result::Result<T, Error<SE>>;

/// Membership table and gateway provider error type
#[derive(Debug, Error)]
pub enum Error<SE>
where
    SE: StoreError,
{
    /// The backing store failed
    #[error("store error: {0}")]
    Store(#[source] SE),

    /// A stored record could not be encoded or decoded
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The operation was cancelled before it committed
    #[error("operation cancelled")]
    Cancelled,
}

impl<SE: StoreError> MembershipTableError for Error<SE> {}

impl<SE: StoreError> GatewayListProviderError for Error<SE> {}

/// Errors converting between stored records and membership entries
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization error
    #[error("failed to serialize record: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Deserialization error
    #[error("failed to deserialize record: {0}")]
    Deserialize(#[source] serde_json::Error),

    /// A stored address is not valid
    #[error(transparent)]
    Address(#[from] AddressError),
}
