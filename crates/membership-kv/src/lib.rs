//! Membership table and gateway list provider backed by a transactional
//! key-value store.
//!
//! Each silo's record is stored as JSON in a dictionary named after the
//! configured state name (the cluster id by default), keyed by the silo's
//! encoded address. The table version is kept in a companion dictionary so
//! that the gateway provider can scan the members dictionary directly.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod codec;
mod dictionary;
mod error;
mod gateway;
mod table;

pub use codec::{AddressCodec, ParsableAddressCodec, StoredRecord, StoredSuspectTime};
pub use error::{CodecError, Error, Result};
pub use gateway::KvGatewayListProvider;
pub use table::KvMembershipTable;
