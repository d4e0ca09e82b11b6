//! Cluster membership model for silo-based actor clusters.
//!
//! This crate provides:
//! - Node identity and record types (`SiloAddress`, `MembershipEntry`)
//! - The `MembershipTable` contract used by the failure-detection layer
//! - The `GatewayListProvider` contract used by clients
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod address;
pub mod entry;
pub mod error;
pub mod gateway;
pub mod options;
pub mod table;

pub use address::{GATEWAY_URI_SCHEME, SiloAddress};
pub use entry::{MembershipEntry, MembershipTableData, SiloStatus, TableVersion};
pub use error::AddressError;
pub use gateway::{GatewayListProvider, GatewayListProviderError};
pub use options::{ClusterOptions, GatewayListProviderOptions, MembershipTableOptions};
pub use table::{MembershipTable, MembershipTableError};
