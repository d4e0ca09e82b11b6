//! Abstract interface for the membership table

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;

use crate::{MembershipEntry, MembershipTableData, SiloAddress, TableVersion};

/// Marker trait for `MembershipTable` errors
pub trait MembershipTableError: Debug + Error + Send + Sync + 'static {}

/// A table of silo records with optimistic concurrency.
///
/// Conditional failures (a row that already exists, a stale etag) are
/// reported as `Ok(false)`, and missing rows as empty results. `Err` is
/// reserved for faults of the backing store, which are not retried.
#[async_trait]
pub trait MembershipTable: Send + Sync + 'static {
    /// The error type for table operations.
    type Error: MembershipTableError;

    /// Prepares the table for use. Safe to call repeatedly and concurrently.
    ///
    /// # Arguments
    /// * `try_init_table_version`: create the table version record if it
    ///   does not exist yet.
    async fn initialize(&self, try_init_table_version: bool) -> Result<(), Self::Error>;

    /// Removes every row, provided `cluster_id` names the cluster this table
    /// belongs to. Any other id is ignored.
    async fn delete_entries(&self, cluster_id: &str) -> Result<(), Self::Error>;

    /// Inserts a row for `entry.silo_address` unless one already exists.
    ///
    /// Returns `false` without writing anything if the row exists.
    async fn insert_row(
        &self,
        entry: MembershipEntry,
        table_version: TableVersion,
    ) -> Result<bool, Self::Error>;

    /// Reads the row of one silo. The result is empty if the row is absent.
    async fn read_row(
        &self,
        silo_address: &SiloAddress,
    ) -> Result<MembershipTableData, Self::Error>;

    /// Reads every row from a single consistent snapshot.
    async fn read_all(&self) -> Result<MembershipTableData, Self::Error>;

    /// Replaces the row of `entry.silo_address` if its current etag equals
    /// `etag`.
    ///
    /// Returns `false` without writing anything if the row is absent or the
    /// etag does not match.
    async fn update_row(
        &self,
        entry: MembershipEntry,
        etag: &str,
        table_version: TableVersion,
    ) -> Result<bool, Self::Error>;

    /// Writes the heartbeat of `entry` into its stored row, leaving every
    /// other stored field untouched. Does nothing if the row is absent.
    async fn update_i_am_alive(&self, entry: &MembershipEntry) -> Result<(), Self::Error>;
}
