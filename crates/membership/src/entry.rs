//! Membership records and table snapshots

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{AddressError, SiloAddress};

/// Lifecycle status of a silo as recorded in the membership table.
///
/// The table stores whatever status its caller supplies; transitions are
/// decided by the failure-detection layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SiloStatus {
    /// The silo is starting up and has not yet joined.
    Joining,

    /// The silo is a live member of the cluster.
    Active,

    /// The silo is shutting down gracefully.
    ShuttingDown,

    /// The silo is stopping without a graceful shutdown.
    Stopping,

    /// The silo has been declared dead.
    Dead,
}

impl SiloStatus {
    /// Whether the silo is leaving or has left the cluster.
    #[must_use]
    pub const fn is_terminating(self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Stopping | Self::Dead)
    }

    /// Get the string representation of the status
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Joining => "Joining",
            Self::Active => "Active",
            Self::ShuttingDown => "ShuttingDown",
            Self::Stopping => "Stopping",
            Self::Dead => "Dead",
        }
    }
}

impl Display for SiloStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A silo's membership record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MembershipEntry {
    /// Identity of the silo. Never changes once the row is inserted.
    pub silo_address: SiloAddress,

    /// Current status.
    pub status: SiloStatus,

    /// Port of the client-facing gateway, or 0 if the silo is not a gateway.
    pub proxy_port: u16,

    /// Host the silo runs on.
    pub host_name: String,

    /// Human-readable silo name.
    pub silo_name: String,

    /// When the silo process started.
    pub start_time: DateTime<Utc>,

    /// Last heartbeat written by the silo.
    pub i_am_alive_time: DateTime<Utc>,

    /// Accusations by other silos: who suspected this one, and when.
    pub suspect_times: Vec<(SiloAddress, DateTime<Utc>)>,
}

impl MembershipEntry {
    /// Create an entry for a silo that started at `start_time`, with its
    /// first heartbeat at the same instant and no suspicions.
    #[must_use]
    pub fn new(
        silo_address: SiloAddress,
        status: SiloStatus,
        host_name: impl Into<String>,
        silo_name: impl Into<String>,
        proxy_port: u16,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            silo_address,
            status,
            proxy_port,
            host_name: host_name.into(),
            silo_name: silo_name.into(),
            start_time,
            i_am_alive_time: start_time,
            suspect_times: Vec::new(),
        }
    }

    /// Whether clients may use this silo as a gateway.
    #[must_use]
    pub fn is_gateway(&self) -> bool {
        self.status == SiloStatus::Active && self.proxy_port != 0
    }

    /// URI of this silo's gateway endpoint.
    ///
    /// See [`SiloAddress::to_gateway_uri`] for how to read the host back.
    pub fn gateway_uri(&self) -> Result<Url, AddressError> {
        self.silo_address.to_gateway_uri(self.proxy_port)
    }
}

/// Version tag of the whole membership table.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TableVersion {
    /// Monotonic version number.
    pub version: i32,

    /// Opaque token of the version record.
    pub etag: String,
}

impl TableVersion {
    /// Create a new table version
    #[must_use]
    pub fn new(version: i32, etag: impl Into<String>) -> Self {
        Self {
            version,
            etag: etag.into(),
        }
    }

    /// The version that follows this one, tagged with `etag`.
    #[must_use]
    pub fn next(&self, etag: impl Into<String>) -> Self {
        Self::new(self.version.saturating_add(1), etag)
    }
}

impl Default for TableVersion {
    fn default() -> Self {
        Self::new(0, "0")
    }
}

impl Display for TableVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}>", self.version, self.etag)
    }
}

/// Snapshot of (part of) the membership table as read in one transaction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MembershipTableData {
    /// Entries with their current etags, ordered by storage key.
    pub members: Vec<(MembershipEntry, String)>,

    /// Version of the table at the time of the read.
    pub version: TableVersion,
}

impl MembershipTableData {
    /// Create a new snapshot
    #[must_use]
    pub const fn new(members: Vec<(MembershipEntry, String)>, version: TableVersion) -> Self {
        Self { members, version }
    }

    /// Look up the entry and etag of `silo_address`.
    #[must_use]
    pub fn get(&self, silo_address: &SiloAddress) -> Option<&(MembershipEntry, String)> {
        self.members
            .iter()
            .find(|(entry, _)| entry.silo_address == *silo_address)
    }

    /// Number of entries in the snapshot
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the snapshot holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
