//! Storage representation of membership rows and the table version.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rollcall_membership::{AddressError, MembershipEntry, SiloAddress, SiloStatus, TableVersion};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Key of the table version record in the version dictionary.
pub const VERSION_KEY: &str = "version";

/// Suffix appended to the state name to form the version dictionary name.
pub const VERSION_DICTIONARY_SUFFIX: &str = ".version";

static NEXT_ETAG: AtomicU64 = AtomicU64::new(0);

/// Generate a fresh etag.
///
/// A process-wide counter makes etags unique within the process; the random
/// suffix keeps them distinct across restarts sharing one store.
#[must_use]
pub fn new_etag() -> String {
    format!(
        "{:x}-{:08x}",
        NEXT_ETAG.fetch_add(1, Ordering::Relaxed),
        rand::random::<u32>()
    )
}

/// Converts silo addresses to and from the strings they are stored under.
///
/// The encoded form is used both as the row key and inside stored records,
/// so `decode(encode(a)) == a` must hold for every address.
pub trait AddressCodec: Clone + Debug + Send + Sync + 'static {
    /// Encode an address to its stored form
    fn encode(&self, address: &SiloAddress) -> String;

    /// Decode a stored address
    fn decode(&self, encoded: &str) -> Result<SiloAddress, AddressError>;
}

/// Codec using the canonical `<ip>:<port>@<generation>` form.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParsableAddressCodec;

impl AddressCodec for ParsableAddressCodec {
    fn encode(&self, address: &SiloAddress) -> String {
        address.to_parsable_string()
    }

    fn decode(&self, encoded: &str) -> Result<SiloAddress, AddressError> {
        encoded.parse()
    }
}

/// A suspicion as stored inside a record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoredSuspectTime {
    /// Encoded address of the suspecting silo
    pub silo_address: String,

    /// When the suspicion was raised
    pub suspect_time: DateTime<Utc>,
}

/// A membership row as stored in the members dictionary.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Encoded silo address, identical to the row key
    pub silo_address: String,

    /// Silo status
    pub status: SiloStatus,

    /// Gateway port, 0 if none
    pub proxy_port: u16,

    /// Host name
    pub host_name: String,

    /// Silo name
    pub silo_name: String,

    /// Process start time
    pub start_time: DateTime<Utc>,

    /// Last heartbeat
    pub i_am_alive_time: DateTime<Utc>,

    /// Suspicions raised against the silo
    #[serde(default)]
    pub suspect_times: Vec<StoredSuspectTime>,

    /// Etag of this version of the row
    pub etag: String,
}

impl StoredRecord {
    /// Build the stored form of `entry` tagged with `etag`.
    #[must_use]
    pub fn encode<C: AddressCodec>(entry: &MembershipEntry, etag: String, codec: &C) -> Self {
        Self {
            silo_address: codec.encode(&entry.silo_address),
            status: entry.status,
            proxy_port: entry.proxy_port,
            host_name: entry.host_name.clone(),
            silo_name: entry.silo_name.clone(),
            start_time: entry.start_time,
            i_am_alive_time: entry.i_am_alive_time,
            suspect_times: entry
                .suspect_times
                .iter()
                .map(|(suspector, suspect_time)| StoredSuspectTime {
                    silo_address: codec.encode(suspector),
                    suspect_time: *suspect_time,
                })
                .collect(),
            etag,
        }
    }

    /// Rebuild the membership entry held by this record.
    pub fn decode<C: AddressCodec>(&self, codec: &C) -> Result<MembershipEntry, CodecError> {
        let suspect_times = self
            .suspect_times
            .iter()
            .map(|suspect| {
                codec
                    .decode(&suspect.silo_address)
                    .map(|suspector| (suspector, suspect.suspect_time))
            })
            .collect::<Result<Vec<_>, AddressError>>()?;

        Ok(MembershipEntry {
            silo_address: codec.decode(&self.silo_address)?,
            status: self.status,
            proxy_port: self.proxy_port,
            host_name: self.host_name.clone(),
            silo_name: self.silo_name.clone(),
            start_time: self.start_time,
            i_am_alive_time: self.i_am_alive_time,
            suspect_times,
        })
    }

    /// This record with only the heartbeat replaced, tagged with `etag`.
    #[must_use]
    pub fn with_i_am_alive_time(self, i_am_alive_time: DateTime<Utc>, etag: String) -> Self {
        Self {
            i_am_alive_time,
            etag,
            ..self
        }
    }
}

impl TryFrom<Bytes> for StoredRecord {
    type Error = CodecError;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        serde_json::from_slice(&bytes).map_err(CodecError::Deserialize)
    }
}

impl TryFrom<StoredRecord> for Bytes {
    type Error = CodecError;

    fn try_from(record: StoredRecord) -> Result<Self, Self::Error> {
        serde_json::to_vec(&record)
            .map(Self::from)
            .map_err(CodecError::Serialize)
    }
}

/// The table version as stored in the version dictionary.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoredTableVersion {
    /// Version number
    pub version: i32,

    /// Etag of the version record
    pub etag: String,
}

impl From<&TableVersion> for StoredTableVersion {
    fn from(version: &TableVersion) -> Self {
        Self {
            version: version.version,
            etag: version.etag.clone(),
        }
    }
}

impl From<StoredTableVersion> for TableVersion {
    fn from(stored: StoredTableVersion) -> Self {
        Self::new(stored.version, stored.etag)
    }
}

impl TryFrom<Bytes> for StoredTableVersion {
    type Error = CodecError;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        serde_json::from_slice(&bytes).map_err(CodecError::Deserialize)
    }
}

impl TryFrom<StoredTableVersion> for Bytes {
    type Error = CodecError;

    fn try_from(version: StoredTableVersion) -> Result<Self, Self::Error> {
        serde_json::to_vec(&version)
            .map(Self::from)
            .map_err(CodecError::Serialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use chrono::Duration;

    fn address(port: u16, generation: i32) -> SiloAddress {
        SiloAddress::new(format!("10.0.0.1:{port}").parse().unwrap(), generation)
    }

    fn suspected_entry() -> MembershipEntry {
        let now = Utc::now();
        let mut entry = MembershipEntry::new(
            address(11111, 1),
            SiloStatus::Active,
            "host-a",
            "silo-a",
            30000,
            now - Duration::minutes(5),
        );
        entry.i_am_alive_time = now;
        entry.suspect_times = vec![
            (address(11112, 2), now - Duration::seconds(30)),
            (address(11113, 3), now - Duration::seconds(10)),
        ];
        entry
    }

    #[test]
    fn test_record_preserves_entry() {
        let entry = suspected_entry();
        let record = StoredRecord::encode(&entry, "e1".to_string(), &ParsableAddressCodec);

        assert_eq!(record.silo_address, "10.0.0.1:11111@1");
        assert_eq!(record.suspect_times[0].silo_address, "10.0.0.1:11112@2");
        assert_eq!(record.etag, "e1");

        let bytes = Bytes::try_from(record.clone()).unwrap();
        let stored = StoredRecord::try_from(bytes).unwrap();
        assert_eq!(stored, record);
        assert_eq!(stored.decode(&ParsableAddressCodec).unwrap(), entry);
    }

    #[test]
    fn test_record_without_suspect_times_field() {
        let json = r#"{
            "silo_address": "10.0.0.1:11111@1",
            "status": "Joining",
            "proxy_port": 0,
            "host_name": "h",
            "silo_name": "s",
            "start_time": "2024-01-01T00:00:00Z",
            "i_am_alive_time": "2024-01-01T00:00:00Z",
            "etag": "x"
        }"#;

        let record = StoredRecord::try_from(Bytes::from(json)).unwrap();
        assert!(record.suspect_times.is_empty());
        assert_eq!(record.status, SiloStatus::Joining);
    }

    #[test]
    fn test_heartbeat_merge_keeps_other_fields() {
        let entry = suspected_entry();
        let record = StoredRecord::encode(&entry, "e1".to_string(), &ParsableAddressCodec);
        let later = entry.i_am_alive_time + Duration::seconds(5);

        let merged = record
            .clone()
            .with_i_am_alive_time(later, "e2".to_string());

        assert_eq!(merged.i_am_alive_time, later);
        assert_eq!(merged.etag, "e2");
        assert_eq!(merged.status, record.status);
        assert_eq!(merged.suspect_times, record.suspect_times);
        assert_eq!(merged.start_time, record.start_time);
    }

    #[test]
    fn test_malformed_records() {
        assert_matches!(
            StoredRecord::try_from(Bytes::from_static(b"not json")),
            Err(CodecError::Deserialize(_))
        );

        let mut record =
            StoredRecord::encode(&suspected_entry(), "e1".to_string(), &ParsableAddressCodec);
        record.silo_address = "garbage".to_string();
        assert_matches!(
            record.decode(&ParsableAddressCodec),
            Err(CodecError::Address(AddressError::MissingGeneration(_)))
        );
    }

    #[derive(Clone, Debug)]
    struct PrefixedCodec;

    impl AddressCodec for PrefixedCodec {
        fn encode(&self, address: &SiloAddress) -> String {
            format!("silo/{address}")
        }

        fn decode(&self, encoded: &str) -> Result<SiloAddress, AddressError> {
            encoded
                .strip_prefix("silo/")
                .ok_or_else(|| AddressError::MissingGeneration(encoded.to_string()))?
                .parse()
        }
    }

    #[test]
    fn test_custom_codec() {
        let entry = suspected_entry();
        let record = StoredRecord::encode(&entry, "e1".to_string(), &PrefixedCodec);

        assert_eq!(record.silo_address, "silo/10.0.0.1:11111@1");
        assert_eq!(record.decode(&PrefixedCodec).unwrap(), entry);
        assert!(record.decode(&ParsableAddressCodec).is_err());
    }

    #[test]
    fn test_table_version_record() {
        let version = TableVersion::new(7, "abc");
        let bytes = Bytes::try_from(StoredTableVersion::from(&version)).unwrap();
        let stored = StoredTableVersion::try_from(bytes).unwrap();

        assert_eq!(TableVersion::from(stored), version);
    }

    #[test]
    fn test_etags_are_unique() {
        let etags = (0..100).map(|_| new_etag()).collect::<std::collections::HashSet<_>>();
        assert_eq!(etags.len(), 100);
    }
}
