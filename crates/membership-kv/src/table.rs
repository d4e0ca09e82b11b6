//! Membership table over a transactional key-value store.

use async_trait::async_trait;
use bytes::Bytes;
use rollcall_kv::{Dictionary, LockMode, Transaction, TransactionalStore};
use rollcall_membership::{
    ClusterOptions, MembershipEntry, MembershipTable, MembershipTableData, MembershipTableOptions,
    SiloAddress, TableVersion,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::codec::{
    AddressCodec, ParsableAddressCodec, StoredRecord, StoredTableVersion, VERSION_DICTIONARY_SUFFIX,
    VERSION_KEY, new_etag,
};
use crate::dictionary::{LazyDictionary, scan};
use crate::error::{CodecError, Error, Result};

/// Membership table storing one record per silo in a dictionary named after
/// the state name, keyed by the encoded silo address.
///
/// The table version lives in a companion dictionary and is advanced in the
/// same transaction as every successful insert or update.
#[derive(Debug)]
pub struct KvMembershipTable<S, C = ParsableAddressCodec>
where
    S: TransactionalStore,
    C: AddressCodec,
{
    cluster_id: String,
    codec: C,
    members: LazyDictionary<S>,
    store: S,
    versions: LazyDictionary<S>,
}

impl<S> KvMembershipTable<S>
where
    S: TransactionalStore,
{
    /// Create a table storing addresses in their canonical string form
    #[must_use]
    pub fn new(store: S, cluster: &ClusterOptions, options: &MembershipTableOptions) -> Self {
        Self::with_codec(store, cluster, options, ParsableAddressCodec)
    }
}

impl<S, C> KvMembershipTable<S, C>
where
    S: TransactionalStore,
    C: AddressCodec,
{
    /// Create a table using `codec` to encode silo addresses
    #[must_use]
    pub fn with_codec(
        store: S,
        cluster: &ClusterOptions,
        options: &MembershipTableOptions,
        codec: C,
    ) -> Self {
        let state_name = options.state_name(cluster);

        Self {
            cluster_id: cluster.cluster_id.clone(),
            codec,
            members: LazyDictionary::new(store.clone(), state_name),
            versions: LazyDictionary::new(
                store.clone(),
                format!("{state_name}{VERSION_DICTIONARY_SUFFIX}"),
            ),
            store,
        }
    }

    /// The cluster this table serves
    #[must_use]
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Name of the dictionary holding the membership rows
    #[must_use]
    pub fn state_name(&self) -> &str {
        self.members.name()
    }

    /// Read every row, giving up if `cancel` fires before the read completes.
    pub async fn read_all_with_cancellation(
        &self,
        cancel: &CancellationToken,
    ) -> Result<MembershipTableData, S::Error> {
        let members = self.members.get().await?;
        let versions = self.versions.get().await?;

        let mut tx = self.store.create_transaction().await.map_err(Error::Store)?;
        let rows = scan(members, &mut tx, cancel).await?;
        let version = self.read_version(versions, &mut tx, LockMode::Default).await?;
        tx.abort().await;

        let members = rows
            .into_iter()
            .map(|(_, bytes)| -> std::result::Result<_, CodecError> {
                let record = StoredRecord::try_from(bytes)?;
                let entry = record.decode(&self.codec)?;
                Ok((entry, record.etag))
            })
            .collect::<std::result::Result<Vec<_>, CodecError>>()?;

        debug!(
            cluster_id = %self.cluster_id,
            rows = members.len(),
            %version,
            "read membership table"
        );

        Ok(MembershipTableData::new(members, version))
    }

    /// Remove every row and the table version if `cluster_id` is this
    /// table's cluster, giving up if `cancel` fires before the removal
    /// commits. Requests for other clusters are ignored.
    pub async fn delete_entries_with_cancellation(
        &self,
        cluster_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), S::Error> {
        if cluster_id != self.cluster_id {
            debug!(
                requested = %cluster_id,
                configured = %self.cluster_id,
                "ignoring delete for another cluster"
            );
            return Ok(());
        }

        let members = self.members.get().await?;
        let versions = self.versions.get().await?;

        let mut tx = self.store.create_transaction().await.map_err(Error::Store)?;
        let rows = scan(members, &mut tx, cancel).await?;

        for (key, _) in &rows {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            members.try_remove(&mut tx, key).await.map_err(Error::Store)?;
        }
        versions
            .try_remove(&mut tx, VERSION_KEY)
            .await
            .map_err(Error::Store)?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tx.commit().await.map_err(Error::Store)?;

        info!(cluster_id = %self.cluster_id, removed = rows.len(), "deleted membership entries");

        Ok(())
    }

    async fn read_version(
        &self,
        versions: &S::Dictionary,
        tx: &mut S::Transaction,
        lock_mode: LockMode,
    ) -> Result<TableVersion, S::Error> {
        let stored = versions
            .get(tx, VERSION_KEY, lock_mode)
            .await
            .map_err(Error::Store)?;

        match stored {
            Some(bytes) => Ok(StoredTableVersion::try_from(bytes)?.into()),
            None => Ok(TableVersion::default()),
        }
    }

    /// Advance the stored table version within `tx`.
    ///
    /// Callers pass the version they expect to write; a different outcome is
    /// logged but not rejected.
    async fn advance_version(
        &self,
        tx: &mut S::Transaction,
        expected: &TableVersion,
    ) -> Result<TableVersion, S::Error> {
        let versions = self.versions.get().await?;
        let current = self.read_version(versions, tx, LockMode::Update).await?;
        let next = current.next(new_etag());

        if next.version != expected.version {
            debug!(
                cluster_id = %self.cluster_id,
                %expected,
                %current,
                "table version differs from caller's expectation"
            );
        }

        let bytes = Bytes::try_from(StoredTableVersion::from(&next))?;
        versions
            .set(tx, VERSION_KEY.to_string(), bytes)
            .await
            .map_err(Error::Store)?;

        Ok(next)
    }
}

#[async_trait]
impl<S, C> MembershipTable for KvMembershipTable<S, C>
where
    S: TransactionalStore,
    C: AddressCodec,
{
    type Error = Error<S::Error>;

    async fn initialize(&self, try_init_table_version: bool) -> Result<(), S::Error> {
        self.members.get().await?;
        let versions = self.versions.get().await?;

        if try_init_table_version {
            let mut tx = self.store.create_transaction().await.map_err(Error::Store)?;
            let initial = Bytes::try_from(StoredTableVersion::from(&TableVersion::default()))?;

            if versions
                .try_add(&mut tx, VERSION_KEY.to_string(), initial)
                .await
                .map_err(Error::Store)?
            {
                tx.commit().await.map_err(Error::Store)?;
                debug!(cluster_id = %self.cluster_id, "created initial table version");
            } else {
                tx.abort().await;
            }
        }

        info!(
            cluster_id = %self.cluster_id,
            state_name = %self.state_name(),
            "membership table initialized"
        );

        Ok(())
    }

    async fn delete_entries(&self, cluster_id: &str) -> Result<(), S::Error> {
        self.delete_entries_with_cancellation(cluster_id, &CancellationToken::new())
            .await
    }

    async fn insert_row(
        &self,
        entry: MembershipEntry,
        table_version: TableVersion,
    ) -> Result<bool, S::Error> {
        let members = self.members.get().await?;
        let key = self.codec.encode(&entry.silo_address);
        let record = StoredRecord::encode(&entry, new_etag(), &self.codec);
        let etag = record.etag.clone();
        let bytes = Bytes::try_from(record)?;

        let mut tx = self.store.create_transaction().await.map_err(Error::Store)?;
        if !members
            .try_add(&mut tx, key, bytes)
            .await
            .map_err(Error::Store)?
        {
            tx.abort().await;
            debug!(silo = %entry.silo_address, "membership row already exists");
            return Ok(false);
        }

        let version = self.advance_version(&mut tx, &table_version).await?;
        tx.commit().await.map_err(Error::Store)?;

        debug!(
            silo = %entry.silo_address,
            status = %entry.status,
            %etag,
            %version,
            "inserted membership row"
        );

        Ok(true)
    }

    async fn read_row(&self, silo_address: &SiloAddress) -> Result<MembershipTableData, S::Error> {
        let members = self.members.get().await?;
        let versions = self.versions.get().await?;
        let key = self.codec.encode(silo_address);

        let mut tx = self.store.create_transaction().await.map_err(Error::Store)?;
        let stored = members
            .get(&mut tx, &key, LockMode::Default)
            .await
            .map_err(Error::Store)?;
        let version = self.read_version(versions, &mut tx, LockMode::Default).await?;
        tx.abort().await;

        let members = match stored {
            Some(bytes) => {
                let record = StoredRecord::try_from(bytes)?;
                vec![(record.decode(&self.codec)?, record.etag)]
            }
            None => Vec::new(),
        };

        Ok(MembershipTableData::new(members, version))
    }

    async fn read_all(&self) -> Result<MembershipTableData, S::Error> {
        self.read_all_with_cancellation(&CancellationToken::new())
            .await
    }

    async fn update_row(
        &self,
        entry: MembershipEntry,
        etag: &str,
        table_version: TableVersion,
    ) -> Result<bool, S::Error> {
        let members = self.members.get().await?;
        let key = self.codec.encode(&entry.silo_address);

        let mut tx = self.store.create_transaction().await.map_err(Error::Store)?;
        let Some(current) = members
            .get(&mut tx, &key, LockMode::Update)
            .await
            .map_err(Error::Store)?
        else {
            tx.abort().await;
            debug!(silo = %entry.silo_address, "no membership row to update");
            return Ok(false);
        };

        let current = StoredRecord::try_from(current)?;
        if current.etag != etag {
            tx.abort().await;
            debug!(
                silo = %entry.silo_address,
                expected = %etag,
                actual = %current.etag,
                "membership row etag mismatch"
            );
            return Ok(false);
        }

        let record = StoredRecord::encode(&entry, new_etag(), &self.codec);
        let updated_etag = record.etag.clone();
        members
            .set(&mut tx, key, Bytes::try_from(record)?)
            .await
            .map_err(Error::Store)?;

        let version = self.advance_version(&mut tx, &table_version).await?;
        tx.commit().await.map_err(Error::Store)?;

        debug!(
            silo = %entry.silo_address,
            status = %entry.status,
            etag = %updated_etag,
            %version,
            "updated membership row"
        );

        Ok(true)
    }

    async fn update_i_am_alive(&self, entry: &MembershipEntry) -> Result<(), S::Error> {
        let members = self.members.get().await?;
        let key = self.codec.encode(&entry.silo_address);

        let mut tx = self.store.create_transaction().await.map_err(Error::Store)?;
        let Some(current) = members
            .get(&mut tx, &key, LockMode::Update)
            .await
            .map_err(Error::Store)?
        else {
            tx.abort().await;
            debug!(silo = %entry.silo_address, "no membership row for heartbeat");
            return Ok(());
        };

        let record =
            StoredRecord::try_from(current)?.with_i_am_alive_time(entry.i_am_alive_time, new_etag());
        members
            .set(&mut tx, key, Bytes::try_from(record)?)
            .await
            .map_err(Error::Store)?;
        tx.commit().await.map_err(Error::Store)?;

        debug!(
            silo = %entry.silo_address,
            i_am_alive_time = %entry.i_am_alive_time,
            "recorded heartbeat"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use rollcall_kv_memory::{MemoryDictionary, MemoryStore, MemoryTransaction};
    use rollcall_membership::SiloStatus;
    use tracing_subscriber::fmt::MakeWriter;

    /// Log sink shared between a scoped subscriber and the test.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Store wrapper counting dictionary resolutions.
    #[derive(Clone, Debug, Default)]
    struct CountingStore {
        inner: MemoryStore,
        resolutions: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TransactionalStore for CountingStore {
        type Error = rollcall_kv_memory::Error;
        type Transaction = MemoryTransaction;
        type Dictionary = MemoryDictionary;

        async fn get_or_add_dictionary(
            &self,
            name: &str,
        ) -> std::result::Result<MemoryDictionary, Self::Error> {
            self.resolutions.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.inner.get_or_add_dictionary(name).await
        }

        async fn create_transaction(&self) -> std::result::Result<MemoryTransaction, Self::Error> {
            self.inner.create_transaction().await
        }
    }

    fn entry(port: u16) -> MembershipEntry {
        let address = SiloAddress::new(format!("10.0.0.1:{port}").parse().unwrap(), 1);
        MembershipEntry::new(address, SiloStatus::Joining, "host", "silo", 0, Utc::now())
    }

    #[tokio::test]
    async fn test_dictionaries_resolved_once_under_concurrency() {
        let store = CountingStore::default();
        let table = Arc::new(KvMembershipTable::new(
            store.clone(),
            &ClusterOptions::new("cluster"),
            &MembershipTableOptions::default(),
        ));

        let reads = (0..8)
            .map(|_| {
                let table = table.clone();
                tokio::spawn(async move { table.read_all().await.map(|data| data.len()) })
            })
            .collect::<Vec<_>>();

        for read in reads {
            assert_eq!(read.await.unwrap().unwrap(), 0);
        }

        // One resolution for the members dictionary, one for the versions.
        assert_eq!(store.resolutions.load(Ordering::SeqCst), 2);

        table.read_all().await.unwrap();
        assert_eq!(store.resolutions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_state_name_override() {
        let store = MemoryStore::new();
        let table = KvMembershipTable::new(
            store.clone(),
            &ClusterOptions::new("cluster"),
            &MembershipTableOptions {
                state_name: Some("custom".to_string()),
            },
        );
        table.initialize(true).await.unwrap();
        assert_eq!(table.state_name(), "custom");

        let row = entry(11111);
        assert!(table.insert_row(row, TableVersion::default()).await.unwrap());

        let dictionary = store.get_or_add_dictionary("custom").await.unwrap();
        let mut tx = store.create_transaction().await.unwrap();
        let stored = dictionary
            .get(&mut tx, "10.0.0.1:11111@1", LockMode::Default)
            .await
            .unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_version_untouched_by_heartbeat() {
        let table = KvMembershipTable::new(
            MemoryStore::new(),
            &ClusterOptions::new("cluster"),
            &MembershipTableOptions::default(),
        );
        table.initialize(true).await.unwrap();

        let mut row = entry(11111);
        table.insert_row(row.clone(), TableVersion::new(1, "")).await.unwrap();
        let before = table.read_all().await.unwrap().version;

        row.i_am_alive_time = Utc::now();
        table.update_i_am_alive(&row).await.unwrap();

        assert_eq!(table.read_all().await.unwrap().version, before);
    }

    #[tokio::test]
    async fn test_delete_for_other_cluster_logged_at_debug() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(logs.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let table = KvMembershipTable::new(
            MemoryStore::new(),
            &ClusterOptions::new("cluster"),
            &MembershipTableOptions::default(),
        );
        table.initialize(true).await.unwrap();
        assert!(
            table
                .insert_row(entry(11111), TableVersion::default())
                .await
                .unwrap()
        );

        table.delete_entries("other-cluster").await.unwrap();

        let output = logs.contents();
        assert!(output.contains("ignoring delete for another cluster"));
        assert!(!output.contains("WARN"));
        assert_eq!(table.read_all().await.unwrap().len(), 1);
    }
}
