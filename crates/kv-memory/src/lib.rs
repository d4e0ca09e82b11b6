//! In-memory (single node) implementation of the transactional key-value
//! store for local development and tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rollcall_kv::{Dictionary, EntryStream, LockMode, Transaction, TransactionalStore};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, trace};

/// Default time a transaction waits for a key lock.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(4);

type Entries = Arc<BTreeMap<String, Bytes>>;
type LockKey = (String, String);

/// Options for configuring a `MemoryStore`.
#[derive(Clone, Debug)]
pub struct MemoryStoreOptions {
    /// How long a transaction waits for a key lock before failing with
    /// [`Error::LockTimeout`].
    pub lock_timeout: Duration,
}

impl Default for MemoryStoreOptions {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

struct Shared {
    /// Committed state: dictionary name -> entries. Entries are replaced
    /// copy-on-write so transactions can hold cheap snapshots.
    dictionaries: RwLock<HashMap<String, Entries>>,
    /// Key locks currently held or waited on. Idle entries are pruned when
    /// their last holder releases them.
    locks: parking_lot::Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
    next_transaction_id: AtomicU64,
    options: MemoryStoreOptions,
}

impl Shared {
    /// Release `guards` and drop the lock table entries nobody else holds or
    /// waits on.
    fn release_locks(&self, guards: HashMap<LockKey, OwnedMutexGuard<()>>) {
        if guards.is_empty() {
            return;
        }

        let mut locks = self.locks.lock();
        for (key, guard) in guards {
            drop(guard);
            prune_lock(&mut locks, &key);
        }
    }
}

/// Remove `key` from the lock table if the table holds the only reference.
fn prune_lock(locks: &mut HashMap<LockKey, Arc<Mutex<()>>>, key: &LockKey) {
    if locks
        .get(key)
        .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
    {
        locks.remove(key);
    }
}

/// In-memory transactional store.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Creates a new `MemoryStore` with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(MemoryStoreOptions::default())
    }

    /// Creates a new `MemoryStore` with the given options.
    #[must_use]
    pub fn with_options(options: MemoryStoreOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                dictionaries: RwLock::new(HashMap::new()),
                locks: parking_lot::Mutex::new(HashMap::new()),
                next_transaction_id: AtomicU64::new(1),
                options,
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for MemoryStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("MemoryStore")
            .field("dictionaries", &"<locked>")
            .field("options", &self.shared.options)
            .finish()
    }
}

#[async_trait]
impl TransactionalStore for MemoryStore {
    type Error = Error;
    type Transaction = MemoryTransaction;
    type Dictionary = MemoryDictionary;

    async fn get_or_add_dictionary(&self, name: &str) -> Result<MemoryDictionary, Error> {
        let mut dictionaries = self.shared.dictionaries.write().await;
        if !dictionaries.contains_key(name) {
            debug!(dictionary = name, "creating dictionary");
            dictionaries.insert(name.to_string(), Entries::default());
        }

        Ok(MemoryDictionary {
            name: name.to_string(),
            shared: self.shared.clone(),
        })
    }

    async fn create_transaction(&self) -> Result<MemoryTransaction, Error> {
        let id = self
            .shared
            .next_transaction_id
            .fetch_add(1, Ordering::Relaxed);
        let snapshot = self.shared.dictionaries.read().await.clone();
        trace!(transaction = id, "transaction created");

        Ok(MemoryTransaction {
            id,
            shared: self.shared.clone(),
            snapshot,
            writes: HashMap::new(),
            guards: HashMap::new(),
        })
    }
}

/// A transaction against a [`MemoryStore`].
///
/// Reads without a lock see the store as it was when the transaction was
/// created. Writes are buffered and applied on commit while every written
/// key stays locked.
pub struct MemoryTransaction {
    id: u64,
    shared: Arc<Shared>,
    snapshot: HashMap<String, Entries>,
    /// Buffered writes; `None` marks a removal.
    writes: HashMap<String, BTreeMap<String, Option<Bytes>>>,
    guards: HashMap<LockKey, OwnedMutexGuard<()>>,
}

impl MemoryTransaction {
    fn check_store(&self, shared: &Arc<Shared>) -> Result<(), Error> {
        if Arc::ptr_eq(&self.shared, shared) {
            Ok(())
        } else {
            Err(Error::ForeignTransaction(self.id))
        }
    }

    fn own_write(&self, dictionary: &str, key: &str) -> Option<Option<Bytes>> {
        self.writes
            .get(dictionary)
            .and_then(|changes| changes.get(key))
            .cloned()
    }

    fn snapshot_value(&self, dictionary: &str, key: &str) -> Option<Bytes> {
        self.own_write(dictionary, key).unwrap_or_else(|| {
            self.snapshot
                .get(dictionary)
                .and_then(|entries| entries.get(key).cloned())
        })
    }

    async fn latest_value(&self, dictionary: &str, key: &str) -> Option<Bytes> {
        if let Some(value) = self.own_write(dictionary, key) {
            return value;
        }

        self.shared
            .dictionaries
            .read()
            .await
            .get(dictionary)
            .and_then(|entries| entries.get(key).cloned())
    }

    async fn lock(&mut self, dictionary: &str, key: &str) -> Result<(), Error> {
        let lock_key = (dictionary.to_string(), key.to_string());
        if self.guards.contains_key(&lock_key) {
            return Ok(());
        }

        let mutex = self
            .shared
            .locks
            .lock()
            .entry(lock_key.clone())
            .or_default()
            .clone();

        let timeout = self.shared.options.lock_timeout;
        let acquired = tokio::time::timeout(timeout, mutex.lock_owned()).await;
        let Ok(guard) = acquired else {
            prune_lock(&mut self.shared.locks.lock(), &lock_key);
            return Err(Error::LockTimeout {
                dictionary: dictionary.to_string(),
                key: key.to_string(),
                timeout,
            });
        };

        trace!(transaction = self.id, dictionary, key, "lock acquired");
        self.guards.insert(lock_key, guard);

        Ok(())
    }

    fn buffer_write(&mut self, dictionary: &str, key: String, value: Option<Bytes>) {
        self.writes
            .entry(dictionary.to_string())
            .or_default()
            .insert(key, value);
    }
}

impl Debug for MemoryTransaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("MemoryTransaction")
            .field("id", &self.id)
            .field("locks_held", &self.guards.len())
            .finish_non_exhaustive()
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.shared.release_locks(std::mem::take(&mut self.guards));
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    type Error = Error;

    fn id(&self) -> u64 {
        self.id
    }

    async fn commit(mut self) -> Result<(), Error> {
        let writes = std::mem::take(&mut self.writes);

        if !writes.is_empty() {
            let mut dictionaries = self.shared.dictionaries.write().await;
            for (name, changes) in writes {
                let entries = Arc::make_mut(dictionaries.entry(name).or_default());
                for (key, value) in changes {
                    match value {
                        Some(value) => {
                            entries.insert(key, value);
                        }
                        None => {
                            entries.remove(&key);
                        }
                    }
                }
            }
        }

        trace!(transaction = self.id, "transaction committed");

        Ok(())
    }

    async fn abort(self) {
        trace!(transaction = self.id, "transaction aborted");
    }
}

/// A dictionary inside a [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryDictionary {
    name: String,
    shared: Arc<Shared>,
}

impl Debug for MemoryDictionary {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("MemoryDictionary")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Dictionary for MemoryDictionary {
    type Error = Error;
    type Transaction = MemoryTransaction;

    fn name(&self) -> &str {
        &self.name
    }

    async fn get(
        &self,
        tx: &mut MemoryTransaction,
        key: &str,
        lock_mode: LockMode,
    ) -> Result<Option<Bytes>, Error> {
        tx.check_store(&self.shared)?;

        match lock_mode {
            LockMode::Default => Ok(tx.snapshot_value(&self.name, key)),
            LockMode::Update => {
                tx.lock(&self.name, key).await?;
                Ok(tx.latest_value(&self.name, key).await)
            }
        }
    }

    async fn set(&self, tx: &mut MemoryTransaction, key: String, value: Bytes) -> Result<(), Error> {
        tx.check_store(&self.shared)?;
        tx.lock(&self.name, &key).await?;
        tx.buffer_write(&self.name, key, Some(value));

        Ok(())
    }

    async fn try_add(
        &self,
        tx: &mut MemoryTransaction,
        key: String,
        value: Bytes,
    ) -> Result<bool, Error> {
        tx.check_store(&self.shared)?;
        tx.lock(&self.name, &key).await?;

        if tx.latest_value(&self.name, &key).await.is_some() {
            return Ok(false);
        }

        tx.buffer_write(&self.name, key, Some(value));

        Ok(true)
    }

    async fn try_remove(
        &self,
        tx: &mut MemoryTransaction,
        key: &str,
    ) -> Result<Option<Bytes>, Error> {
        tx.check_store(&self.shared)?;
        tx.lock(&self.name, key).await?;

        let previous = tx.latest_value(&self.name, key).await;
        if previous.is_some() {
            tx.buffer_write(&self.name, key.to_string(), None);
        }

        Ok(previous)
    }

    async fn enumerate(&self, tx: &mut MemoryTransaction) -> Result<EntryStream<Error>, Error> {
        tx.check_store(&self.shared)?;

        let mut entries = tx
            .snapshot
            .get(&self.name)
            .map(|entries| (**entries).clone())
            .unwrap_or_default();

        if let Some(changes) = tx.writes.get(&self.name) {
            for (key, value) in changes {
                match value {
                    Some(value) => {
                        entries.insert(key.clone(), value.clone());
                    }
                    None => {
                        entries.remove(key);
                    }
                }
            }
        }

        Ok(Box::new(tokio_stream::iter(entries.into_iter().map(Ok))))
    }
}
