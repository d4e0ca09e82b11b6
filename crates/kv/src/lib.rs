//! Abstract interface for transactional key-value stores made of named
//! dictionaries.
//!
//! A store hands out [`Dictionary`] handles by name and creates
//! [`Transaction`]s. Every dictionary operation runs inside a transaction;
//! nothing a transaction writes is visible to others until it commits, and
//! a transaction that is aborted or dropped leaves no trace.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_stream::Stream;

/// Marker trait for store errors.
pub trait StoreError: Debug + Error + Send + Sync + 'static {}

/// Stream of `(key, value)` pairs produced by [`Dictionary::enumerate`].
pub type EntryStream<E> = Box<dyn Stream<Item = Result<(String, Bytes), E>> + Send + Unpin>;

/// How a read interacts with the key's lock.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LockMode {
    /// Read the transaction's snapshot without taking a lock.
    #[default]
    Default,

    /// Take the key's exclusive lock and read the latest committed value.
    /// The lock is held until the transaction commits or aborts.
    Update,
}

/// A unit of atomic work against a [`TransactionalStore`].
#[async_trait]
pub trait Transaction: Send + Sync + 'static {
    /// The error type for transaction operations.
    type Error: StoreError;

    /// Identifier of this transaction, unique within its store.
    fn id(&self) -> u64;

    /// Atomically applies every write made through this transaction.
    async fn commit(self) -> Result<(), Self::Error>;

    /// Discards every write made through this transaction and releases its
    /// locks. Dropping the transaction has the same effect.
    async fn abort(self);
}

/// A named, string-keyed dictionary of byte values.
#[async_trait]
pub trait Dictionary: Clone + Debug + Send + Sync + 'static {
    /// The error type for dictionary operations.
    type Error: StoreError;

    /// The transaction type accepted by this dictionary.
    type Transaction: Transaction<Error = Self::Error>;

    /// The name the dictionary was resolved with.
    fn name(&self) -> &str;

    /// Reads the value stored under `key`.
    async fn get(
        &self,
        tx: &mut Self::Transaction,
        key: &str,
        lock_mode: LockMode,
    ) -> Result<Option<Bytes>, Self::Error>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(
        &self,
        tx: &mut Self::Transaction,
        key: String,
        value: Bytes,
    ) -> Result<(), Self::Error>;

    /// Stores `value` under `key` only if the key is absent.
    ///
    /// Returns `false` without writing anything if the key already exists.
    async fn try_add(
        &self,
        tx: &mut Self::Transaction,
        key: String,
        value: Bytes,
    ) -> Result<bool, Self::Error>;

    /// Removes `key`, returning the value it held if it was present.
    async fn try_remove(
        &self,
        tx: &mut Self::Transaction,
        key: &str,
    ) -> Result<Option<Bytes>, Self::Error>;

    /// Enumerates every entry visible to the transaction in ascending key
    /// order.
    async fn enumerate(
        &self,
        tx: &mut Self::Transaction,
    ) -> Result<EntryStream<Self::Error>, Self::Error>;
}

/// A transactional store of named dictionaries.
#[async_trait]
pub trait TransactionalStore: Clone + Send + Sync + 'static {
    /// The error type for store operations.
    type Error: StoreError;

    /// The transaction type created by this store.
    type Transaction: Transaction<Error = Self::Error>;

    /// The dictionary type handed out by this store.
    type Dictionary: Dictionary<Error = Self::Error, Transaction = Self::Transaction>;

    /// Returns the dictionary called `name`, creating it if it does not exist.
    async fn get_or_add_dictionary(&self, name: &str) -> Result<Self::Dictionary, Self::Error>;

    /// Starts a new transaction.
    async fn create_transaction(&self) -> Result<Self::Transaction, Self::Error>;
}
