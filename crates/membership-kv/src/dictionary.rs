//! Lazily resolved dictionary handles and cancellable scans.

use std::fmt::{Debug, Formatter, Result as FmtResult};

use bytes::Bytes;
use rollcall_kv::{Dictionary, TransactionalStore};
use tokio::sync::OnceCell;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// A dictionary resolved from the store on first use.
///
/// Concurrent first callers wait on a single resolution; later calls return
/// the cached handle without touching the store.
pub struct LazyDictionary<S>
where
    S: TransactionalStore,
{
    store: S,
    name: String,
    dictionary: OnceCell<S::Dictionary>,
}

impl<S> LazyDictionary<S>
where
    S: TransactionalStore,
{
    /// Create a handle for the dictionary `name` in `store`
    pub fn new(store: S, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            dictionary: OnceCell::new(),
        }
    }

    /// Name of the dictionary
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved dictionary, resolving it if this is the first call.
    pub async fn get(&self) -> Result<&S::Dictionary, S::Error> {
        if let Some(dictionary) = self.dictionary.get() {
            return Ok(dictionary);
        }

        self.dictionary
            .get_or_try_init(|| async {
                debug!(dictionary = %self.name, "resolving dictionary");
                self.store
                    .get_or_add_dictionary(&self.name)
                    .await
                    .map_err(Error::Store)
            })
            .await
    }
}

impl<S> Debug for LazyDictionary<S>
where
    S: TransactionalStore,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("LazyDictionary")
            .field("name", &self.name)
            .field("resolved", &self.dictionary.initialized())
            .finish_non_exhaustive()
    }
}

/// Collect every entry of `dictionary` visible to `tx`.
///
/// Fails with [`Error::Cancelled`] as soon as `cancel` fires.
pub async fn scan<D>(
    dictionary: &D,
    tx: &mut D::Transaction,
    cancel: &CancellationToken,
) -> Result<Vec<(String, Bytes)>, D::Error>
where
    D: Dictionary,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let mut stream = dictionary.enumerate(tx).await.map_err(Error::Store)?;
    let mut entries = Vec::new();

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(dictionary = %dictionary.name(), "scan cancelled");
                return Err(Error::Cancelled);
            }
            next = stream.next() => match next {
                Some(entry) => entries.push(entry.map_err(Error::Store)?),
                None => return Ok(entries),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use rollcall_kv::Transaction;
    use rollcall_kv_memory::MemoryStore;

    #[tokio::test]
    async fn test_handle_resolved_once() {
        let store = MemoryStore::new();
        let handle = LazyDictionary::new(store, "members");

        let first = handle.get().await.unwrap() as *const _;
        let second = handle.get().await.unwrap() as *const _;

        assert_eq!(first, second);
        assert_eq!(handle.name(), "members");
    }

    #[tokio::test]
    async fn test_scan_collects_entries() {
        let store = MemoryStore::new();
        let handle = LazyDictionary::new(store.clone(), "members");
        let dictionary = handle.get().await.unwrap();

        let mut tx = store.create_transaction().await.unwrap();
        dictionary
            .set(&mut tx, "b".to_string(), Bytes::from_static(b"2"))
            .await
            .unwrap();
        dictionary
            .set(&mut tx, "a".to_string(), Bytes::from_static(b"1"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.create_transaction().await.unwrap();
        let entries = scan(dictionary, &mut tx, &CancellationToken::new())
            .await
            .unwrap();

        let keys = entries.iter().map(|(key, _)| key.as_str()).collect::<Vec<_>>();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_scan_cancelled() {
        let store = MemoryStore::new();
        let handle = LazyDictionary::new(store.clone(), "members");
        let dictionary = handle.get().await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut tx = store.create_transaction().await.unwrap();
        assert_matches!(
            scan(dictionary, &mut tx, &cancel).await,
            Err(Error::Cancelled)
        );
    }
}
