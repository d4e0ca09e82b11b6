//! Gateway list provider reading the membership dictionary.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use rollcall_kv::{Transaction, TransactionalStore};
use rollcall_membership::{
    ClusterOptions, GatewayListProvider, GatewayListProviderOptions, MembershipEntry,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::codec::{AddressCodec, ParsableAddressCodec, StoredRecord};
use crate::dictionary::{LazyDictionary, scan};
use crate::error::{CodecError, Error, Result};

struct CachedGateways {
    gateways: Vec<Url>,
    /// When the refresh that produced `gateways` started.
    refreshed_at: Instant,
}

/// Gateway list provider over the dictionary a [`KvMembershipTable`] writes.
///
/// Every query scans the dictionary and returns the gateway URIs of active
/// silos that expose a proxy port. The last list is cached so callers can
/// tell when it is due for a refresh. Overlapping refreshes never replace
/// the cache with a list read from an older snapshot.
///
/// [`KvMembershipTable`]: crate::KvMembershipTable
pub struct KvGatewayListProvider<S, C = ParsableAddressCodec>
where
    S: TransactionalStore,
    C: AddressCodec,
{
    cached: RwLock<Option<CachedGateways>>,
    cluster_id: String,
    codec: C,
    max_staleness: Duration,
    members: LazyDictionary<S>,
    store: S,
}

impl<S> KvGatewayListProvider<S>
where
    S: TransactionalStore,
{
    /// Create a provider reading addresses in their canonical string form
    #[must_use]
    pub fn new(store: S, cluster: &ClusterOptions, options: &GatewayListProviderOptions) -> Self {
        Self::with_codec(store, cluster, options, ParsableAddressCodec)
    }
}

impl<S, C> KvGatewayListProvider<S, C>
where
    S: TransactionalStore,
    C: AddressCodec,
{
    /// Create a provider using `codec` to decode silo addresses
    #[must_use]
    pub fn with_codec(
        store: S,
        cluster: &ClusterOptions,
        options: &GatewayListProviderOptions,
        codec: C,
    ) -> Self {
        Self {
            cached: RwLock::new(None),
            cluster_id: cluster.cluster_id.clone(),
            codec,
            max_staleness: options.max_staleness,
            members: LazyDictionary::new(store.clone(), options.state_name(cluster)),
            store,
        }
    }

    /// Name of the dictionary the gateways are read from
    #[must_use]
    pub fn state_name(&self) -> &str {
        self.members.name()
    }

    /// Fetch the gateway list, giving up if `cancel` fires before the scan
    /// completes.
    pub async fn get_gateways_with_cancellation(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Url>, S::Error> {
        let members = self.members.get().await?;

        let started = Instant::now();
        let mut tx = self.store.create_transaction().await.map_err(Error::Store)?;
        let rows = scan(members, &mut tx, cancel).await?;
        tx.abort().await;

        let mut gateways = Vec::new();
        for (key, bytes) in rows {
            let entry = match self.decode(bytes) {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(%key, %error, "skipping undecodable membership record");
                    continue;
                }
            };

            if !entry.is_gateway() {
                continue;
            }

            match entry.gateway_uri() {
                Ok(uri) => gateways.push(uri),
                Err(error) => warn!(%key, %error, "skipping gateway with invalid uri"),
            }
        }

        debug!(
            cluster_id = %self.cluster_id,
            gateways = gateways.len(),
            "refreshed gateway list"
        );

        let mut cached = self.cached.write().await;
        if cached
            .as_ref()
            .is_none_or(|current| current.refreshed_at <= started)
        {
            *cached = Some(CachedGateways {
                gateways: gateways.clone(),
                refreshed_at: started,
            });
        } else {
            debug!(
                cluster_id = %self.cluster_id,
                "newer gateway list already cached"
            );
        }

        Ok(gateways)
    }

    /// The list returned by the last successful query, if any.
    pub async fn cached_gateways(&self) -> Option<Vec<Url>> {
        self.cached
            .read()
            .await
            .as_ref()
            .map(|cached| cached.gateways.clone())
    }

    /// Whether the cached list is missing or older than `max_staleness`.
    pub async fn is_stale(&self) -> bool {
        self.cached
            .read()
            .await
            .as_ref()
            .is_none_or(|cached| cached.refreshed_at.elapsed() >= self.max_staleness)
    }

    fn decode(&self, bytes: Bytes) -> std::result::Result<MembershipEntry, CodecError> {
        StoredRecord::try_from(bytes)?.decode(&self.codec)
    }
}

impl<S, C> Debug for KvGatewayListProvider<S, C>
where
    S: TransactionalStore,
    C: AddressCodec,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("KvGatewayListProvider")
            .field("cached", &"<locked>")
            .field("cluster_id", &self.cluster_id)
            .field("codec", &self.codec)
            .field("max_staleness", &self.max_staleness)
            .field("members", &self.members)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S, C> GatewayListProvider for KvGatewayListProvider<S, C>
where
    S: TransactionalStore,
    C: AddressCodec,
{
    type Error = Error<S::Error>;

    async fn initialize(&self) -> Result<(), S::Error> {
        self.members.get().await?;

        info!(
            cluster_id = %self.cluster_id,
            state_name = %self.state_name(),
            "gateway list provider initialized"
        );

        Ok(())
    }

    async fn get_gateways(&self) -> Result<Vec<Url>, S::Error> {
        self.get_gateways_with_cancellation(&CancellationToken::new())
            .await
    }

    fn max_staleness(&self) -> Duration {
        self.max_staleness
    }

    fn is_updatable(&self) -> bool {
        true
    }
}
