//! Abstract interface for gateway discovery

use std::error::Error;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

/// Marker trait for `GatewayListProvider` errors
pub trait GatewayListProviderError: Debug + Error + Send + Sync + 'static {}

/// Source of the gateway URIs clients use to enter the cluster.
///
/// Providers are polled: callers re-query at least every
/// [`max_staleness`](GatewayListProvider::max_staleness).
#[async_trait]
pub trait GatewayListProvider: Send + Sync + 'static {
    /// The error type for provider operations.
    type Error: GatewayListProviderError;

    /// Prepares the provider for use.
    async fn initialize(&self) -> Result<(), Self::Error>;

    /// Fetches the current list of gateway URIs.
    async fn get_gateways(&self) -> Result<Vec<Url>, Self::Error>;

    /// How long a fetched list may be used before it should be refreshed.
    fn max_staleness(&self) -> Duration;

    /// Whether re-querying can yield a different list.
    fn is_updatable(&self) -> bool;
}
