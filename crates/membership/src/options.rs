//! Configuration for membership tables and gateway providers

use std::time::Duration;

/// Default interval after which a gateway list should be refreshed
const DEFAULT_MAX_STALENESS: Duration = Duration::from_secs(60);

/// Identity of the cluster a table or provider serves.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterOptions {
    /// Cluster identifier. Names the backing dictionary unless overridden,
    /// and guards `delete_entries` against wiping another cluster.
    pub cluster_id: String,
}

impl ClusterOptions {
    /// Create options for the cluster `cluster_id`
    #[must_use]
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
        }
    }
}

/// Configuration for a membership table
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MembershipTableOptions {
    /// Name of the backing dictionary. Defaults to the cluster id.
    pub state_name: Option<String>,
}

impl MembershipTableOptions {
    /// Name of the backing dictionary for `cluster`
    #[must_use]
    pub fn state_name<'a>(&'a self, cluster: &'a ClusterOptions) -> &'a str {
        self.state_name.as_deref().unwrap_or(&cluster.cluster_id)
    }
}

/// Configuration for a gateway list provider
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GatewayListProviderOptions {
    /// Name of the backing dictionary. Defaults to the cluster id.
    pub state_name: Option<String>,

    /// Interval after which callers should refresh the gateway list
    pub max_staleness: Duration,
}

impl GatewayListProviderOptions {
    /// Name of the backing dictionary for `cluster`
    #[must_use]
    pub fn state_name<'a>(&'a self, cluster: &'a ClusterOptions) -> &'a str {
        self.state_name.as_deref().unwrap_or(&cluster.cluster_id)
    }
}

impl Default for GatewayListProviderOptions {
    fn default() -> Self {
        Self {
            state_name: None,
            max_staleness: DEFAULT_MAX_STALENESS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_name_defaults_to_cluster_id() {
        let cluster = ClusterOptions::new("cluster-a");

        assert_eq!(MembershipTableOptions::default().state_name(&cluster), "cluster-a");
        assert_eq!(GatewayListProviderOptions::default().state_name(&cluster), "cluster-a");
    }

    #[test]
    fn test_state_name_override() {
        let cluster = ClusterOptions::new("cluster-a");
        let options = MembershipTableOptions {
            state_name: Some("members".to_string()),
        };

        assert_eq!(options.state_name(&cluster), "members");
    }

    #[test]
    fn test_default_max_staleness() {
        assert_eq!(
            GatewayListProviderOptions::default().max_staleness,
            Duration::from_secs(60)
        );
    }
}
