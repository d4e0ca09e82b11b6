//! Silo address type used as the identity of a cluster member

use std::fmt::{self, Display};
use std::net::SocketAddr;
use std::str::FromStr;

use url::Url;

use crate::AddressError;

/// Scheme of the URIs clients use to reach a gateway.
pub const GATEWAY_URI_SCHEME: &str = "gwy.tcp";

/// Identity of a silo: the endpoint it listens on plus the generation that
/// distinguishes restarts of a process on the same endpoint.
///
/// The canonical string form is `<ip>:<port>@<generation>`, with IPv6
/// addresses in brackets. It round-trips losslessly through [`FromStr`]
/// and is the key under which a silo's membership record is stored.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SiloAddress {
    endpoint: SocketAddr,
    generation: i32,
}

impl SiloAddress {
    /// Create a new silo address
    #[must_use]
    pub const fn new(endpoint: SocketAddr, generation: i32) -> Self {
        Self {
            endpoint,
            generation,
        }
    }

    /// Get the endpoint of this silo
    #[must_use]
    pub const fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Get the generation of this silo
    #[must_use]
    pub const fn generation(&self) -> i32 {
        self.generation
    }

    /// Canonical string form of this address
    #[must_use]
    pub fn to_parsable_string(&self) -> String {
        self.to_string()
    }

    /// Build the URI clients use to reach this silo's gateway.
    ///
    /// The gateway listens on the silo's IP at `proxy_port`; the generation
    /// is kept as the path so clients can tell restarted silos apart.
    ///
    /// `gwy.tcp` is not a scheme `url` knows, so an IPv4 host is kept as an
    /// opaque [`url::Host::Domain`] rather than parsed. Read the endpoint
    /// back with [`SiloAddress::from_gateway_uri`] or [`Url::host_str`],
    /// never by matching on [`Url::host`].
    pub fn to_gateway_uri(&self, proxy_port: u16) -> Result<Url, AddressError> {
        let gateway_endpoint = SocketAddr::new(self.endpoint.ip(), proxy_port);
        let uri = format!(
            "{GATEWAY_URI_SCHEME}://{gateway_endpoint}/{}",
            self.generation
        );

        Url::parse(&uri).map_err(|e| AddressError::InvalidGatewayUri {
            uri,
            reason: e.to_string(),
        })
    }

    /// Recover the gateway endpoint and generation from a gateway URI.
    ///
    /// The returned address carries the gateway's port, not the silo port
    /// the URI was built from.
    pub fn from_gateway_uri(uri: &Url) -> Result<Self, AddressError> {
        let invalid = |reason: &str| AddressError::InvalidGatewayUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        if uri.scheme() != GATEWAY_URI_SCHEME {
            return Err(invalid("unexpected scheme"));
        }
        let host = uri.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = uri.port().ok_or_else(|| invalid("missing port"))?;

        let endpoint = format!("{host}:{port}")
            .parse::<SocketAddr>()
            .map_err(|e| invalid(&e.to_string()))?;
        let generation = uri
            .path()
            .strip_prefix('/')
            .ok_or_else(|| invalid("missing generation"))?
            .parse::<i32>()
            .map_err(|e| invalid(&e.to_string()))?;

        Ok(Self::new(endpoint, generation))
    }
}

impl Display for SiloAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.endpoint, self.generation)
    }
}

impl FromStr for SiloAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (endpoint, generation) = s
            .rsplit_once('@')
            .ok_or_else(|| AddressError::MissingGeneration(s.to_string()))?;

        let endpoint = endpoint
            .parse::<SocketAddr>()
            .map_err(|e| AddressError::InvalidEndpoint {
                address: s.to_string(),
                reason: e.to_string(),
            })?;

        let generation = generation
            .parse::<i32>()
            .map_err(|e| AddressError::InvalidGeneration {
                address: s.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self::new(endpoint, generation))
    }
}
