//! Gateway origin and on-chain metadata types.

use serde::{Deserialize, Serialize};

/// An HTTP origin a `Wayfinder` can route requests to.
///
/// This is all a [`crate::routing::RoutingStrategy`] needs; on-chain
/// metadata lives separately in [`GatewayMetadata`] so strategies that don't
/// need it never pay to construct or clone it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gateway {
    /// URL scheme, typically `"https"`.
    pub scheme: String,
    /// Host, e.g. `"arweave.net"`.
    pub host: String,
    /// Optional explicit port.
    pub port: Option<u16>,
}

impl Gateway {
    /// Construct a gateway from an `https://` or `http://` origin string.
    pub fn parse(origin: &str) -> Option<Self> {
        let url = url::Url::parse(origin).ok()?;
        Some(Self {
            scheme: url.scheme().to_string(),
            host: url.host_str()?.to_string(),
            port: url.port(),
        })
    }

    /// Render as `scheme://host[:port]`.
    pub fn origin(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.scheme, self.host, port),
            None => format!("{}://{}", self.scheme, self.host),
        }
    }
}

impl std::fmt::Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.origin())
    }
}

/// On-chain gateway participation status, as reported by the network
/// registry a [`crate::providers::GatewaysProvider`] may consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    /// Actively participating in the network.
    Joined,
    /// Winding down / exiting the network.
    Leaving,
    /// Any other reported status.
    Other,
}

/// On-chain metadata about a gateway, used only by registry-backed providers
/// and their sorters; routing strategies operate on [`Gateway`] alone.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayMetadata {
    /// The gateway's origin.
    pub gateway: Gateway,
    /// Stake posted by the gateway operator, in network base units.
    pub operator_stake: u64,
    /// Stake delegated to the gateway by other participants.
    pub total_delegated_stake: u64,
    /// Current on-chain status.
    pub status: GatewayStatus,
    /// Number of consecutive epochs this gateway has failed health checks.
    pub failed_consecutive_epochs: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extracts_scheme_host_and_port() {
        let gw = Gateway::parse("https://arweave.net:8443").unwrap();
        assert_eq!(gw.scheme, "https");
        assert_eq!(gw.host, "arweave.net");
        assert_eq!(gw.port, Some(8443));
    }

    #[test]
    fn origin_omits_port_when_absent() {
        let gw = Gateway {
            scheme: "https".into(),
            host: "arweave.net".into(),
            port: None,
        };
        assert_eq!(gw.origin(), "https://arweave.net");
    }

    #[test]
    fn origin_includes_port_when_present() {
        let gw = Gateway {
            scheme: "http".into(),
            host: "localhost".into(),
            port: Some(1984),
        };
        assert_eq!(gw.origin(), "http://localhost:1984");
    }
}
