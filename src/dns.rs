//! Gasless ArNS name resolution: maps an ArNS name to a transaction id via
//! DNS-over-HTTPS, without touching a gateway.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Result, WayfinderError};
use crate::identifier::{ArnsName, TxId};

const DOH_ENDPOINT: &str = "https://dns.google/resolve";
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

static TXT_ANSWER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"ARTX ([A-Za-z0-9_-]{43})").unwrap());

#[derive(Debug, Deserialize)]
struct DohAnswer {
    data: String,
}

#[derive(Debug, Deserialize, Default)]
struct DohResponse {
    #[serde(default)]
    #[serde(rename = "Answer")]
    answer: Vec<DohAnswer>,
}

struct CacheEntry {
    tx_id: TxId,
    fetched_at: Instant,
}

/// Resolves an ArNS name to a transaction id by querying a TXT record over
/// DNS-over-HTTPS, independent of any gateway.
///
/// Queries `GET https://dns.google/resolve?name=<name>_ar.<suffix>&type=TXT`
/// and extracts the first `Answer` entry whose `data` matches
/// `ARTX ([A-Za-z0-9_-]{43})`. Results are cached per name for 15 minutes.
/// This resolver is an optional input to routing, not on the critical path
/// of `Wayfinder::request`: its failures surface as `NotFound` and never
/// block `ar://<txid>` resolution.
pub struct DnsTxtNameResolver {
    client: reqwest::Client,
    suffix: String,
    ttl: Duration,
    endpoint: String,
    cache: Mutex<std::collections::HashMap<String, CacheEntry>>,
}

impl DnsTxtNameResolver {
    /// Construct a resolver appending `suffix` (e.g. `"permagate.io"`) to the
    /// queried DNS name, using the default 15-minute cache TTL.
    pub fn new(client: reqwest::Client, suffix: impl Into<String>) -> Self {
        Self {
            client,
            suffix: suffix.into(),
            ttl: DEFAULT_CACHE_TTL,
            endpoint: DOH_ENDPOINT.to_string(),
            cache: Mutex::new(Default::default()),
        }
    }

    /// Override the cache TTL (primarily for tests).
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Override the DNS-over-HTTPS endpoint (primarily for tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Resolve `name` to its transaction id, consulting the cache first.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, name: &ArnsName) -> Result<TxId> {
        let key = name.as_str().to_string();

        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.tx_id);
                }
            }
        }

        let dns_name = format!("{}_ar.{}", name.as_str(), self.suffix);
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("name", dns_name.as_str()), ("type", "TXT")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(WayfinderError::NotFound(format!("DNS-over-HTTPS query failed for {name}")));
        }

        let body: DohResponse = response.json().await.map_err(WayfinderError::Transport)?;

        let tx_id = body
            .answer
            .iter()
            .find_map(|a| TXT_ANSWER_RE.captures(&a.data))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| WayfinderError::NotFound(format!("no ARTX TXT record found for {name}")))
            .and_then(TxId::parse)?;

        let mut cache = self.cache.lock().await;
        cache.insert(key, CacheEntry { tx_id, fetched_at: Instant::now() });

        Ok(tx_id)
    }
}

/// Shared, cloneable handle, for composing into a [`crate::providers::GatewaysProvider`]
/// without each clone re-fetching independently.
pub type SharedDnsTxtNameResolver = Arc<DnsTxtNameResolver>;
