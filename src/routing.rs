//! RoutingStrategy (C2): selects a single gateway from a provider's candidates.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::{Result, WayfinderError};
use crate::gateway::Gateway;
use crate::providers::GatewaysProvider;
use crate::resolver::RoutingHint;

const DEFAULT_FASTEST_PING_CONCURRENCY: usize = 5;
const DEFAULT_FASTEST_PING_TIMEOUT: Duration = Duration::from_millis(2000);

/// Contract for picking a single gateway origin for one request.
#[async_trait]
pub trait RoutingStrategy: Send + Sync {
    /// Select a gateway for the given routing hint, or fail with
    /// [`WayfinderError::NoGatewayAvailable`].
    async fn select_gateway(&self, hint: &RoutingHint) -> Result<Gateway>;
}

/// Uniformly picks one candidate per call.
pub struct RandomStrategy {
    provider: Arc<dyn GatewaysProvider>,
}

impl RandomStrategy {
    /// Construct a strategy drawing candidates from `provider`.
    pub fn new(provider: Arc<dyn GatewaysProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl RoutingStrategy for RandomStrategy {
    #[tracing::instrument(skip(self, _hint))]
    async fn select_gateway(&self, _hint: &RoutingHint) -> Result<Gateway> {
        let candidates = self.provider.get_gateways().await?;
        if candidates.is_empty() {
            return Err(WayfinderError::NoGatewayAvailable);
        }
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        Ok(candidates[idx].clone())
    }
}

/// Monotonic per-instance counter modulo the candidate list length, with the
/// list snapshotted once at construction.
pub struct RoundRobinStrategy {
    snapshot: Vec<Gateway>,
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    /// Snapshot `provider`'s candidates now; the snapshot is fixed for the
    /// lifetime of this strategy instance.
    pub async fn new(provider: Arc<dyn GatewaysProvider>) -> Result<Self> {
        let snapshot = provider.get_gateways().await?;
        Ok(Self { snapshot, counter: AtomicUsize::new(0) })
    }

    /// Construct directly from an already-known snapshot (for tests and
    /// callers who already hold a candidate list).
    pub fn from_snapshot(snapshot: Vec<Gateway>) -> Self {
        Self { snapshot, counter: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl RoutingStrategy for RoundRobinStrategy {
    #[tracing::instrument(skip(self, _hint))]
    async fn select_gateway(&self, _hint: &RoutingHint) -> Result<Gateway> {
        if self.snapshot.is_empty() {
            return Err(WayfinderError::NoGatewayAvailable);
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % self.snapshot.len();
        Ok(self.snapshot[idx].clone())
    }
}

/// Probes up to `max_concurrency` candidates concurrently with a timeout and
/// returns the first to answer with any 2xx.
pub struct FastestPingStrategy {
    provider: Arc<dyn GatewaysProvider>,
    client: reqwest::Client,
    max_concurrency: usize,
    timeout: Duration,
}

impl FastestPingStrategy {
    /// Construct with default concurrency (5) and timeout (2000ms).
    pub fn new(provider: Arc<dyn GatewaysProvider>, client: reqwest::Client) -> Self {
        Self {
            provider,
            client,
            max_concurrency: DEFAULT_FASTEST_PING_CONCURRENCY,
            timeout: DEFAULT_FASTEST_PING_TIMEOUT,
        }
    }

    /// Override probe concurrency and per-probe timeout.
    pub fn with_params(mut self, max_concurrency: usize, timeout: Duration) -> Self {
        self.max_concurrency = max_concurrency;
        self.timeout = timeout;
        self
    }

    async fn probe(client: reqwest::Client, gateway: Gateway, timeout: Duration) -> Option<Gateway> {
        let url = format!("{}/ar-io/info", gateway.origin());
        match tokio::time::timeout(timeout, client.head(&url).send()).await {
            Ok(Ok(resp)) if resp.status().is_success() => Some(gateway),
            _ => None,
        }
    }
}

#[async_trait]
impl RoutingStrategy for FastestPingStrategy {
    #[tracing::instrument(skip(self, _hint))]
    async fn select_gateway(&self, _hint: &RoutingHint) -> Result<Gateway> {
        let candidates = self.provider.get_gateways().await?;
        if candidates.is_empty() {
            return Err(WayfinderError::NoGatewayAvailable);
        }

        use futures::stream::StreamExt;
        let mut futures = futures::stream::FuturesUnordered::new();
        for gateway in candidates.into_iter().take(self.max_concurrency) {
            futures.push(Self::probe(self.client.clone(), gateway, self.timeout));
        }

        while let Some(result) = futures.next().await {
            if let Some(gateway) = result {
                tracing::debug!(gateway = %gateway, "fastest-ping probe won");
                return Ok(gateway);
            }
        }
        Err(WayfinderError::NoGatewayAvailable)
    }
}

/// Returns a preconfigured origin, ignoring candidates entirely.
pub struct StaticStrategy {
    gateway: Gateway,
}

impl StaticStrategy {
    /// Always return `gateway`.
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl RoutingStrategy for StaticStrategy {
    async fn select_gateway(&self, _hint: &RoutingHint) -> Result<Gateway> {
        Ok(self.gateway.clone())
    }
}

/// Tries a named preferred origin with a short probe; on failure delegates
/// to an inner strategy. Composition over inheritance, per spec.md §9.
pub struct PreferredWithFallbackStrategy {
    preferred: Gateway,
    client: reqwest::Client,
    probe_timeout: Duration,
    inner: Arc<dyn RoutingStrategy>,
}

impl PreferredWithFallbackStrategy {
    /// Prefer `preferred`, falling back to `inner` if a short probe fails.
    pub fn new(preferred: Gateway, client: reqwest::Client, inner: Arc<dyn RoutingStrategy>) -> Self {
        Self { preferred, client, probe_timeout: DEFAULT_FASTEST_PING_TIMEOUT, inner }
    }
}

#[async_trait]
impl RoutingStrategy for PreferredWithFallbackStrategy {
    #[tracing::instrument(skip(self, hint))]
    async fn select_gateway(&self, hint: &RoutingHint) -> Result<Gateway> {
        let url = format!("{}/ar-io/info", self.preferred.origin());
        let probe = tokio::time::timeout(self.probe_timeout, self.client.head(&url).send()).await;
        match probe {
            Ok(Ok(resp)) if resp.status().is_success() => Ok(self.preferred.clone()),
            _ => {
                tracing::debug!(preferred = %self.preferred, "preferred gateway probe failed, delegating");
                self.inner.select_gateway(hint).await
            }
        }
    }
}
