//! GatewaysProvider (C1): produces an ordered list of candidate gateway origins.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;
use crate::gateway::{Gateway, GatewayMetadata, GatewayStatus};

/// Documented fallback gateways used when a provider would otherwise return
/// an empty set. Callers treat an empty candidate list as fatal, so every
/// provider implementation MUST fall back to this (or a caller-supplied)
/// non-empty set rather than propagate emptiness.
pub const DEFAULT_FALLBACK_GATEWAYS: &[&str] = &["https://arweave.net", "https://ar-io.dev"];

fn fallback_gateways() -> Vec<Gateway> {
    DEFAULT_FALLBACK_GATEWAYS
        .iter()
        .filter_map(|s| Gateway::parse(s))
        .collect()
}

/// Ordering key for sorting registry-backed candidates by stake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeSortKey {
    /// Sort by the gateway operator's own stake.
    OperatorStake,
    /// Sort by total stake delegated to the gateway.
    TotalDelegatedStake,
}

/// Sort direction for [`StakeSortKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Largest stake first.
    Descending,
    /// Smallest stake first.
    Ascending,
}

/// Contract for producing an ordered sequence of candidate gateway origins.
///
/// The ordering is stable within a single call and may be interpreted by a
/// [`crate::routing::RoutingStrategy`] as a priority.
#[async_trait]
pub trait GatewaysProvider: Send + Sync {
    /// Return the current ordered candidate set. Never empty: implementers
    /// fall back to [`DEFAULT_FALLBACK_GATEWAYS`] rather than return an
    /// empty vector.
    async fn get_gateways(&self) -> Result<Vec<Gateway>>;
}

/// A fixed, unchanging list of gateways.
#[derive(Debug, Clone)]
pub struct StaticGatewaysProvider {
    gateways: Vec<Gateway>,
}

impl StaticGatewaysProvider {
    /// Construct from an explicit list, falling back to the documented
    /// defaults if the caller passed an empty one.
    pub fn new(gateways: Vec<Gateway>) -> Self {
        let gateways = if gateways.is_empty() { fallback_gateways() } else { gateways };
        Self { gateways }
    }
}

#[async_trait]
impl GatewaysProvider for StaticGatewaysProvider {
    async fn get_gateways(&self) -> Result<Vec<Gateway>> {
        Ok(self.gateways.clone())
    }
}

/// A source of on-chain gateway metadata consulted by
/// [`RegistryGatewaysProvider`]. Kept as a narrow trait so the concrete
/// registry fetcher (out of scope per spec.md §1) can be injected.
#[async_trait]
pub trait GatewayRegistry: Send + Sync {
    /// Fetch the full known set of gateways with their on-chain metadata.
    async fn all_gateways(&self) -> Result<Vec<GatewayMetadata>>;
}

/// Provider backed by an on-chain gateway registry, filtered and sorted per
/// spec.md §4.1.
pub struct RegistryGatewaysProvider {
    registry: Arc<dyn GatewayRegistry>,
    sort_key: StakeSortKey,
    sort_order: SortOrder,
}

impl RegistryGatewaysProvider {
    /// Construct a provider over the given registry, sorting the result by
    /// `sort_key` in `sort_order`.
    pub fn new(registry: Arc<dyn GatewayRegistry>, sort_key: StakeSortKey, sort_order: SortOrder) -> Self {
        Self { registry, sort_key, sort_order }
    }

    fn stake_of(&self, meta: &GatewayMetadata) -> u64 {
        match self.sort_key {
            StakeSortKey::OperatorStake => meta.operator_stake,
            StakeSortKey::TotalDelegatedStake => meta.total_delegated_stake,
        }
    }

    fn sort(&self, mut candidates: Vec<GatewayMetadata>) -> Vec<GatewayMetadata> {
        candidates.sort_by(|a, b| {
            let (a, b) = (self.stake_of(a), self.stake_of(b));
            match self.sort_order {
                SortOrder::Descending => b.cmp(&a),
                SortOrder::Ascending => a.cmp(&b),
            }
        });
        candidates
    }
}

#[async_trait]
impl GatewaysProvider for RegistryGatewaysProvider {
    #[tracing::instrument(skip(self))]
    async fn get_gateways(&self) -> Result<Vec<Gateway>> {
        let all = self.registry.all_gateways().await?;
        let healthy: Vec<GatewayMetadata> = all
            .iter()
            .filter(|g| g.status == GatewayStatus::Joined && g.failed_consecutive_epochs == 0)
            .cloned()
            .collect();

        let candidates = if healthy.is_empty() {
            let mut joined: Vec<GatewayMetadata> =
                all.into_iter().filter(|g| g.status == GatewayStatus::Joined).collect();
            joined.sort_by_key(|g| g.failed_consecutive_epochs);
            let take = std::cmp::max(5, (joined.len() as f64 * 0.3).ceil() as usize);
            joined.into_iter().take(take).collect()
        } else {
            healthy
        };

        let sorted = self.sort(candidates);
        let gateways: Vec<Gateway> = sorted.into_iter().map(|g| g.gateway).collect();

        if gateways.is_empty() {
            tracing::warn!("registry provider found no candidates; using fallback gateways");
            Ok(fallback_gateways())
        } else {
            Ok(gateways)
        }
    }
}

struct CacheState {
    gateways: Vec<Gateway>,
    fetched_at: Instant,
}

/// Wraps any [`GatewaysProvider`], caching its result for a fixed TTL.
///
/// Refresh on expiry is "singleflight": concurrent callers racing past an
/// expired entry share one underlying fetch rather than stampeding the
/// wrapped provider, mirroring the teacher's `frys-cache` TTL policy
/// (`TtlPolicy::is_expired`) composed with a mutex-guarded refresh instead of
/// a lock-free structure, since refreshes are rare relative to reads.
pub struct CachedGatewaysProvider {
    inner: Arc<dyn GatewaysProvider>,
    ttl: Duration,
    state: Mutex<Option<CacheState>>,
}

impl CachedGatewaysProvider {
    /// Wrap `inner`, caching results for `ttl`.
    pub fn new(inner: Arc<dyn GatewaysProvider>, ttl: Duration) -> Self {
        Self { inner, ttl, state: Mutex::new(None) }
    }
}

#[async_trait]
impl GatewaysProvider for CachedGatewaysProvider {
    #[tracing::instrument(skip(self))]
    async fn get_gateways(&self) -> Result<Vec<Gateway>> {
        let mut guard = self.state.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.gateways.clone());
            }
        }
        let gateways = self.inner.get_gateways().await?;
        *guard = Some(CacheState { gateways: gateways.clone(), fetched_at: Instant::now() });
        Ok(gateways)
    }
}
