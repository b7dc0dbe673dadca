//! Typed configuration for a [`crate::wayfinder::Wayfinder`] instance.

use std::sync::Arc;
use std::time::Duration;

use crate::cdb64::PartitionedCdbReader;
use crate::error::{Result, WayfinderError};
use crate::gateway::Gateway;
use crate::providers::GatewaysProvider;
use crate::root_tx::{CdbRootTransactionSource, RootTransactionSource};
use crate::routing::{FastestPingStrategy, RoutingStrategy};
use crate::verification::VerificationStrategy;

/// Which verification strategy a [`WayfinderConfig`] selects, or none.
pub enum VerificationStrategyKind {
    /// Skip verification entirely; bytes are streamed straight through.
    None,
    /// A concrete, already-constructed strategy.
    Strategy(Arc<dyn VerificationStrategy>),
}

/// Verification-specific settings (spec.md §6 `verification.*`).
pub struct VerificationSettings {
    /// Which strategy to run.
    pub strategy: VerificationStrategyKind,
    /// Block the client stream's end-of-stream until verification completes,
    /// erroring it on failure. When `false`, the client stream ends as soon
    /// as upstream does and the outcome is only observed via the event bus.
    pub strict: bool,
    /// Upper bound on concurrent trusted-gateway fetches per verification.
    pub max_concurrency: usize,
    /// Per-expected-value fetch timeout.
    pub timeout: Duration,
    /// Minimum number of trusted gateways that must agree on a value before
    /// it is accepted as ground truth.
    pub quorum: usize,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            strategy: VerificationStrategyKind::None,
            strict: true,
            max_concurrency: 4,
            timeout: Duration::from_millis(60_000),
            quorum: 1,
        }
    }
}

/// `FastestPing` probe parameters (spec.md §6 `fastestPing.*`).
#[derive(Debug, Clone, Copy)]
pub struct FastestPingSettings {
    /// Per-gateway probe timeout.
    pub timeout: Duration,
    /// Upper bound on concurrent probes.
    pub max_concurrency: usize,
}

impl Default for FastestPingSettings {
    fn default() -> Self {
        Self { timeout: Duration::from_millis(2000), max_concurrency: 5 }
    }
}

/// Provider-cache lifetime settings (spec.md §6 `cache.*`).
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    /// How long a cached gateway list stays valid.
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(300) }
    }
}

/// Tracing/telemetry sampling settings (spec.md §6 `telemetry.*`). This crate
/// never exports telemetry itself (out of scope, §1); these settings only
/// gate how liberally it emits `tracing` events internally.
#[derive(Debug, Clone, Copy)]
pub struct TelemetrySettings {
    /// Whether verbose per-event tracing is enabled at all.
    pub enabled: bool,
    /// Fraction (0.0-1.0) of eligible events actually emitted, for
    /// high-volume events like `VerificationProgress`.
    pub sample_rate: f64,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self { enabled: true, sample_rate: 1.0 }
    }
}

/// Full configuration for a [`crate::wayfinder::Wayfinder`] instance,
/// matching every row of spec.md §6's configuration table.
pub struct WayfinderConfig {
    /// How candidate gateways are ranked/selected per request.
    pub routing_strategy: Arc<dyn RoutingStrategy>,
    /// Source of candidate gateway origins.
    pub gateways_provider: Arc<dyn GatewaysProvider>,
    /// Origins trusted to report expected digests/data roots.
    pub trusted_gateways: Vec<Gateway>,
    /// Resolves nested data items to their enclosing root transaction.
    pub root_transaction_source: Option<Arc<dyn RootTransactionSource>>,
    /// Opened partitioned CDB64 index, when root-transaction lookups or
    /// verification need it.
    pub cdb_reader: Option<Arc<PartitionedCdbReader>>,
    /// Verification behavior.
    pub verification: VerificationSettings,
    /// `FastestPing` routing strategy probe parameters.
    pub fastest_ping: FastestPingSettings,
    /// Provider-cache lifetime.
    pub cache: CacheSettings,
    /// Tracing verbosity.
    pub telemetry: TelemetrySettings,
    /// Maximum `Wayfinder::request` retry attempts.
    pub max_retries: u32,
    /// Fixed backoff between retry attempts.
    pub retry_backoff: Duration,
}

/// Builds a [`WayfinderConfig`], validating eagerly at [`build`](Self::build)
/// rather than allowing a partially-invalid config to be constructed.
pub struct WayfinderConfigBuilder {
    routing_strategy: Option<Arc<dyn RoutingStrategy>>,
    gateways_provider: Option<Arc<dyn GatewaysProvider>>,
    trusted_gateways: Vec<Gateway>,
    root_transaction_source: Option<Arc<dyn RootTransactionSource>>,
    cdb_reader: Option<Arc<PartitionedCdbReader>>,
    verification: VerificationSettings,
    fastest_ping: FastestPingSettings,
    cache: CacheSettings,
    telemetry: TelemetrySettings,
    max_retries: u32,
    retry_backoff: Duration,
}

impl Default for WayfinderConfigBuilder {
    fn default() -> Self {
        Self {
            routing_strategy: None,
            gateways_provider: None,
            trusted_gateways: Vec::new(),
            root_transaction_source: None,
            cdb_reader: None,
            verification: VerificationSettings::default(),
            fastest_ping: FastestPingSettings::default(),
            cache: CacheSettings::default(),
            telemetry: TelemetrySettings::default(),
            max_retries: 3,
            retry_backoff: Duration::from_millis(1000),
        }
    }
}

impl WayfinderConfigBuilder {
    /// Start a new builder with spec.md-default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the routing strategy.
    pub fn routing_strategy(mut self, strategy: Arc<dyn RoutingStrategy>) -> Self {
        self.routing_strategy = Some(strategy);
        self
    }

    /// Install a `FastestPing` routing strategy over `provider`, built from
    /// this builder's [`FastestPingSettings`] (set via [`fastest_ping`](Self::fastest_ping)
    /// beforehand, or the defaults otherwise).
    pub fn routing_strategy_fastest_ping(mut self, provider: Arc<dyn GatewaysProvider>, client: reqwest::Client) -> Self {
        let strategy = FastestPingStrategy::new(provider, client)
            .with_params(self.fastest_ping.max_concurrency, self.fastest_ping.timeout);
        self.routing_strategy = Some(Arc::new(strategy));
        self
    }

    /// Set the gateways provider.
    pub fn gateways_provider(mut self, provider: Arc<dyn GatewaysProvider>) -> Self {
        self.gateways_provider = Some(provider);
        self
    }

    /// Set the trusted gateways consulted during verification.
    pub fn trusted_gateways(mut self, gateways: Vec<Gateway>) -> Self {
        self.trusted_gateways = gateways;
        self
    }

    /// Set the root-transaction source used for nested data items.
    pub fn root_transaction_source(mut self, source: Arc<dyn RootTransactionSource>) -> Self {
        self.root_transaction_source = Some(source);
        self
    }

    /// Attach an opened partitioned CDB64 reader.
    pub fn cdb_reader(mut self, reader: Arc<PartitionedCdbReader>) -> Self {
        self.cdb_reader = Some(reader);
        self
    }

    /// Override verification settings.
    pub fn verification(mut self, settings: VerificationSettings) -> Self {
        self.verification = settings;
        self
    }

    /// Override `FastestPing` probe settings.
    pub fn fastest_ping(mut self, settings: FastestPingSettings) -> Self {
        self.fastest_ping = settings;
        self
    }

    /// Override provider-cache settings.
    pub fn cache(mut self, settings: CacheSettings) -> Self {
        self.cache = settings;
        self
    }

    /// Override telemetry settings.
    pub fn telemetry(mut self, settings: TelemetrySettings) -> Self {
        self.telemetry = settings;
        self
    }

    /// Override the retry count and backoff.
    pub fn retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    /// Validate and produce the final [`WayfinderConfig`].
    ///
    /// `routing_strategy` and `gateways_provider` are required; everything
    /// else falls back to spec.md-documented defaults.
    pub fn build(self) -> Result<WayfinderConfig> {
        let routing_strategy = self.routing_strategy.ok_or_else(|| WayfinderError::ConfigError {
            field: "routing_strategy".into(),
            reason: "a routing strategy is required".into(),
        })?;
        let gateways_provider = self.gateways_provider.ok_or_else(|| WayfinderError::ConfigError {
            field: "gateways_provider".into(),
            reason: "a gateways provider is required".into(),
        })?;

        if matches!(self.verification.strategy, VerificationStrategyKind::Strategy(_)) && self.trusted_gateways.is_empty() {
            return Err(WayfinderError::ConfigError {
                field: "trusted_gateways".into(),
                reason: "a verification strategy is configured but no trusted gateways were provided".into(),
            });
        }

        if self.verification.max_concurrency == 0 {
            return Err(WayfinderError::ConfigError {
                field: "verification.max_concurrency".into(),
                reason: "must be at least 1".into(),
            });
        }

        if self.verification.quorum == 0 {
            return Err(WayfinderError::ConfigError {
                field: "verification.quorum".into(),
                reason: "must be at least 1".into(),
            });
        }

        if self.max_retries == 0 {
            return Err(WayfinderError::ConfigError {
                field: "max_retries".into(),
                reason: "must be at least 1".into(),
            });
        }

        // An attached CDB64 reader with no explicit root-transaction source
        // is used to build one, so `cdb_reader` alone is enough to enable
        // nested-item resolution.
        let root_transaction_source = self.root_transaction_source.or_else(|| {
            self.cdb_reader
                .clone()
                .map(|reader| Arc::new(CdbRootTransactionSource::new(reader)) as Arc<dyn RootTransactionSource>)
        });

        Ok(WayfinderConfig {
            routing_strategy,
            gateways_provider,
            trusted_gateways: self.trusted_gateways,
            root_transaction_source,
            cdb_reader: self.cdb_reader,
            verification: self.verification,
            fastest_ping: self.fastest_ping,
            cache: self.cache,
            telemetry: self.telemetry,
            max_retries: self.max_retries,
            retry_backoff: self.retry_backoff,
        })
    }
}

/// Per-request overrides layered onto a [`WayfinderConfig`] by
/// `Wayfinder::request_with_overrides`. A present field fully replaces the
/// instance-level setting rather than merging with it (Open Question (a)'s
/// resolution).
#[derive(Default)]
pub struct RequestOverrides {
    /// Replaces `verification.strict` for this request only, when set.
    pub strict: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::StaticGatewaysProvider;
    use crate::routing::RandomStrategy;

    fn minimal_builder() -> WayfinderConfigBuilder {
        let provider = Arc::new(StaticGatewaysProvider::new(vec![]));
        WayfinderConfigBuilder::new()
            .routing_strategy(Arc::new(RandomStrategy::new(provider.clone())))
            .gateways_provider(provider)
    }

    #[test]
    fn build_fails_without_routing_strategy() {
        let err = WayfinderConfigBuilder::new()
            .gateways_provider(Arc::new(StaticGatewaysProvider::new(vec![])))
            .build()
            .unwrap_err();
        assert!(matches!(err, WayfinderError::ConfigError { field, .. } if field == "routing_strategy"));
    }

    #[test]
    fn build_succeeds_with_only_required_fields() {
        let config = minimal_builder().build().unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_backoff, Duration::from_millis(1000));
        assert!(config.trusted_gateways.is_empty());
    }

    #[test]
    fn build_rejects_zero_max_concurrency() {
        let err = minimal_builder()
            .verification(VerificationSettings { max_concurrency: 0, ..Default::default() })
            .build()
            .unwrap_err();
        assert!(matches!(err, WayfinderError::ConfigError { field, .. } if field == "verification.max_concurrency"));
    }

    #[test]
    fn build_requires_trusted_gateways_when_a_strategy_is_set() {
        let strategy: Arc<dyn VerificationStrategy> = Arc::new(crate::verification::HashVerificationStrategy);
        let err = minimal_builder()
            .verification(VerificationSettings {
                strategy: VerificationStrategyKind::Strategy(strategy),
                ..Default::default()
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, WayfinderError::ConfigError { field, .. } if field == "trusted_gateways"));
    }

    #[test]
    fn build_rejects_zero_max_retries() {
        let err = minimal_builder().retries(0, Duration::from_millis(1)).build().unwrap_err();
        assert!(matches!(err, WayfinderError::ConfigError { field, .. } if field == "max_retries"));
    }

    #[test]
    fn build_rejects_zero_quorum() {
        let err = minimal_builder()
            .verification(VerificationSettings { quorum: 0, ..Default::default() })
            .build()
            .unwrap_err();
        assert!(matches!(err, WayfinderError::ConfigError { field, .. } if field == "verification.quorum"));
    }

    #[tokio::test]
    async fn cdb_reader_alone_builds_a_root_transaction_source() {
        use crate::cdb64::{CdbManifest, PartitionedCdbReader};

        let manifest = CdbManifest { version: 1, created_at: "2026-01-01T00:00:00Z".into(), total_records: 0, partitions: vec![] };
        let reader = Arc::new(PartitionedCdbReader::new(manifest, reqwest::Client::new()));
        let config = minimal_builder().cdb_reader(reader).build().unwrap();
        assert!(config.root_transaction_source.is_some());
    }

    #[test]
    fn fastest_ping_settings_default_matches_routing_strategy_default() {
        assert_eq!(FastestPingSettings::default().max_concurrency, 5);
    }

    #[tokio::test]
    async fn routing_strategy_fastest_ping_uses_configured_settings() {
        use crate::gateway::Gateway;
        use crate::resolver::RoutingHint;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/ar-io/info"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let gateway = Gateway::parse(&server.uri()).unwrap();
        let provider = Arc::new(StaticGatewaysProvider::new(vec![gateway.clone()]));
        let config = WayfinderConfigBuilder::new()
            .fastest_ping(FastestPingSettings { timeout: Duration::from_millis(500), max_concurrency: 2 })
            .routing_strategy_fastest_ping(provider.clone(), reqwest::Client::new())
            .gateways_provider(provider)
            .build()
            .unwrap();

        let selected = config.routing_strategy.select_gateway(&RoutingHint::default()).await.unwrap();
        assert_eq!(selected, gateway);
    }
}
