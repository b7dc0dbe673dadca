//! Wayfinder core (C8): composes providers, routing, resolution, verification
//! and the stream tapper into a single `request` entry point.

use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use uuid::Uuid;

use crate::config::{RequestOverrides, VerificationStrategyKind, WayfinderConfig};
use crate::error::{Result, VerificationFailureReason, WayfinderError};
use crate::events::{EventBus, WayfinderEvent};
use crate::identifier::{Identifier, TxId};
use crate::resolver::{build_gateway_url, parse_ar_url};
use crate::root_tx::RootTransactionInfo;
use crate::tap::{tap, VerificationOutcome};
use crate::verification::VerificationContext;

const HEADER_COMPONENT: &str = "x-ar-io-component";
const HEADER_REQUEST_ID: &str = "x-ar-io-request-id";
const HEADER_ARNS_RESOLVED_ID: &str = "x-arns-resolved-id";

/// A streamed HTTP response, possibly backed by a verify-gated client branch.
pub struct WayfinderResponse {
    /// The underlying HTTP status.
    pub status: StatusCode,
    /// The underlying HTTP response headers.
    pub headers: HeaderMap,
    /// The body stream handed back to the caller.
    pub body: Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>,
}

fn to_response(response: reqwest::Response) -> WayfinderResponse {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes_stream().map_err(WayfinderError::Transport);
    WayfinderResponse { status, headers, body: Box::pin(body) }
}

/// Determines the transaction id to verify against: an explicit
/// `x-arns-resolved-id` response header takes precedence over an identifier
/// already known from parsing the `ar://` input.
fn extract_tx_id(headers: &HeaderMap, identifier: &Option<Identifier>) -> Option<TxId> {
    headers
        .get(HEADER_ARNS_RESOLVED_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| TxId::parse(s).ok())
        .or(match identifier {
            Some(Identifier::TxId(id)) => Some(*id),
            _ => None,
        })
}

/// Composes every component into the `Wayfinder.request(arUrl)` entry point.
pub struct Wayfinder {
    config: WayfinderConfig,
    client: reqwest::Client,
    events: EventBus,
}

impl Wayfinder {
    /// Construct a `Wayfinder` over `config`, using a fresh default HTTP client.
    pub fn new(config: WayfinderConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    /// Construct a `Wayfinder` over `config`, reusing an existing HTTP client.
    pub fn with_client(config: WayfinderConfig, client: reqwest::Client) -> Self {
        Self { config, client, events: EventBus::default() }
    }

    /// Subscribe to this instance's lifecycle events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WayfinderEvent> {
        self.events.subscribe()
    }

    /// Resolve and fetch `input`, applying no per-request overrides.
    pub async fn request(&self, input: &str) -> Result<WayfinderResponse> {
        self.request_with_overrides(input, &RequestOverrides::default()).await
    }

    /// Resolve and fetch `input`, applying `overrides` on top of this
    /// instance's configured settings (overrides fully replace, never merge).
    #[tracing::instrument(skip(self, overrides))]
    pub async fn request_with_overrides(
        &self,
        input: &str,
        overrides: &RequestOverrides,
    ) -> Result<WayfinderResponse> {
        let request_id = Uuid::new_v4();

        if !input.starts_with("ar://") {
            self.events.emit(WayfinderEvent::RoutingSkipped { request_id });
            let response = self.client.get(input).send().await?;
            return Ok(to_response(response));
        }

        self.events.emit(WayfinderEvent::RoutingStarted { request_id });

        let mut last_error: Option<WayfinderError> = None;
        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_backoff).await;
            }
            match self.attempt(input, request_id, overrides).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "wayfinder attempt failed, retrying");
                    last_error = Some(e);
                }
            }
        }

        Err(WayfinderError::RoutingExhausted {
            attempts: self.config.max_retries,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_else(|| "no gateway available".into()),
        })
    }

    async fn attempt(
        &self,
        input: &str,
        request_id: Uuid,
        overrides: &RequestOverrides,
    ) -> Result<WayfinderResponse> {
        let parsed = parse_ar_url(input)?;
        let gateway = self.config.routing_strategy.select_gateway(&parsed.hint).await?;
        let url = build_gateway_url(&gateway, &parsed.hint)?;
        self.events.emit(WayfinderEvent::RoutingSucceeded { request_id, gateway: gateway.origin() });

        // A gateway-direct request (`ar:///<path>`) addresses no identifiable
        // object; there is nothing for a trusted gateway to attest to.
        if parsed.identifier.is_none() {
            let response = self.send(url, request_id).await?;
            self.events.emit(WayfinderEvent::VerificationSkipped {
                request_id,
                reason: "gateway-direct request".into(),
            });
            return Ok(to_response(response));
        }

        let response = self.send(url, request_id).await?;

        let tx_id = extract_tx_id(response.headers(), &parsed.identifier);

        let Some(tx_id) = tx_id else {
            self.events.emit(WayfinderEvent::VerificationSkipped {
                request_id,
                reason: "no resolvable transaction id".into(),
            });
            return Ok(to_response(response));
        };

        let strategy = match &self.config.verification.strategy {
            VerificationStrategyKind::None => {
                self.events.emit(WayfinderEvent::VerificationSkipped {
                    request_id,
                    reason: "verification disabled".into(),
                });
                return Ok(to_response(response));
            }
            VerificationStrategyKind::Strategy(strategy) => strategy.clone(),
        };

        let strict = overrides.strict.unwrap_or(self.config.verification.strict);

        // For a data item nested inside a bundle, trusted-gateway requests
        // target the enclosing root transaction, not the observed id.
        let root_info = match &self.config.root_transaction_source {
            Some(source) => match source.get_root_transaction(&tx_id).await {
                Ok(info) => info,
                Err(e) => return self.degrade_on_root_lookup_failure(response, tx_id, request_id, strict, e).await,
            },
            None => RootTransactionInfo { root_transaction_id: tx_id, root_data_item_offset: None, root_data_offset: None, is_data_item: false },
        };
        let verify_tx_id = root_info.root_transaction_id;

        let status = response.status();
        let headers = response.headers().clone();
        let total_bytes = response.content_length();
        let byte_stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>> =
            Box::pin(response.bytes_stream());

        let handle = tap(byte_stream, verify_tx_id.to_string(), total_bytes, self.events.clone(), request_id, strict);

        let ctx = VerificationContext {
            tx_id: verify_tx_id,
            total_bytes,
            trusted_gateways: self.config.trusted_gateways.clone(),
            client: self.client.clone(),
            max_concurrency: self.config.verification.max_concurrency,
            timeout: self.config.verification.timeout,
            quorum: self.config.verification.quorum,
            root_data_item_offset: root_info.root_data_item_offset,
            root_data_offset: root_info.root_data_offset,
        };
        let events = self.events.clone();
        let gate = handle.gate;
        let tx_id_str = verify_tx_id.to_string();

        tokio::spawn(async move {
            let outcome = strategy.verify(&ctx, handle.verify).await;
            match &outcome {
                VerificationOutcome::Ok => {
                    events.emit(WayfinderEvent::VerificationSucceeded { request_id, tx_id: tx_id_str.clone() })
                }
                VerificationOutcome::Failed(reason) => events.emit(WayfinderEvent::VerificationFailed {
                    request_id,
                    tx_id: tx_id_str.clone(),
                    reason: reason.clone(),
                }),
            }
            let _ = gate.send(outcome);
        });

        Ok(WayfinderResponse { status, headers, body: Box::pin(handle.client) })
    }

    /// A `RootTransactionSource` failure degrades verification to skipped,
    /// unless strict mode is active, in which case it surfaces as a
    /// `SourceError` stream failure on the client branch instead.
    async fn degrade_on_root_lookup_failure(
        &self,
        response: reqwest::Response,
        tx_id: TxId,
        request_id: Uuid,
        strict: bool,
        error: WayfinderError,
    ) -> Result<WayfinderResponse> {
        if !strict {
            tracing::debug!(%tx_id, %error, "root transaction lookup failed, degrading verification to skipped");
            self.events.emit(WayfinderEvent::VerificationSkipped {
                request_id,
                reason: format!("root transaction lookup failed: {error}"),
            });
            return Ok(to_response(response));
        }

        let status = response.status();
        let headers = response.headers().clone();
        let total_bytes = response.content_length();
        let byte_stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>> =
            Box::pin(response.bytes_stream());
        let handle = tap(byte_stream, tx_id.to_string(), total_bytes, self.events.clone(), request_id, strict);

        self.events.emit(WayfinderEvent::VerificationFailed {
            request_id,
            tx_id: tx_id.to_string(),
            reason: VerificationFailureReason::SourceError,
        });
        let _ = handle.gate.send(VerificationOutcome::Failed(VerificationFailureReason::SourceError));

        Ok(WayfinderResponse { status, headers, body: Box::pin(handle.client) })
    }

    async fn send(&self, url: url::Url, request_id: Uuid) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(url)
            .header(HEADER_COMPONENT, "wayfinder")
            .header(HEADER_REQUEST_ID, request_id.to_string())
            .send()
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WayfinderConfigBuilder;
    use crate::error::VerificationFailureReason;
    use crate::gateway::Gateway;
    use crate::providers::StaticGatewaysProvider;
    use crate::resolver::RoutingHint;
    use crate::routing::{RoutingStrategy, StaticStrategy};
    use async_trait::async_trait;
    use data_encoding::BASE64URL_NOPAD;
    use futures::StreamExt;
    use sha2::{Digest, Sha256};
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn drain_body(response: WayfinderResponse) -> Vec<u8> {
        let chunks: Vec<_> = response.body.collect().await;
        chunks.into_iter().flatten().flat_map(|b| b.to_vec()).collect()
    }

    #[tokio::test]
    async fn pass_through_for_non_ar_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("plain"))
            .mount(&server)
            .await;

        let provider = Arc::new(StaticGatewaysProvider::new(vec![]));
        let config = WayfinderConfigBuilder::new()
            .routing_strategy(Arc::new(StaticStrategy::new(Gateway::parse(&server.uri()).unwrap())))
            .gateways_provider(provider)
            .build()
            .unwrap();
        let wf = Wayfinder::new(config);

        let response = wf.request(&server.uri()).await.unwrap();
        assert_eq!(drain_body(response).await, b"plain");
    }

    #[tokio::test]
    async fn gateway_direct_request_skips_verification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("direct"))
            .mount(&server)
            .await;

        let gateway = Gateway::parse(&server.uri()).unwrap();
        let provider = Arc::new(StaticGatewaysProvider::new(vec![gateway.clone()]));
        let config = WayfinderConfigBuilder::new()
            .routing_strategy(Arc::new(StaticStrategy::new(gateway)))
            .gateways_provider(provider)
            .build()
            .unwrap();
        let wf = Wayfinder::new(config);

        let mut events = wf.subscribe();
        let response = wf.request("ar:///ar-io/info").await.unwrap();
        assert_eq!(drain_body(response).await, b"direct");

        let mut saw_skip = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, WayfinderEvent::VerificationSkipped { reason, .. } if reason == "gateway-direct request") {
                saw_skip = true;
            }
        }
        assert!(saw_skip);
    }

    #[tokio::test]
    async fn retry_exhausted_when_routing_strategy_always_fails() {
        struct AlwaysFails;
        #[async_trait]
        impl RoutingStrategy for AlwaysFails {
            async fn select_gateway(&self, _hint: &RoutingHint) -> Result<Gateway> {
                Err(WayfinderError::NoGatewayAvailable)
            }
        }

        let provider = Arc::new(StaticGatewaysProvider::new(vec![]));
        let config = WayfinderConfigBuilder::new()
            .routing_strategy(Arc::new(AlwaysFails))
            .gateways_provider(provider)
            .retries(2, std::time::Duration::from_millis(1))
            .build()
            .unwrap();
        let wf = Wayfinder::new(config);

        let err = wf.request("ar://ardrive").await.unwrap_err();
        assert!(matches!(err, WayfinderError::RoutingExhausted { attempts: 2, .. }));
    }

    #[test]
    fn extract_tx_id_prefers_response_header_over_parsed_identifier() {
        let raw = [5u8; 32];
        let header_txid = TxId::from_bytes(raw);
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_ARNS_RESOLVED_ID, header_txid.to_b64url().parse().unwrap());

        let parsed_identifier = Some(Identifier::TxId(TxId::from_bytes([9u8; 32])));
        let resolved = extract_tx_id(&headers, &parsed_identifier);
        assert_eq!(resolved, Some(header_txid));
    }

    #[test]
    fn extract_tx_id_falls_back_to_parsed_identifier() {
        let headers = HeaderMap::new();
        let txid = TxId::from_bytes([2u8; 32]);
        let parsed_identifier = Some(Identifier::TxId(txid));
        assert_eq!(extract_tx_id(&headers, &parsed_identifier), Some(txid));
    }

    #[test]
    fn extract_tx_id_is_none_for_unresolvable_arns_name_without_header() {
        let headers = HeaderMap::new();
        let parsed_identifier = Some(Identifier::ArnsName(crate::identifier::ArnsName::parse("ardrive").unwrap()));
        assert_eq!(extract_tx_id(&headers, &parsed_identifier), None);
    }

    #[tokio::test]
    async fn nested_data_item_is_verified_against_its_resolved_root_transaction() {
        use crate::root_tx::{RootTransactionInfo, RootTransactionSource};
        use crate::verification::HashVerificationStrategy;

        let body = b"hello";
        let digest = BASE64URL_NOPAD.encode(&Sha256::digest(body));
        let root_id = TxId::from_bytes([9u8; 32]);

        let gateway_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .mount(&gateway_server)
            .await;

        let trusted_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path(format!("/{root_id}")))
            .respond_with(ResponseTemplate::new(200).insert_header("x-ar-io-digest", digest.as_str()))
            .mount(&trusted_server)
            .await;

        struct FixedRoot(TxId);
        #[async_trait]
        impl RootTransactionSource for FixedRoot {
            async fn get_root_transaction(&self, _tx_id: &TxId) -> Result<RootTransactionInfo> {
                Ok(RootTransactionInfo {
                    root_transaction_id: self.0,
                    root_data_item_offset: Some(100),
                    root_data_offset: Some(200),
                    is_data_item: true,
                })
            }
        }

        let gateway = Gateway::parse(&gateway_server.uri()).unwrap();
        let trusted = Gateway::parse(&trusted_server.uri()).unwrap();
        let provider = Arc::new(StaticGatewaysProvider::new(vec![gateway.clone()]));
        let strategy: Arc<dyn crate::verification::VerificationStrategy> = Arc::new(HashVerificationStrategy);
        let config = WayfinderConfigBuilder::new()
            .routing_strategy(Arc::new(StaticStrategy::new(gateway)))
            .gateways_provider(provider)
            .trusted_gateways(vec![trusted])
            .root_transaction_source(Arc::new(FixedRoot(root_id)))
            .verification(crate::config::VerificationSettings {
                strategy: VerificationStrategyKind::Strategy(strategy),
                ..Default::default()
            })
            .build()
            .unwrap();
        let wf = Wayfinder::new(config);

        let data_item_id = TxId::from_bytes([7u8; 32]);
        let input = format!("ar://{}", data_item_id.to_b64url());
        let response = wf.request(&input).await.unwrap();
        assert_eq!(drain_body(response).await, body);
    }

    #[tokio::test]
    async fn root_transaction_lookup_failure_surfaces_as_source_error_in_strict_mode() {
        use crate::root_tx::{RootTransactionInfo, RootTransactionSource};
        use crate::verification::HashVerificationStrategy;

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
            .mount(&server)
            .await;

        struct AlwaysFails;
        #[async_trait]
        impl RootTransactionSource for AlwaysFails {
            async fn get_root_transaction(&self, tx_id: &TxId) -> Result<RootTransactionInfo> {
                Err(WayfinderError::NotFound(format!("no root for {tx_id}")))
            }
        }

        let gateway = Gateway::parse(&server.uri()).unwrap();
        let provider = Arc::new(StaticGatewaysProvider::new(vec![gateway.clone()]));
        let strategy: Arc<dyn crate::verification::VerificationStrategy> = Arc::new(HashVerificationStrategy);
        let config = WayfinderConfigBuilder::new()
            .routing_strategy(Arc::new(StaticStrategy::new(gateway.clone())))
            .gateways_provider(provider)
            .trusted_gateways(vec![gateway])
            .root_transaction_source(Arc::new(AlwaysFails))
            .verification(crate::config::VerificationSettings {
                strategy: VerificationStrategyKind::Strategy(strategy),
                strict: true,
                ..Default::default()
            })
            .build()
            .unwrap();
        let wf = Wayfinder::new(config);

        let tx_id = TxId::from_bytes([3u8; 32]);
        let input = format!("ar://{}", tx_id.to_b64url());
        let response = wf.request(&input).await.unwrap();

        let chunks: Vec<_> = response.body.collect().await;
        assert!(chunks
            .iter()
            .any(|c| matches!(c, Err(WayfinderError::VerificationFailed { reason }) if *reason == VerificationFailureReason::SourceError)));
    }

    #[tokio::test]
    async fn root_transaction_lookup_failure_degrades_to_skipped_in_non_strict_mode() {
        use crate::root_tx::{RootTransactionInfo, RootTransactionSource};
        use crate::verification::HashVerificationStrategy;

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
            .mount(&server)
            .await;

        struct AlwaysFails;
        #[async_trait]
        impl RootTransactionSource for AlwaysFails {
            async fn get_root_transaction(&self, tx_id: &TxId) -> Result<RootTransactionInfo> {
                Err(WayfinderError::NotFound(format!("no root for {tx_id}")))
            }
        }

        let gateway = Gateway::parse(&server.uri()).unwrap();
        let provider = Arc::new(StaticGatewaysProvider::new(vec![gateway.clone()]));
        let strategy: Arc<dyn crate::verification::VerificationStrategy> = Arc::new(HashVerificationStrategy);
        let config = WayfinderConfigBuilder::new()
            .routing_strategy(Arc::new(StaticStrategy::new(gateway.clone())))
            .gateways_provider(provider)
            .trusted_gateways(vec![gateway])
            .root_transaction_source(Arc::new(AlwaysFails))
            .verification(crate::config::VerificationSettings {
                strategy: VerificationStrategyKind::Strategy(strategy),
                strict: false,
                ..Default::default()
            })
            .build()
            .unwrap();
        let wf = Wayfinder::new(config);

        let mut events = wf.subscribe();
        let tx_id = TxId::from_bytes([4u8; 32]);
        let input = format!("ar://{}", tx_id.to_b64url());
        let response = wf.request(&input).await.unwrap();
        assert_eq!(drain_body(response).await, b"payload");

        let mut saw_skip = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, WayfinderEvent::VerificationSkipped { reason, .. } if reason.starts_with("root transaction lookup failed")) {
                saw_skip = true;
            }
        }
        assert!(saw_skip);
    }
}
