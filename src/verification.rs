//! VerificationStrategy (C6): confirms that bytes served by the selected
//! gateway match what trusted gateways agree the transaction's content
//! should be, without trusting the serving gateway itself.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use data_encoding::BASE64URL_NOPAD;
use futures::stream::StreamExt;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio_stream::wrappers::ReceiverStream;

use crate::error::VerificationFailureReason;
use crate::gateway::Gateway;
use crate::identifier::TxId;
use crate::merkle;
use crate::tap::VerificationOutcome;

const HEADER_DIGEST: &str = "x-ar-io-digest";
const HEADER_DATA_ROOT: &str = "x-ar-io-data-root";

/// Everything a [`VerificationStrategy`] needs beyond the tapped byte stream.
pub struct VerificationContext {
    /// The transaction (or root transaction, once resolved) being verified.
    pub tx_id: TxId,
    /// Declared total length, when known from the response's content length.
    pub total_bytes: Option<u64>,
    /// Gateways trusted to report ground truth for this verification.
    pub trusted_gateways: Vec<Gateway>,
    /// HTTP client used for trusted-gateway lookups.
    pub client: reqwest::Client,
    /// Upper bound on concurrent trusted-gateway fetches.
    pub max_concurrency: usize,
    /// Per-trusted-gateway fetch timeout.
    pub timeout: Duration,
    /// Minimum number of trusted gateways that must agree on a value before
    /// it is accepted (spec default: 1).
    pub quorum: usize,
    /// Byte offset of the verified item within `tx_id`'s bundle, when
    /// `tx_id` was resolved from a nested data item by a `RootTransactionSource`.
    pub root_data_item_offset: Option<u64>,
    /// Byte offset of the verified item's data within `tx_id`'s chunk tree,
    /// when resolved from a nested data item.
    pub root_data_offset: Option<u64>,
}

/// A pluggable way of confirming tapped bytes against a trusted source.
#[async_trait]
pub trait VerificationStrategy: Send + Sync {
    /// Consume `stream` to completion and report whether it matches what the
    /// trusted gateways in `ctx` agree on.
    async fn verify(&self, ctx: &VerificationContext, stream: ReceiverStream<Bytes>) -> VerificationOutcome;
}

/// Counts occurrences of each distinct value and accepts the one reaching
/// `quorum` agreeing gateways. No responses is a timeout; responses that
/// never converge on a single `quorum`-strength value is a trust conflict.
fn agreement_with_quorum(values: Vec<String>, quorum: usize) -> Result<String, VerificationFailureReason> {
    if values.is_empty() {
        return Err(VerificationFailureReason::Timeout);
    }

    let quorum = quorum.max(1);
    let mut counts: Vec<(String, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some(entry) => entry.1 += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut agreeing = counts.into_iter().filter(|(_, count)| *count >= quorum);
    match (agreeing.next(), agreeing.next()) {
        (Some((value, _)), None) => Ok(value),
        _ => Err(VerificationFailureReason::TrustConflict),
    }
}

/// HEADs every trusted gateway for `tx_id` concurrently (bounded by
/// `max_concurrency`, each fetch bounded by `timeout`), collecting `header`'s
/// value, and accepts whichever value at least `quorum` gateways agree on.
async fn quorum_header(
    client: &reqwest::Client,
    gateways: &[Gateway],
    tx_id: &TxId,
    header: &str,
    max_concurrency: usize,
    timeout: Duration,
    quorum: usize,
) -> Result<String, VerificationFailureReason> {
    let tx_id = *tx_id;
    let values: Vec<String> = futures::stream::iter(gateways.iter().cloned())
        .map(|gateway| {
            let client = client.clone();
            let header = header.to_string();
            async move {
                let url = format!("{}/{}", gateway.origin(), tx_id);
                match tokio::time::timeout(timeout, client.head(&url).send()).await {
                    Ok(Ok(resp)) if resp.status().is_success() => {
                        resp.headers().get(header.as_str()).and_then(|v| v.to_str().ok()).map(str::to_string)
                    }
                    Ok(Ok(_)) => None,
                    Ok(Err(e)) => {
                        tracing::debug!(%gateway, error = %e, "trusted gateway head failed during verification");
                        None
                    }
                    Err(_) => {
                        tracing::debug!(%gateway, "trusted gateway head timed out during verification");
                        None
                    }
                }
            }
        })
        .buffer_unordered(max_concurrency.max(1))
        .filter_map(|value| async move { value })
        .collect()
        .await;

    agreement_with_quorum(values, quorum)
}

async fn drain_to_digest(mut stream: ReceiverStream<Bytes>) -> [u8; 32] {
    use futures::StreamExt;
    let mut hasher = Sha256::new();
    while let Some(chunk) = stream.next().await {
        hasher.update(&chunk);
    }
    hasher.finalize().into()
}

async fn drain_to_data_root(mut stream: ReceiverStream<Bytes>) -> [u8; 32] {
    use futures::StreamExt;
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk);
    }
    merkle::data_root_of(&buffer)
}

/// Verifies by comparing a SHA-256 digest of the streamed bytes against the
/// `x-ar-io-digest` header trusted gateways agree on.
#[derive(Default)]
pub struct HashVerificationStrategy;

#[async_trait]
impl VerificationStrategy for HashVerificationStrategy {
    #[tracing::instrument(skip(self, ctx, stream))]
    async fn verify(&self, ctx: &VerificationContext, stream: ReceiverStream<Bytes>) -> VerificationOutcome {
        let observed = BASE64URL_NOPAD.encode(&drain_to_digest(stream).await);

        let result = quorum_header(
            &ctx.client,
            &ctx.trusted_gateways,
            &ctx.tx_id,
            HEADER_DIGEST,
            ctx.max_concurrency,
            ctx.timeout,
            ctx.quorum,
        )
        .await;
        match result {
            Ok(expected) if expected == observed => VerificationOutcome::Ok,
            Ok(_) => VerificationOutcome::Failed(VerificationFailureReason::DigestMismatch),
            Err(reason) => VerificationOutcome::Failed(reason),
        }
    }
}

/// Verifies by rebuilding the Arweave chunk-tree data root over the streamed
/// bytes and comparing it against the `x-ar-io-data-root` header trusted
/// gateways agree on.
#[derive(Default)]
pub struct DataRootVerificationStrategy;

#[async_trait]
impl VerificationStrategy for DataRootVerificationStrategy {
    #[tracing::instrument(skip(self, ctx, stream))]
    async fn verify(&self, ctx: &VerificationContext, stream: ReceiverStream<Bytes>) -> VerificationOutcome {
        let observed = BASE64URL_NOPAD.encode(drain_to_data_root(stream).await);

        let result = quorum_header(
            &ctx.client,
            &ctx.trusted_gateways,
            &ctx.tx_id,
            HEADER_DATA_ROOT,
            ctx.max_concurrency,
            ctx.timeout,
            ctx.quorum,
        )
        .await;
        match result {
            Ok(expected) if expected == observed => VerificationOutcome::Ok,
            Ok(_) => VerificationOutcome::Failed(VerificationFailureReason::DigestMismatch),
            Err(reason) => VerificationOutcome::Failed(reason),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SignedTxHeader {
    data_root: String,
}

/// Verifies by fetching the transaction's signed header from a trusted
/// gateway and comparing its `data_root` field against the data root
/// rebuilt from the streamed bytes. Does not re-verify the Arweave wallet
/// signature itself; it relies on quorum trusted-gateway agreement on
/// the header, same as the other strategies.
#[derive(Default)]
pub struct SignatureVerificationStrategy;

#[async_trait]
impl VerificationStrategy for SignatureVerificationStrategy {
    #[tracing::instrument(skip(self, ctx, stream))]
    async fn verify(&self, ctx: &VerificationContext, stream: ReceiverStream<Bytes>) -> VerificationOutcome {
        let observed = BASE64URL_NOPAD.encode(drain_to_data_root(stream).await);

        let tx_id = ctx.tx_id;
        let timeout = ctx.timeout;
        let headers: Vec<String> = futures::stream::iter(ctx.trusted_gateways.iter().cloned())
            .map(|gateway| {
                let client = ctx.client.clone();
                async move {
                    let url = format!("{}/tx/{}", gateway.origin(), tx_id);
                    match tokio::time::timeout(timeout, client.get(&url).send()).await {
                        Ok(Ok(resp)) if resp.status().is_success() => match resp.json::<SignedTxHeader>().await {
                            Ok(header) => Some(header.data_root),
                            Err(e) => {
                                tracing::debug!(%gateway, error = %e, "malformed signed tx header");
                                None
                            }
                        },
                        Ok(Ok(_)) => None,
                        Ok(Err(e)) => {
                            tracing::debug!(%gateway, error = %e, "trusted gateway tx header fetch failed");
                            None
                        }
                        Err(_) => {
                            tracing::debug!(%gateway, "trusted gateway tx header fetch timed out");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(ctx.max_concurrency.max(1))
            .filter_map(|value| async move { value })
            .collect()
            .await;

        match agreement_with_quorum(headers, ctx.quorum) {
            Ok(expected) if expected == observed => VerificationOutcome::Ok,
            Ok(_) => VerificationOutcome::Failed(VerificationFailureReason::DigestMismatch),
            Err(reason) => VerificationOutcome::Failed(reason),
        }
    }
}
