//! Stream tapper (C7): tees a response body into a client branch and a
//! verify branch with backpressure, strict/non-strict end-of-stream timing,
//! and cooperative cancellation.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::error::{VerificationFailureReason, WayfinderError};
use crate::events::{EventBus, WayfinderEvent};

/// Outcome the verification strategy reports back to the tap once it
/// completes, gating strict-mode end-of-stream.
#[derive(Debug, Clone)]
pub enum VerificationOutcome {
    /// Verification succeeded.
    Ok,
    /// Verification failed for the given reason.
    Failed(VerificationFailureReason),
}

/// Sender half the verification strategy uses to report its outcome.
pub type VerificationGate = oneshot::Sender<VerificationOutcome>;

/// Shared cancellation flag: set from the client branch's `Drop` impl (or
/// explicitly), observed by the background tee task and by the verify
/// branch's consumer.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Construct a fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The client-facing half of a tee: yields the same bytes the verify branch
/// sees, in strict mode delaying its terminal item until verification
/// completes.
pub struct ClientBranch {
    receiver: ReceiverStream<Result<Bytes, WayfinderError>>,
    strict: bool,
    outcome_rx: Option<oneshot::Receiver<VerificationOutcome>>,
    upstream_done: bool,
}

impl Stream for ClientBranch {
    type Item = Result<Bytes, WayfinderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if !self.upstream_done {
            match Pin::new(&mut self.receiver).poll_next(cx) {
                Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                Poll::Ready(None) => {
                    self.upstream_done = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        if !self.strict {
            return Poll::Ready(None);
        }

        match self.outcome_rx.as_mut() {
            None => Poll::Ready(None),
            Some(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(VerificationOutcome::Ok)) => {
                    self.outcome_rx = None;
                    Poll::Ready(None)
                }
                Poll::Ready(Ok(VerificationOutcome::Failed(reason))) => {
                    self.outcome_rx = None;
                    Poll::Ready(Some(Err(WayfinderError::VerificationFailed { reason })))
                }
                // The verification strategy was dropped without reporting:
                // treat as a source error rather than hang forever.
                Poll::Ready(Err(_)) => {
                    self.outcome_rx = None;
                    Poll::Ready(Some(Err(WayfinderError::VerificationFailed {
                        reason: VerificationFailureReason::SourceError,
                    })))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

// A tiny local re-export so `poll(cx)` above reads naturally against a
// `oneshot::Receiver`, which implements `Future` directly.
use std::future::Future;

/// Handle returned by [`tap`]: the client branch, the raw verify-branch
/// stream, and the gate the verification strategy must signal in strict
/// mode.
pub struct TapHandle {
    /// Stream to hand back to the caller as the HTTP response body.
    pub client: ClientBranch,
    /// Stream the verification strategy consumes independently.
    pub verify: ReceiverStream<Bytes>,
    /// Sender the verification strategy uses to unblock strict-mode
    /// end-of-stream; unused (and safely dropped) in non-strict mode.
    pub gate: VerificationGate,
    /// Shared cancellation flag. Dropping the client branch does not cancel
    /// verification on its own; call `cancel.cancel()` explicitly to stop
    /// the background tee task early.
    pub cancel: CancelToken,
}

/// Tee `upstream` into a client branch and a verify branch.
///
/// Both branches receive identical bytes in identical order. Each bounded
/// channel has capacity 1, so a chunk is only released to the slower branch
/// once both have space — the "buffer one chunk ahead per branch" rule from
/// spec.md §4.7/§9.
pub fn tap<S>(
    mut upstream: S,
    tx_id: String,
    total_bytes: Option<u64>,
    events: EventBus,
    request_id: Uuid,
    strict: bool,
) -> TapHandle
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + Unpin + 'static,
{
    use futures::StreamExt;

    let (client_tx, client_rx) = mpsc::channel::<Result<Bytes, WayfinderError>>(1);
    let (verify_tx, verify_rx) = mpsc::channel::<Bytes>(1);
    let (gate_tx, gate_rx) = oneshot::channel::<VerificationOutcome>();

    let cancel = CancelToken::new();
    let task_cancel = cancel.clone();

    tokio::spawn(async move {
        let mut processed: u64 = 0;

        loop {
            if task_cancel.is_cancelled() {
                tracing::debug!(%tx_id, "tap cancelled, stopping upstream read");
                events.emit(WayfinderEvent::VerificationFailed {
                    request_id,
                    tx_id: tx_id.clone(),
                    reason: VerificationFailureReason::Cancelled,
                });
                break;
            }

            match upstream.next().await {
                Some(Ok(chunk)) => {
                    processed += chunk.len() as u64;

                    if verify_tx.send(chunk.clone()).await.is_err() {
                        break;
                    }
                    if client_tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }

                    events.emit(WayfinderEvent::VerificationProgress {
                        request_id,
                        tx_id: tx_id.clone(),
                        total_bytes,
                        processed_bytes: processed,
                    });
                }
                Some(Err(e)) => {
                    let _ = client_tx.send(Err(WayfinderError::Transport(e))).await;
                    break;
                }
                None => break,
            }
        }
        // Dropping client_tx/verify_tx here closes both branches.
    });

    TapHandle {
        client: ClientBranch {
            receiver: ReceiverStream::new(client_rx),
            strict,
            outcome_rx: Some(gate_rx),
            upstream_done: false,
        },
        verify: ReceiverStream::new(verify_rx),
        gate: gate_tx,
        cancel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use futures::StreamExt;

    fn make_upstream(chunks: Vec<&'static str>) -> impl Stream<Item = reqwest::Result<Bytes>> + Send + Unpin + 'static {
        stream::iter(chunks.into_iter().map(|s| Ok(Bytes::from(s))))
    }

    #[tokio::test]
    async fn both_branches_receive_identical_bytes_in_order() {
        let handle = tap(
            make_upstream(vec!["he", "llo"]),
            "tx".into(),
            Some(5),
            EventBus::new(16),
            Uuid::new_v4(),
            false,
        );

        let verify_bytes: Vec<Bytes> = handle.verify.collect().await;
        let client_bytes: Vec<Result<Bytes, WayfinderError>> = handle.client.collect().await;

        let client_joined: Vec<u8> = client_bytes.into_iter().flatten().flat_map(|b| b.to_vec()).collect();
        let verify_joined: Vec<u8> = verify_bytes.into_iter().flat_map(|b| b.to_vec()).collect();

        assert_eq!(client_joined, b"hello");
        assert_eq!(verify_joined, b"hello");
    }

    #[tokio::test]
    async fn non_strict_mode_ends_client_branch_without_waiting_on_gate() {
        let handle = tap(
            make_upstream(vec!["data"]),
            "tx".into(),
            Some(4),
            EventBus::new(16),
            Uuid::new_v4(),
            false,
        );
        // Drain the verify branch concurrently so the bounded(1) channel
        // doesn't stall the client branch's drain below.
        let verify_drain = tokio::spawn(handle.verify.collect::<Vec<_>>());
        let client_bytes: Vec<_> = handle.client.collect().await;
        assert_eq!(client_bytes.len(), 1);
        verify_drain.await.unwrap();
    }

    #[tokio::test]
    async fn strict_mode_blocks_end_of_stream_until_gate_reports_ok() {
        let handle = tap(
            make_upstream(vec!["data"]),
            "tx".into(),
            Some(4),
            EventBus::new(16),
            Uuid::new_v4(),
            true,
        );
        let gate = handle.gate;
        let verify_drain = tokio::spawn(handle.verify.collect::<Vec<_>>());

        let mut client = handle.client;
        // First poll yields the data chunk.
        let first = client.next().await;
        assert!(matches!(first, Some(Ok(_))));

        // Signal success; the stream should now terminate cleanly.
        gate.send(VerificationOutcome::Ok).unwrap();
        let second = client.next().await;
        assert!(second.is_none());
        verify_drain.await.unwrap();
    }

    #[tokio::test]
    async fn strict_mode_errors_the_client_branch_on_verification_failure() {
        let handle = tap(
            make_upstream(vec!["data"]),
            "tx".into(),
            Some(4),
            EventBus::new(16),
            Uuid::new_v4(),
            true,
        );
        let gate = handle.gate;
        let verify_drain = tokio::spawn(handle.verify.collect::<Vec<_>>());

        let mut client = handle.client;
        let _ = client.next().await;
        gate.send(VerificationOutcome::Failed(VerificationFailureReason::DigestMismatch)).unwrap();

        let second = client.next().await;
        assert!(matches!(
            second,
            Some(Err(WayfinderError::VerificationFailed {
                reason: VerificationFailureReason::DigestMismatch
            }))
        ));
        verify_drain.await.unwrap();
    }

    #[tokio::test]
    async fn dropping_client_branch_does_not_cancel_verification() {
        let handle = tap(
            make_upstream(vec!["a", "b", "c"]),
            "tx".into(),
            None,
            EventBus::new(16),
            Uuid::new_v4(),
            false,
        );
        let cancel = handle.cancel.clone();
        drop(handle.client);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn cancel_token_requires_an_explicit_call() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }
}
