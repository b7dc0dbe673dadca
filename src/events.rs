//! Per-instance event bus (C8 support): emits routing/verification lifecycle
//! events, with per-request emitters forwarding to the instance emitter.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::VerificationFailureReason;

/// A single lifecycle event emitted during `Wayfinder::request`.
///
/// Channel names mirror spec.md §4.8: `routing-started`, `routing-skipped`,
/// `routing-succeeded`, `verification-skipped`, `verification-progress`,
/// `verification-succeeded`, `verification-failed`.
#[derive(Debug, Clone)]
pub enum WayfinderEvent {
    /// The input was recognized as an `ar://` URL and routing has begun.
    RoutingStarted {
        /// Correlates every event within one `request` call.
        request_id: uuid::Uuid,
    },
    /// The input did not start with `ar://`; routing was bypassed entirely.
    RoutingSkipped {
        /// Correlates every event within one `request` call.
        request_id: uuid::Uuid,
    },
    /// A gateway was selected and the redirect URL is ready.
    RoutingSucceeded {
        /// Correlates every event within one `request` call.
        request_id: uuid::Uuid,
        /// The resolved gateway origin.
        gateway: String,
    },
    /// Verification was not attempted (gateway-direct redirect, no resolvable
    /// tx id, or a degraded `RootTransactionSource`).
    VerificationSkipped {
        /// Correlates every event within one `request` call.
        request_id: uuid::Uuid,
        /// Why verification was skipped.
        reason: String,
    },
    /// Bytes have flowed past a chunk boundary in the stream tapper.
    VerificationProgress {
        /// Correlates every event within one `request` call.
        request_id: uuid::Uuid,
        /// Transaction id being verified.
        tx_id: String,
        /// Declared total length, if known.
        total_bytes: Option<u64>,
        /// Bytes processed so far.
        processed_bytes: u64,
    },
    /// The verify branch's digest matched the trusted expectation.
    VerificationSucceeded {
        /// Correlates every event within one `request` call.
        request_id: uuid::Uuid,
        /// Transaction id that was verified.
        tx_id: String,
    },
    /// The verify branch could not confirm the stream's integrity.
    VerificationFailed {
        /// Correlates every event within one `request` call.
        request_id: uuid::Uuid,
        /// Transaction id that failed verification.
        tx_id: String,
        /// Why verification failed.
        reason: VerificationFailureReason,
    },
}

/// A multi-producer, multi-subscriber event bus. Cloning an [`EventBus`]
/// shares the same underlying channel (all clones are producers on one
/// stream), matching the teacher's `frys-eventbus` pub/sub model of a
/// shared broker rather than per-subscriber private queues.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<WayfinderEvent>>,
}

impl EventBus {
    /// Construct a bus with the given subscriber channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender: Arc::new(sender) }
    }

    /// Subscribe to future events. Events emitted before this call are not
    /// replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<WayfinderEvent> {
        self.sender.subscribe()
    }

    /// Emit an event to all current subscribers. Silently drops the event if
    /// there are none, matching a typical pub/sub bus's "fire and forget"
    /// semantics when no one is listening.
    pub fn emit(&self, event: WayfinderEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
