//! RootTransactionSource (C4): maps a data-item id to its enclosing root
//! transaction, so verification can target the correct on-chain object.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cdb64::{CdbValue, PartitionedCdbReader};
use crate::error::{Result, WayfinderError};
use crate::gateway::Gateway;
use crate::identifier::TxId;

/// Root-transaction lookup result, per spec.md §3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootTransactionInfo {
    /// The enclosing root transaction's id.
    pub root_transaction_id: TxId,
    /// Byte offset of this data item within the root transaction's bundle,
    /// if known.
    pub root_data_item_offset: Option<u64>,
    /// Byte offset of this data item's data within the root transaction's
    /// chunk tree, if known.
    pub root_data_offset: Option<u64>,
    /// Whether the looked-up id is itself a nested data item (as opposed to
    /// being its own root transaction).
    pub is_data_item: bool,
}

impl RootTransactionInfo {
    /// Build from a decoded [`CdbValue`] and the original lookup key.
    pub fn from_cdb_value(value: &CdbValue, queried: &[u8; 32]) -> Self {
        let root_bytes = value.root_tx_id_bytes().unwrap_or(*queried);
        Self {
            root_transaction_id: TxId::from_bytes(root_bytes),
            root_data_item_offset: value.i,
            root_data_offset: value.d,
            is_data_item: root_bytes != *queried,
        }
    }
}

/// Contract for mapping a data-item id to its root transaction.
#[async_trait]
pub trait RootTransactionSource: Send + Sync {
    /// Resolve `tx_id`'s enclosing root transaction.
    async fn get_root_transaction(&self, tx_id: &TxId) -> Result<RootTransactionInfo>;
}

const HEADER_ROOT_TX_ID: &str = "x-ar-io-root-transaction-id";
const HEADER_ROOT_DATA_ITEM_OFFSET: &str = "x-ar-io-root-data-item-offset";
const HEADER_ROOT_DATA_OFFSET: &str = "x-ar-io-root-data-offset";

/// Consults trusted gateways in order via `HEAD /<txId>` with redirect-follow.
pub struct TrustedGatewayLookup {
    trusted_gateways: Vec<Gateway>,
    client: reqwest::Client,
}

impl TrustedGatewayLookup {
    /// Construct a lookup over `trusted_gateways`, tried in order.
    pub fn new(trusted_gateways: Vec<Gateway>, client: reqwest::Client) -> Self {
        Self { trusted_gateways, client }
    }

    fn parse_response(resp: &reqwest::Response, tx_id: &TxId) -> Option<RootTransactionInfo> {
        let headers = resp.headers();
        let root_tx_header = headers.get(HEADER_ROOT_TX_ID)?.to_str().ok()?;
        let root_tx = TxId::parse(root_tx_header).ok()?;

        let root_data_item_offset = headers
            .get(HEADER_ROOT_DATA_ITEM_OFFSET)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        let root_data_offset = headers
            .get(HEADER_ROOT_DATA_OFFSET)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let is_data_item = root_tx.as_bytes() != tx_id.as_bytes();
        Some(RootTransactionInfo {
            root_transaction_id: if is_data_item { root_tx } else { *tx_id },
            root_data_item_offset,
            root_data_offset,
            is_data_item,
        })
    }
}

#[async_trait]
impl RootTransactionSource for TrustedGatewayLookup {
    #[tracing::instrument(skip(self))]
    async fn get_root_transaction(&self, tx_id: &TxId) -> Result<RootTransactionInfo> {
        for gateway in &self.trusted_gateways {
            let url = format!("{}/{}", gateway.origin(), tx_id);
            let response = match self.client.head(&url).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::debug!(gateway = %gateway, error = %e, "trusted gateway head failed");
                    continue;
                }
            };

            if !response.status().is_success() {
                continue;
            }

            match Self::parse_response(&response, tx_id) {
                Some(info) => return Ok(info),
                None => {
                    // Header absent or missing: treat this id as its own root.
                    return Ok(RootTransactionInfo {
                        root_transaction_id: *tx_id,
                        root_data_item_offset: None,
                        root_data_offset: None,
                        is_data_item: false,
                    });
                }
            }
        }

        Err(WayfinderError::NotFound(format!("no trusted gateway answered for {tx_id}")))
    }
}

/// Looks up the root transaction via a partitioned CDB64 index.
pub struct CdbRootTransactionSource {
    reader: Arc<PartitionedCdbReader>,
}

impl CdbRootTransactionSource {
    /// Construct a source over an already-opened partitioned reader.
    pub fn new(reader: Arc<PartitionedCdbReader>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl RootTransactionSource for CdbRootTransactionSource {
    #[tracing::instrument(skip(self))]
    async fn get_root_transaction(&self, tx_id: &TxId) -> Result<RootTransactionInfo> {
        let value = self
            .reader
            .lookup(tx_id.as_bytes())
            .await?
            .ok_or_else(|| WayfinderError::NotFound(format!("{tx_id} not present in cdb64 index")))?;

        let decoded: CdbValue = rmp_serde::from_slice(&value)
            .map_err(|e| WayfinderError::NotFound(format!("malformed cdb64 value for {tx_id}: {e}")))?;

        Ok(RootTransactionInfo::from_cdb_value(&decoded, tx_id.as_bytes()))
    }
}

/// Tries sources in order, returning the first success; all failing yields
/// `AllSourcesFailed` surfaced as [`WayfinderError::NotFound`].
pub struct SequentialRootTransactionSource {
    sources: Vec<Arc<dyn RootTransactionSource>>,
}

impl SequentialRootTransactionSource {
    /// Construct a composite source trying each of `sources` in order.
    pub fn new(sources: Vec<Arc<dyn RootTransactionSource>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl RootTransactionSource for SequentialRootTransactionSource {
    async fn get_root_transaction(&self, tx_id: &TxId) -> Result<RootTransactionInfo> {
        let mut last_err = None;
        for source in &self.sources {
            match source.get_root_transaction(tx_id).await {
                Ok(info) => return Ok(info),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| WayfinderError::NotFound(format!("all sources failed for {tx_id}"))))
    }
}
