//! 256-way partitioned CDB64 reader: one file per first-byte prefix, opened
//! lazily over HTTP with singleflight deduplication.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::cdb64::reader::CdbReader;
use crate::error::Result;

/// MessagePack-encoded value stored under each CDB64 key, per spec.md §3:
/// `{r: 32 bytes, i?: u64, d?: u64}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CdbValue {
    /// Root transaction id, 32 raw bytes.
    #[serde(rename = "r", with = "serde_bytes")]
    pub r: Vec<u8>,
    /// Root data-item offset, if the looked-up key is itself a data item.
    #[serde(rename = "i", skip_serializing_if = "Option::is_none")]
    pub i: Option<u64>,
    /// Root data offset within the root transaction's chunk tree.
    #[serde(rename = "d", skip_serializing_if = "Option::is_none")]
    pub d: Option<u64>,
}

impl CdbValue {
    /// Construct from a 32-byte root transaction id.
    pub fn new(root_tx_id: [u8; 32], root_data_item_offset: Option<u64>, root_data_offset: Option<u64>) -> Self {
        Self { r: root_tx_id.to_vec(), i: root_data_item_offset, d: root_data_offset }
    }

    /// The root transaction id as a fixed 32-byte array, if the stored
    /// value has exactly 32 bytes (always true for well-formed records).
    pub fn root_tx_id_bytes(&self) -> Option<[u8; 32]> {
        self.r.clone().try_into().ok()
    }
}

/// One partition's metadata as carried in a [`CdbManifest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionEntry {
    /// Two-hex-digit prefix this partition covers.
    pub prefix: String,
    /// Where to fetch this partition's CDB64 file.
    pub location: PartitionLocation,
    /// Number of records in this partition.
    #[serde(rename = "recordCount")]
    pub record_count: u64,
    /// Size of the partition file in bytes.
    pub size: u64,
}

/// Where a partition's bytes live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PartitionLocation {
    /// Fetched over HTTP Range requests.
    Http {
        /// URL of the partition's CDB64 file.
        url: String,
    },
}

/// Manifest describing a full set of 256 partitions, per spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdbManifest {
    /// Manifest schema version.
    pub version: u32,
    #[serde(rename = "createdAt")]
    /// Creation timestamp (RFC 3339 or epoch seconds, caller-defined).
    pub created_at: String,
    #[serde(rename = "totalRecords")]
    /// Total record count across all partitions.
    pub total_records: u64,
    /// The partitions themselves.
    pub partitions: Vec<PartitionEntry>,
}

enum PartitionState {
    Open(Arc<CdbReader>),
    Absent,
}

/// A 256-way partitioned CDB64 reader. Each partition opens its own file
/// lazily over HTTP on first access to that prefix; concurrent first-access
/// for the same prefix is deduplicated by `OnceCell::get_or_init` itself, so
/// a given partition is opened exactly once no matter how many callers race
/// it. Once initialized, a lookup is lock-free: `get_or_init` returns the
/// cached value without awaiting anything. Open failures mark the partition
/// permanently absent for the lifetime of the reader and are logged, never
/// propagated.
pub struct PartitionedCdbReader {
    manifest: CdbManifest,
    client: reqwest::Client,
    cells: Vec<OnceCell<PartitionState>>,
    by_prefix: HashMap<String, usize>,
}

impl PartitionedCdbReader {
    /// Construct a reader over `manifest`, fetching partitions via `client`.
    pub fn new(manifest: CdbManifest, client: reqwest::Client) -> Self {
        let mut cells = Vec::with_capacity(manifest.partitions.len());
        let mut by_prefix = HashMap::new();
        for (i, partition) in manifest.partitions.iter().enumerate() {
            cells.push(OnceCell::new());
            by_prefix.insert(partition.prefix.to_lowercase(), i);
        }
        Self { manifest, client, cells, by_prefix }
    }

    fn prefix_for(key: &[u8]) -> String {
        format!("{:02x}", key.first().copied().unwrap_or(0))
    }

    async fn partition_reader(&self, index: usize) -> Option<Arc<CdbReader>> {
        let state = self
            .cells[index]
            .get_or_init(|| async {
                let entry = &self.manifest.partitions[index];
                let PartitionLocation::Http { url } = &entry.location;
                let source = crate::cdb64::source::HttpSource::new(self.client.clone(), url.clone());
                match CdbReader::open(Arc::new(source)).await {
                    Ok(reader) => PartitionState::Open(Arc::new(reader)),
                    Err(e) => {
                        tracing::warn!(prefix = %entry.prefix, error = %e, "failed to open cdb64 partition");
                        PartitionState::Absent
                    }
                }
            })
            .await;

        match state {
            PartitionState::Open(reader) => Some(reader.clone()),
            PartitionState::Absent => None,
        }
    }

    /// Look up `key` across the partition selected by its first byte.
    #[tracing::instrument(skip(self, key))]
    pub async fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let prefix = Self::prefix_for(key);
        let Some(&index) = self.by_prefix.get(&prefix) else {
            return Ok(None);
        };
        match self.partition_reader(index).await {
            Some(reader) => reader.lookup(key).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cdb_value_round_trips_through_msgpack() {
        let value = CdbValue::new([9u8; 32], Some(7), None);
        let bytes = rmp_serde::to_vec_named(&value).unwrap();
        let decoded: CdbValue = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(decoded.root_tx_id_bytes(), Some([9u8; 32]));
    }

    #[test]
    fn prefix_for_uses_first_byte_as_two_hex_digits() {
        assert_eq!(PartitionedCdbReader::prefix_for(&[0xab, 0x01]), "ab");
        assert_eq!(PartitionedCdbReader::prefix_for(&[0x00]), "00");
        assert_eq!(PartitionedCdbReader::prefix_for(&[]), "00");
    }

    #[tokio::test]
    async fn lookup_returns_none_for_prefix_not_in_manifest() {
        let manifest = CdbManifest {
            version: 1,
            created_at: "2026-01-01T00:00:00Z".into(),
            total_records: 0,
            partitions: vec![],
        };
        let reader = PartitionedCdbReader::new(manifest, reqwest::Client::new());
        assert_eq!(reader.lookup(&[0xff]).await.unwrap(), None);
    }
}
