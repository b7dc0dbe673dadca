//! CDB64 reader (C5): random-access key/value lookup over a [`ByteRangeSource`].

use std::sync::Arc;

use crate::cdb64::hash::{djb64, initial_slot, table_index};
use crate::cdb64::source::ByteRangeSource;
use crate::error::Result;

/// Size in bytes of the fixed 256-entry `(position, length)` pointer header.
pub const HEADER_SIZE: u64 = 4096;
const POINTER_SIZE: u64 = 16;
const SLOT_SIZE: u64 = 16;
const RECORD_HEADER_SIZE: u64 = 16;

#[derive(Debug, Clone, Copy)]
struct TablePointer {
    position: u64,
    length: u64,
}

fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(arr)
}

/// A bit-exact CDB64 reader: 256 consecutive `(position, length)` pointers,
/// a records region, and 256 open-addressed hash tables, per spec.md §3/§4.5.
pub struct CdbReader {
    source: Arc<dyn ByteRangeSource>,
    pointers: [TablePointer; 256],
}

impl CdbReader {
    /// Open a CDB64 file over any [`ByteRangeSource`], parsing its header.
    pub async fn open(source: Arc<dyn ByteRangeSource>) -> Result<Self> {
        let header = source.read(0, HEADER_SIZE).await?;
        let mut pointers = [TablePointer { position: 0, length: 0 }; 256];
        for (i, pointer) in pointers.iter_mut().enumerate() {
            let offset = i * POINTER_SIZE as usize;
            pointer.position = read_u64_le(&header[offset..offset + 8]);
            pointer.length = read_u64_le(&header[offset + 8..offset + 16]);
        }
        Ok(Self { source, pointers })
    }

    /// Open a CDB64 file stored on the local filesystem.
    pub async fn open_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let source = Arc::new(crate::cdb64::source::FileSource::open(path).await?);
        Self::open(source).await
    }

    /// Look up `key`, returning its value bytes if present.
    ///
    /// Lookups are O(1) expected: a record is located if and only if its
    /// hash's table-slot sequence reaches it before a zero slot.
    #[tracing::instrument(skip(self, key))]
    pub async fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let hash = djb64(key);
        let table = self.pointers[table_index(hash)];
        if table.length == 0 {
            return Ok(None);
        }

        let mut slot = initial_slot(hash, table.length as usize);
        for _ in 0..table.length {
            let slot_bytes = self.source.read(table.position + slot as u64 * SLOT_SIZE, SLOT_SIZE).await?;
            let slot_hash = read_u64_le(&slot_bytes[..8]);
            let record_pos = read_u64_le(&slot_bytes[8..16]);

            if record_pos == 0 {
                return Ok(None);
            }

            if slot_hash == hash {
                let record_header = self.source.read(record_pos, RECORD_HEADER_SIZE).await?;
                let key_len = read_u64_le(&record_header[..8]);
                let value_len = read_u64_le(&record_header[8..16]);

                let candidate_key = self.source.read(record_pos + RECORD_HEADER_SIZE, key_len).await?;
                if candidate_key == key {
                    let value = self
                        .source
                        .read(record_pos + RECORD_HEADER_SIZE + key_len, value_len)
                        .await?;
                    return Ok(Some(value));
                }
            }

            slot = (slot + 1) % table.length as usize;
        }

        Ok(None)
    }

    /// Release the underlying source.
    pub async fn close(&self) {
        self.source.close().await;
    }
}
