//! Arweave chunk-tree Merkle root computation, for data-root verification.
//!
//! Chunks are 256 KiB; the last chunk is handled per the Arweave rebalancing
//! rule so a data root matches what gateways compute over the transaction's
//! chunk tree. A branch hash is `SHA256(left_hash || right_hash || note)`
//! where `note` is the big-endian byte length of the left subtree's covered
//! data, encoded as a fixed-width 32-byte big-endian integer (the "offset
//! note" in Arweave's chunking scheme).

use sha2::{Digest, Sha256};

/// Maximum chunk size: 256 KiB.
pub const MAX_CHUNK_SIZE: usize = 256 * 1024;
/// Minimum chunk size for all but the final chunk, to avoid degenerate tiny
/// trailing chunks (Arweave's rebalancing threshold).
const MIN_CHUNK_SIZE: usize = 32 * 1024;

fn note_bytes(offset: u64) -> [u8; 32] {
    let mut note = [0u8; 32];
    note[24..].copy_from_slice(&offset.to_be_bytes());
    note
}

fn hash_leaf(chunk: &[u8], end_offset: u64) -> [u8; 32] {
    let data_hash = Sha256::digest(chunk);
    let mut hasher = Sha256::new();
    hasher.update(Sha256::digest(data_hash));
    hasher.update(Sha256::digest(note_bytes(end_offset)));
    hasher.finalize().into()
}

fn hash_branch(left: [u8; 32], right: [u8; 32], offset: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(Sha256::digest(left));
    hasher.update(Sha256::digest(right));
    hasher.update(Sha256::digest(note_bytes(offset)));
    hasher.finalize().into()
}

/// Split `data` into Arweave chunk boundaries, applying the rebalancing rule
/// for an undersized final chunk: if the last chunk would be smaller than
/// `MIN_CHUNK_SIZE` and there's a previous chunk, the split point is moved so
/// both of the last two chunks are roughly equal and at least the minimum.
pub fn chunk_boundaries(total_len: usize) -> Vec<(usize, usize)> {
    if total_len == 0 {
        return vec![(0, 0)];
    }

    let mut boundaries = Vec::new();
    let mut start = 0;
    let mut remaining = total_len;

    while remaining > 0 {
        if remaining <= MAX_CHUNK_SIZE {
            boundaries.push((start, start + remaining));
            break;
        }

        if remaining < MAX_CHUNK_SIZE + MIN_CHUNK_SIZE {
            let half = remaining.div_ceil(2);
            boundaries.push((start, start + half));
            start += half;
            remaining -= half;
        } else {
            boundaries.push((start, start + MAX_CHUNK_SIZE));
            start += MAX_CHUNK_SIZE;
            remaining -= MAX_CHUNK_SIZE;
        }
    }

    boundaries
}

/// Incrementally builds a Merkle data root over chunks supplied in order.
///
/// Chunk hashes are accumulated as a flat list and folded pairwise once the
/// stream ends (`finalize`), rather than rebalanced as a tree during
/// streaming — this matches how a verifier only learns `total_len` once the
/// response's declared content length is known, at stream start.
#[derive(Debug, Default)]
pub struct MerkleBuilder {
    leaf_hashes: Vec<[u8; 32]>,
    leaf_end_offsets: Vec<u64>,
}

impl MerkleBuilder {
    /// Construct an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one already-chunk-aligned piece of data ending at `end_offset`
    /// (absolute offset into the full transaction data).
    pub fn push_chunk(&mut self, chunk: &[u8], end_offset: u64) {
        self.leaf_hashes.push(hash_leaf(chunk, end_offset));
        self.leaf_end_offsets.push(end_offset);
    }

    /// Fold the accumulated leaves into the final data root.
    pub fn finalize(self) -> [u8; 32] {
        if self.leaf_hashes.is_empty() {
            return Sha256::digest(Sha256::digest([])).into();
        }
        if self.leaf_hashes.len() == 1 {
            return self.leaf_hashes[0];
        }

        let mut level = self.leaf_hashes;
        let mut offsets = self.leaf_end_offsets;

        while level.len() > 1 {
            let mut next_level = Vec::with_capacity(level.len().div_ceil(2));
            let mut next_offsets = Vec::with_capacity(next_level.capacity());

            let mut i = 0;
            while i < level.len() {
                if i + 1 < level.len() {
                    let offset = offsets[i];
                    next_level.push(hash_branch(level[i], level[i + 1], offset));
                    next_offsets.push(offsets[i + 1]);
                } else {
                    next_level.push(level[i]);
                    next_offsets.push(offsets[i]);
                }
                i += 2;
            }

            level = next_level;
            offsets = next_offsets;
        }

        level[0]
    }
}

/// Compute the data root for a complete in-memory buffer (used by tests and
/// any caller that already has the full body available).
pub fn data_root_of(data: &[u8]) -> [u8; 32] {
    let mut builder = MerkleBuilder::new();
    let mut offset = 0u64;
    for (start, end) in chunk_boundaries(data.len()) {
        builder.push_chunk(&data[start..end], end as u64);
        offset = end as u64;
    }
    let _ = offset;
    builder.finalize()
}
