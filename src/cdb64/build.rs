//! Builds bit-exact CDB64 files from key/value pairs, for tests and the
//! `wayfinder-cdb64` operator CLI.

use crate::cdb64::hash::djb64;
use crate::cdb64::reader::HEADER_SIZE;

/// Build a complete CDB64 file in memory from an iterator of key/value pairs.
///
/// Layout matches spec.md §3 exactly: a 4096-byte header of 256
/// `(position, length)` pointers, the records region, then 256 hash tables
/// of `2*N_i` slots each.
pub fn build_cdb64(pairs: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>) -> Vec<u8> {
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = pairs.into_iter().collect();

    let mut buf = vec![0u8; HEADER_SIZE as usize];
    let mut record_positions = Vec::with_capacity(pairs.len());

    for (key, value) in &pairs {
        let position = buf.len() as u64;
        buf.extend_from_slice(&(key.len() as u64).to_le_bytes());
        buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);
        record_positions.push(position);
    }

    let mut by_table: Vec<Vec<(u64, u64)>> = vec![Vec::new(); 256];
    for (i, (key, _)) in pairs.iter().enumerate() {
        let hash = djb64(key);
        let table = (hash % 256) as usize;
        by_table[table].push((hash, record_positions[i]));
    }

    let mut header_pointers = [(0u64, 0u64); 256];

    for (table_idx, entries) in by_table.iter().enumerate() {
        if entries.is_empty() {
            continue;
        }
        let len = entries.len() * 2;
        let mut slots = vec![(0u64, 0u64); len];

        for &(hash, record_pos) in entries {
            let mut slot = ((hash / 256) % len as u64) as usize;
            while slots[slot].1 != 0 {
                slot = (slot + 1) % len;
            }
            slots[slot] = (hash, record_pos);
        }

        let table_position = buf.len() as u64;
        for (slot_hash, slot_record_pos) in &slots {
            buf.extend_from_slice(&slot_hash.to_le_bytes());
            buf.extend_from_slice(&slot_record_pos.to_le_bytes());
        }

        header_pointers[table_idx] = (table_position, len as u64);
    }

    for (i, (position, length)) in header_pointers.iter().enumerate() {
        let offset = i * 16;
        buf[offset..offset + 8].copy_from_slice(&position.to_le_bytes());
        buf[offset + 8..offset + 16].copy_from_slice(&length.to_le_bytes());
    }

    buf
}
