//! Partition assignment
//!
//! Maps a record identifier to the 1-based partition the target store would
//! pick for it, so that independent ingestion workers write every record to
//! the same partition without coordinating.
//!
//! The scheme:
//! - integer ids hash to themselves, reinterpreted as `u64`;
//! - string ids of exactly 8 bytes are read as a native-endian `u64`;
//! - other string ids go through MurmurHash64A seeded with [`HASH_SEED`];
//! - the partition is `hash % partition_count + 1`.
//!
//! The 8-byte shortcut depends on host byte order. It is kept as-is because
//! the target store computes placement the same way.

use partload_common::{Identifier, IngestError, Result};

/// Seed the target store uses for string identifier hashing.
pub const HASH_SEED: u64 = 0xc70f_6907;

const MURMUR_MUL: u64 = 0xc6a4_a793_5bd1_e995;
const MURMUR_SHIFT: u32 = 47;

/// MurmurHash64A over `bytes`.
pub fn murmur_hash64a(bytes: &[u8], seed: u64) -> u64 {
    let mut hash = seed ^ (bytes.len() as u64).wrapping_mul(MURMUR_MUL);

    let mut chunks = bytes.chunks_exact(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let mut k = u64::from_le_bytes(word).wrapping_mul(MURMUR_MUL);
        k ^= k >> MURMUR_SHIFT;
        k = k.wrapping_mul(MURMUR_MUL);

        hash ^= k;
        hash = hash.wrapping_mul(MURMUR_MUL);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        for (i, byte) in tail.iter().enumerate() {
            hash ^= u64::from(*byte) << (8 * i);
        }
        hash = hash.wrapping_mul(MURMUR_MUL);
    }

    hash ^= hash >> MURMUR_SHIFT;
    hash = hash.wrapping_mul(MURMUR_MUL);
    hash ^= hash >> MURMUR_SHIFT;
    hash
}

/// 64-bit placement hash of an identifier.
pub fn identifier_hash(id: &Identifier) -> u64 {
    match id {
        Identifier::Integer(value) => *value as u64,
        Identifier::String(value) => {
            let bytes = value.as_bytes();
            match <[u8; 8]>::try_from(bytes) {
                Ok(word) => u64::from_ne_bytes(word),
                Err(_) => murmur_hash64a(bytes, HASH_SEED),
            }
        },
    }
}

/// Partition index in `[1, partition_count]` for `id`.
///
/// Fails with [`IngestError::InvalidArgument`] when `partition_count` is 0.
pub fn assign(id: &Identifier, partition_count: u32) -> Result<u32> {
    if partition_count == 0 {
        return Err(IngestError::invalid_argument(
            "partition count must be at least 1",
        ));
    }
    let index = identifier_hash(id) % u64::from(partition_count);
    // index < partition_count, so it fits in u32
    Ok(index as u32 + 1)
}
