//! Stream hashing.
//!
//! The secondary index is keyed by a 64-bit stream hash built from two
//! independent 32-bit hash functions: `hash = (high << 32) | low`. Using two
//! independent functions keeps the collision rate negligible for realistic
//! stream counts while letting each half stay a cheap 32-bit computation.
//!
//! Both functions are seeded with fixed constants: the hash of a given
//! stream name must be identical across process restarts, otherwise the
//! persisted index would be unreadable.
//!
//! The numeric log format does not hash at all - stream ids are already
//! unique integers, so identity "hashers" are used (high half zero, low half
//! the id itself).

use std::hash::Hasher as _;

use siphasher::sip::SipHasher24;
use xxhash_rust::xxh32::xxh32;

/// A 32-bit hash function over raw stream-id bytes.
pub trait StreamHasher: Send + Sync + 'static {
    fn hash(&self, data: &[u8]) -> u32;
}

/// Combine the two 32-bit halves into the 64-bit index key.
pub fn combine_hashes(high: u32, low: u32) -> u64 {
    ((high as u64) << 32) | low as u64
}

/// xxHash32 with a fixed seed. Used for the high half of the stream hash.
#[derive(Debug, Clone, Copy)]
pub struct Xxh32Hasher {
    seed: u32,
}

impl Xxh32Hasher {
    pub const DEFAULT_SEED: u32 = 0xc58f_1a7b;

    pub fn new(seed: u32) -> Self {
        Self { seed }
    }
}

impl Default for Xxh32Hasher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SEED)
    }
}

impl StreamHasher for Xxh32Hasher {
    fn hash(&self, data: &[u8]) -> u32 {
        xxh32(data, self.seed)
    }
}

/// SipHash-2-4 truncated to 32 bits, with fixed keys. Used for the low half
/// of the stream hash.
#[derive(Debug, Clone, Copy)]
pub struct Sip32Hasher {
    k0: u64,
    k1: u64,
}

impl Sip32Hasher {
    pub const DEFAULT_K0: u64 = 0x0706_0504_0302_0100;
    pub const DEFAULT_K1: u64 = 0x0f0e_0d0c_0b0a_0908;

    pub fn new(k0: u64, k1: u64) -> Self {
        Self { k0, k1 }
    }
}

impl Default for Sip32Hasher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_K0, Self::DEFAULT_K1)
    }
}

impl StreamHasher for Sip32Hasher {
    fn hash(&self, data: &[u8]) -> u32 {
        let mut hasher = SipHasher24::new_with_keys(self.k0, self.k1);
        hasher.write(data);
        hasher.finish() as u32
    }
}

/// Identity hasher for the high half of numeric stream ids: always zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityHighHasher;

impl StreamHasher for IdentityHighHasher {
    fn hash(&self, _data: &[u8]) -> u32 {
        0
    }
}

/// Identity hasher for the low half of numeric stream ids: the id itself,
/// read from its little-endian byte representation.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityLowHasher;

impl StreamHasher for IdentityLowHasher {
    fn hash(&self, data: &[u8]) -> u32 {
        let mut bytes = [0u8; 4];
        let n = data.len().min(4);
        bytes[..n].copy_from_slice(&data[..n]);
        u32::from_le_bytes(bytes)
    }
}
