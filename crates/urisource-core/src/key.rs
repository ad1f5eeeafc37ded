//! Resource keys: a stable 64-bit digest of a URI string.
//!
//! Keys are CRC-64 (ECMA-182 polynomial, reflected, CRC-64/XZ parameters)
//! over the exact UTF-8 bytes of the URI. No normalisation happens, so two
//! URIs that differ only in their query string get different keys.
//!
//! Distinct URIs colliding on the same key is possible; at 64 bits the odds
//! are accepted as the cost of a fixed-width key.

use serde::{Deserialize, Serialize};

/// Reflected ECMA-182 polynomial.
const POLY: u64 = 0xC96C_5795_D787_0F42;

const TABLE: [u64; 256] = build_table();

const fn build_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u64;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ POLY } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-64/XZ of `bytes`.
pub fn crc64(bytes: &[u8]) -> u64 {
    let mut crc = u64::MAX;
    for &b in bytes {
        crc = TABLE[((crc ^ b as u64) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc ^ u64::MAX
}

/// Cache and dedup identifier for a URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(u64);

impl ResourceKey {
    /// Hash a URI string.
    pub fn from_uri(uri: &str) -> Self {
        Self(crc64(uri.as_bytes()))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for ResourceKey {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
