//! Swarm-size estimation filters ([BEP-33]).
//!
//! [BEP-33]: http://bittorrent.org/beps/bep_0033.html

use super::error::DhtError;
use sha1::{Digest, Sha1};
use std::fmt;
use std::net::IpAddr;
use std::ops::BitOr;

pub const BLOOM_BYTES: usize = 256;
pub const BLOOM_BITS: usize = BLOOM_BYTES * 8;
pub const BLOOM_HASHES: usize = 2;

/// A 2048-bit bloom filter of host addresses.
///
/// Filters only ever grow: hosts are inserted and filters are unioned, never
/// cleared, so the estimate never decreases.
///
/// ```
/// use rdht::dht::BloomFilter;
/// use std::net::{IpAddr, Ipv4Addr};
///
/// let mut filter = BloomFilter::new();
/// assert_eq!(filter.estimate(), 0.0);
///
/// filter.insert_host(&IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
/// assert!(filter.estimate() > 0.0);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: [u8; BLOOM_BYTES],
}

impl BloomFilter {
    pub fn new() -> Self {
        Self {
            bits: [0u8; BLOOM_BYTES],
        }
    }

    /// A filter with a single host inserted.
    pub fn with_host(ip: &IpAddr) -> Self {
        let mut filter = Self::new();
        filter.insert_host(ip);
        filter
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DhtError> {
        if data.len() != BLOOM_BYTES {
            return Err(DhtError::InvalidBloomFilter(format!(
                "expected {} bytes, got {}",
                BLOOM_BYTES,
                data.len()
            )));
        }
        let mut bits = [0u8; BLOOM_BYTES];
        bits.copy_from_slice(data);
        Ok(Self { bits })
    }

    pub fn from_hex(s: &str) -> Result<Self, DhtError> {
        if s.len() != BLOOM_BYTES * 2 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DhtError::InvalidBloomFilter(format!(
                "expected {} hex characters",
                BLOOM_BYTES * 2
            )));
        }
        let mut bits = [0u8; BLOOM_BYTES];
        for (i, byte) in bits.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| DhtError::InvalidBloomFilter("not hex".into()))?;
        }
        Ok(Self { bits })
    }

    pub fn as_bytes(&self) -> &[u8; BLOOM_BYTES] {
        &self.bits
    }

    pub fn to_hex(&self) -> String {
        self.bits
            .iter()
            .fold(String::with_capacity(BLOOM_BYTES * 2), |mut s, b| {
                use std::fmt::Write;
                let _ = write!(s, "{:02x}", b);
                s
            })
    }

    /// Sets the two bits selected by the SHA-1 digest of the packed address.
    /// The first and second byte pairs of the digest, read little-endian,
    /// give the two bit indexes.
    pub fn insert_host(&mut self, ip: &IpAddr) {
        let digest = match ip {
            IpAddr::V4(v4) => Sha1::digest(v4.octets()),
            IpAddr::V6(v6) => Sha1::digest(v6.octets()),
        };

        let index1 = (digest[0] as usize | (digest[1] as usize) << 8) % BLOOM_BITS;
        let index2 = (digest[2] as usize | (digest[3] as usize) << 8) % BLOOM_BITS;

        self.set_bit(index1);
        self.set_bit(index2);
    }

    fn set_bit(&mut self, index: usize) {
        self.bits[index / 8] |= 1 << (index % 8);
    }

    /// In-place union.
    pub fn merge(&mut self, other: &BloomFilter) {
        for (mine, theirs) in self.bits.iter_mut().zip(other.bits.iter()) {
            *mine |= theirs;
        }
    }

    pub fn union(&self, other: &BloomFilter) -> BloomFilter {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    pub fn count_zero_bits(&self) -> usize {
        self.bits.iter().map(|b| b.count_zeros() as usize).sum()
    }

    /// Estimated number of distinct hosts inserted.
    ///
    /// An empty filter, and a saturated one where the estimate is undefined,
    /// both report zero.
    pub fn estimate(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }

        let m = BLOOM_BITS as f64;
        let c = self.count_zero_bits().min(BLOOM_BITS - 1) as f64;
        if c == 0.0 {
            return 0.0;
        }

        let size = (c / m).ln() / (BLOOM_HASHES as f64 * (-1.0 / m).ln_1p());
        if size.is_finite() {
            size
        } else {
            0.0
        }
    }
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl BitOr for &BloomFilter {
    type Output = BloomFilter;

    fn bitor(self, rhs: &BloomFilter) -> BloomFilter {
        self.union(rhs)
    }
}

impl fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BloomFilter(~{:.1})", self.estimate())
    }
}
