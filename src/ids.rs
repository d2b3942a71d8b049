use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BundleStoreError;

/// A 128-bit node identifier, stored as raw bytes so the two external
/// storage-model encodings (§3) can be derived without re-parsing.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
pub struct NodeId(pub [u8; 16]);

/// Low 6 bytes that mark a sentinel child id (spec §9, "Sentinel child
/// ids"): system-internal placeholders that are never materialized as a
/// bundle row and must not be flagged as missing by the consistency
/// checker.
const SENTINEL_TAIL: [u8; 6] = [0xba, 0xbe, 0xca, 0xfe, 0xba, 0xbe];

impl NodeId {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn from_high_low(high: u64, low: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&high.to_be_bytes());
        bytes[8..16].copy_from_slice(&low.to_be_bytes());
        Self(bytes)
    }

    pub fn high_low(&self) -> (u64, u64) {
        let high = u64::from_be_bytes(self.0[0..8].try_into().unwrap());
        let low = u64::from_be_bytes(self.0[8..16].try_into().unwrap());
        (high, low)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// True if this id's low 6 bytes are the reserved sentinel tail; such
    /// ids denote system-internal nodes that are never backed by a bundle
    /// row (spec §9).
    pub fn is_sentinel(&self) -> bool {
        self.0[10..16] == SENTINEL_TAIL
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

impl FromStr for NodeId {
    type Err = BundleStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped: String = s.chars().filter(|c| *c != '-').collect();
        let raw = hex::decode(&stripped)
            .map_err(|e| BundleStoreError::DecodingError(format!("invalid node id {s}: {e}")))?;
        if raw.len() != 16 {
            return Err(BundleStoreError::DecodingError(format!(
                "node id {s} must decode to 16 bytes, got {}",
                raw.len()
            )));
        }
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&raw);
        Ok(NodeId(bytes))
    }
}

/// A (namespace-index, name-index) pair referencing the name index (C1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
pub struct QName {
    pub namespace_index: u32,
    pub name_index: u32,
}

impl QName {
    pub const fn new(namespace_index: u32, name_index: u32) -> Self {
        Self {
            namespace_index,
            name_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_round_trip() {
        let id = NodeId::from_str("00000000-0000-0000-0000-000000000001").unwrap();
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000001");
    }

    #[test]
    fn high_low_round_trip() {
        let id = NodeId::from_high_low(0x0123_4567_89ab_cdef, 0xfedc_ba98_7654_3210);
        let (h, l) = id.high_low();
        assert_eq!(h, 0x0123_4567_89ab_cdef);
        assert_eq!(l, 0xfedc_ba98_7654_3210);
    }

    #[test]
    fn sentinel_detection() {
        let mut bytes = [0u8; 16];
        bytes[10..16].copy_from_slice(&SENTINEL_TAIL);
        assert!(NodeId(bytes).is_sentinel());
        assert!(!NodeId([0u8; 16]).is_sentinel());
    }
}
