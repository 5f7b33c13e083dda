use std::fmt;

use serde::{Deserialize, Serialize};

/// A node's 48-bit network identity, carried on the wire as the `sender_id`
/// header field. Ordering is lexicographic over the raw bytes and is the
/// canonical tie-break used throughout neighbor discovery, MPR selection,
/// and platoon-head handoff — every deterministic choice in this crate that
/// needs to break a tie between two nodes breaks it by comparing
/// `NodeIdentity` values directly.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeIdentity([u8; 6]);

impl NodeIdentity {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn from_u64(value: u64) -> Self {
        let b = value.to_be_bytes();
        Self([b[2], b[3], b[4], b[5], b[6], b[7]])
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn to_u64(self) -> u64 {
        let b = self.0;
        u64::from_be_bytes([0, 0, b[0], b[1], b[2], b[3], b[4], b[5]])
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeIdentity({})", hex::encode(self.0))
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_u64() {
        let id = NodeIdentity::from_u64(0x0000_1122_3344_5566);
        assert_eq!(id.to_u64(), 0x0000_1122_3344_5566);
    }

    #[test]
    fn ordering_is_lexicographic_on_bytes() {
        let a = NodeIdentity::new([0, 0, 0, 0, 0, 1]);
        let b = NodeIdentity::new([0, 0, 0, 0, 0, 2]);
        assert!(a < b);
    }

    #[test]
    fn display_is_lowercase_hex() {
        let id = NodeIdentity::new([0xAB, 0, 0, 0, 0, 0x01]);
        assert_eq!(format!("{}", id), "ab0000000001");
    }
}
