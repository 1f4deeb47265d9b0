//! Handle codec
//!
//! A handle is the only way scripts refer to a resource. It has the form
//! `tag:identity:checksum`: the kind tag, the identity in decimal, and a 4-bit
//! checksum of the identity in decimal. The checksum only catches corrupted or
//! hand-typed tokens early; whether a handle is *live* is decided by the registry,
//! which compares the slot generation packed into the identity.

use std::fmt;

/// Fixed value folded into every checksum so that identity 0 does not checksum to 0
const CHECKSUM_SALT: u64 = 0x8;

/// Arena position of a resource plus the generation of that slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    pub slot: u32,
    pub generation: u32,
}

impl Identity {
    pub fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.slot)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            slot: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.slot, self.generation)
    }
}

/// Fold an identity down to four bits
pub fn checksum(identity: u64) -> u64 {
    let mut x = identity;
    x ^= x >> 32;
    x ^= x >> 16;
    x ^= x >> 8;
    x ^= x >> 4;
    (x & 0xF) ^ CHECKSUM_SALT
}

pub fn encode(tag: &str, identity: u64) -> String {
    format!("{}:{}:{}", tag, identity, checksum(identity))
}

/// Recover the identity from a token, if it is well formed, carries
/// `expected_tag` and has a matching checksum
pub fn decode(token: &str, expected_tag: &str) -> Option<u64> {
    let mut fields = token.split(':');
    let (tag, identity, check) = (fields.next()?, fields.next()?, fields.next()?);
    if fields.next().is_some() || tag.is_empty() || tag != expected_tag {
        return None;
    }

    let identity = parse_decimal(identity)?;
    let check = parse_decimal(check)?;
    (checksum(identity) == check).then_some(identity)
}

fn parse_decimal(field: &str) -> Option<u64> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAGS: [&str; 5] = ["skein.node", "skein.pub", "skein.sub", "skein.cli", "skein.srv"];

    fn sample_identities() -> Vec<u64> {
        let mut ids = vec![0, 1, 15, 16, 255, 4096, u32::MAX as u64, u64::MAX];
        ids.extend((0..64).map(|shift| 1u64 << shift));
        ids.push(Identity::new(7, 3).to_bits());
        ids
    }

    #[test]
    fn test_decode_inverts_encode() {
        for tag in TAGS {
            for id in sample_identities() {
                assert_eq!(decode(&encode(tag, id), tag), Some(id), "{} {}", tag, id);
            }
        }
    }

    #[test]
    fn test_zero_identity_has_nonzero_checksum() {
        assert_eq!(checksum(0), 8);
        assert_eq!(encode("skein.node", 0), "skein.node:0:8");
    }

    #[test]
    fn test_checksum_fits_four_bits() {
        for id in sample_identities() {
            assert!(checksum(id) < 16);
        }
    }

    #[test]
    fn test_any_other_checksum_is_rejected() {
        for id in sample_identities() {
            let good = checksum(id);
            for bad in (0..64).filter(|c| *c != good) {
                let token = format!("skein.pub:{}:{}", id, bad);
                assert_eq!(decode(&token, "skein.pub"), None, "{}", token);
            }
        }
    }

    #[test]
    fn test_tag_must_match_exactly() {
        for id in sample_identities() {
            for a in TAGS {
                let token = encode(a, id);
                for b in TAGS.iter().filter(|b| **b != a) {
                    assert_eq!(decode(&token, b), None);
                }
            }
        }
        assert_eq!(decode(&encode("skein.pub", 3), "skein.pu"), None);
        assert_eq!(decode(&encode("skein.pub", 3), "skein.pub "), None);
    }

    #[test]
    fn test_malformed_tokens_fail_cleanly() {
        let malformed = [
            "",
            ":",
            "::",
            "skein.pub",
            "skein.pub:1",
            "skein.pub:1:",
            "skein.pub::9",
            ":1:9",
            "skein.pub:1:9:0",
            "skein.pub:-1:9",
            "skein.pub:+1:9",
            "skein.pub: 1:9",
            "skein.pub:abc:9",
            "skein.pub:1:nine",
            "skein.pub:99999999999999999999999:8",
            "skein.pub:1:99999999999999999999999",
        ];
        for token in malformed {
            assert_eq!(decode(token, "skein.pub"), None, "{:?}", token);
        }
    }

    #[test]
    fn test_identity_bits() {
        let id = Identity::new(42, 7);
        assert_eq!(id.to_bits(), (7u64 << 32) | 42);
        assert_eq!(Identity::from_bits(id.to_bits()), id);
        assert_eq!(id.to_string(), "42@7");
    }
}
