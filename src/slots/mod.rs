//! Slot placement and resharding.
//!
//! Every key hashes into one of [`SLOT_COUNT`] slots and the storage
//! encoding places rows slot-first, so a whole slot is one contiguous
//! range that can be walked and handed to another server. A hash tag,
//! the bytes inside the first `{...}` pair of a key, pins related keys
//! to the same slot.

mod manager;

pub use manager::{SlotStatus, SlotsManager};

/// Number of slots keys are partitioned into.
pub const SLOT_COUNT: u16 = 1024;

/// Slot a key belongs to.
pub fn key_slot(key: &[u8]) -> u16 {
    (crc32fast::hash(hash_tag(key)) % u32::from(SLOT_COUNT)) as u16
}

/// The bytes inside the first `{...}` pair when that pair is non-empty,
/// otherwise the whole key. `{}` pins nothing.
fn hash_tag(key: &[u8]) -> &[u8] {
    let Some(open) = memchr::memchr(b'{', key) else {
        return key;
    };
    let Some(off) = memchr::memchr(b'}', &key[open + 1..]) else {
        return key;
    };
    if off == 0 {
        return key;
    }
    &key[open + 1..open + 1 + off]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_extraction() {
        assert_eq!(hash_tag(b"plain"), b"plain");
        assert_eq!(hash_tag(b"{user}profile"), b"user");
        assert_eq!(hash_tag(b"pre{t}post"), b"t");
        assert_eq!(hash_tag(b"{a}{b}"), b"a");
        assert_eq!(hash_tag(b"a}b{c}"), b"c");
    }

    #[test]
    fn degenerate_tags_fall_back_to_the_key() {
        assert_eq!(hash_tag(b"{}empty"), b"{}empty");
        assert_eq!(hash_tag(b"{unclosed"), b"{unclosed");
        assert_eq!(hash_tag(b""), b"");
    }

    #[test]
    fn tagged_keys_share_a_slot() {
        assert_eq!(key_slot(b"{acct}balance"), key_slot(b"{acct}history"));
        assert_eq!(key_slot(b"x{acct}y"), key_slot(b"{acct}"));
    }

    #[test]
    fn slots_stay_in_range() {
        for key in [&b""[..], b"a", b"{t}k", b"\x00\xff\x7f"] {
            assert!(key_slot(key) < SLOT_COUNT);
        }
    }
}
