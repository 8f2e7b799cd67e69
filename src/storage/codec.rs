//! Internal key encodings.
//!
//! Every stored row carries a one-byte type marker. Key-value and
//! hash-size rows embed the owning slot as a big-endian u16 right after
//! the marker, so byte order groups rows of one type by slot:
//!
//! ```text
//! k <slot:u16> <key>            key-value row
//! H <slot:u16> <name>           hash-map size row
//! h <len:u8> <name> = <field>   hash-map field row
//! ```
//!
//! Field rows carry the map name length in one byte, which caps keys and
//! map names at 255 bytes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::StorageError;
use crate::slots::key_slot;

/// Type marker for key-value rows.
pub const KV: u8 = b'k';
/// Type marker for hash-map size rows.
pub const HSIZE: u8 = b'H';
/// Type marker for hash-map field rows.
pub const HASH: u8 = b'h';

/// Longest encodable key or hash-map name.
pub const MAX_KEY_LEN: usize = 255;

/// Reject keys the encoding cannot represent.
pub fn check_key(key: &[u8]) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::EmptyKey);
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StorageError::KeyTooLong {
            len: key.len(),
            max: MAX_KEY_LEN,
        });
    }
    Ok(())
}

pub fn encode_kv_key(key: &[u8]) -> Bytes {
    encode_slotted(KV, key_slot(key), key)
}

pub fn encode_hsize_key(name: &[u8]) -> Bytes {
    encode_slotted(HSIZE, key_slot(name), name)
}

pub fn encode_hash_key(name: &[u8], field: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(3 + name.len() + field.len());
    buf.put_u8(HASH);
    buf.put_u8(name.len() as u8);
    buf.put_slice(name);
    buf.put_u8(b'=');
    buf.put_slice(field);
    buf.freeze()
}

/// Prefix covering every field row of one map.
pub fn hash_field_prefix(name: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(3 + name.len());
    buf.put_u8(HASH);
    buf.put_u8(name.len() as u8);
    buf.put_slice(name);
    buf.put_u8(b'=');
    buf.freeze()
}

fn encode_slotted(marker: u8, slot: u16, key: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(3 + key.len());
    buf.put_u8(marker);
    buf.put_u16(slot);
    buf.put_slice(key);
    buf.freeze()
}

/// Half-open raw bounds covering one slot within one row type.
pub fn slot_bounds(marker: u8, slot: u16) -> (Bytes, Bytes) {
    let lower = encode_slotted(marker, slot, b"");
    let upper = if slot == u16::MAX {
        Bytes::copy_from_slice(&[marker + 1])
    } else {
        encode_slotted(marker, slot + 1, b"")
    };
    (lower, upper)
}

/// Half-open raw bounds covering an entire row type.
pub fn section_bounds(marker: u8) -> (Bytes, Bytes) {
    (
        Bytes::copy_from_slice(&[marker]),
        Bytes::copy_from_slice(&[marker + 1]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_key_embeds_the_slot() {
        let raw = encode_kv_key(b"user:1001");
        let slot = key_slot(b"user:1001");
        assert_eq!(raw[0], KV);
        assert_eq!(&raw[1..3], slot.to_be_bytes());
        assert_eq!(&raw[3..], b"user:1001");
    }

    #[test]
    fn hsize_key_embeds_the_slot() {
        let raw = encode_hsize_key(b"profile");
        let slot = key_slot(b"profile");
        assert_eq!(raw[0], HSIZE);
        assert_eq!(&raw[1..3], slot.to_be_bytes());
        assert_eq!(&raw[3..], b"profile");
    }

    #[test]
    fn hash_key_prefixes_the_name_length() {
        let raw = encode_hash_key(b"profile", b"email");
        assert_eq!(raw[0], HASH);
        assert_eq!(raw[1] as usize, b"profile".len());
        assert_eq!(&raw[2..9], b"profile");
        assert_eq!(raw[9], b'=');
        assert_eq!(&raw[10..], b"email");
    }

    #[test]
    fn hash_field_may_contain_separator() {
        // only the name length byte delimits the name, so '=' in a field
        // cannot shift it
        let with_sep = encode_hash_key(b"m", b"a=b");
        let plain = encode_hash_key(b"m", b"a");
        assert!(with_sep.starts_with(&hash_field_prefix(b"m")));
        assert_ne!(with_sep, plain);
    }

    #[test]
    fn check_key_limits() {
        assert!(check_key(b"a").is_ok());
        assert!(check_key(&[7u8; 255]).is_ok());
        assert_eq!(check_key(b""), Err(StorageError::EmptyKey));
        assert!(matches!(
            check_key(&[7u8; 256]),
            Err(StorageError::KeyTooLong { len: 256, max: 255 })
        ));
    }

    #[test]
    fn slot_bounds_cover_exactly_one_slot() {
        let slot = key_slot(b"k1");
        let (lower, upper) = slot_bounds(KV, slot);
        let raw = encode_kv_key(b"k1");
        assert!(raw >= lower && raw < upper);

        let (lower, upper) = slot_bounds(KV, slot.wrapping_add(1) % 1024);
        assert!(!(raw >= lower && raw < upper));
    }

    #[test]
    fn field_rows_sort_within_their_prefix() {
        let prefix = hash_field_prefix(b"m");
        let a = encode_hash_key(b"m", b"a");
        let z = encode_hash_key(b"m", b"z");
        assert!(a.starts_with(&prefix));
        assert!(z.starts_with(&prefix));
        assert!(a < z);
        // a longer name never collides with the prefix of a shorter one
        let other = encode_hash_key(b"mm", b"a");
        assert!(!other.starts_with(&prefix));
    }
}
