//! Key and value types for BasaltDB.
//!
//! Keys and values are variable-length byte sequences. Keys compare
//! lexicographically on their bytes, so callers with integer keys encode
//! them big-endian to make byte order agree with numeric order.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Deref;

/// A database key.
///
/// Keys are limited to [`MAX_KEY_SIZE`](crate::constants::MAX_KEY_SIZE)
/// bytes so that a single entry always fits in a leaf page.
///
/// # Example
///
/// ```rust
/// use basalt_common::types::Key;
///
/// let key = Key::from_bytes(b"user:1234");
/// assert_eq!(key.len(), 9);
/// assert!(Key::from_u64(1) < Key::from_u64(256));
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key(Bytes);

impl Key {
    /// Creates a key from a byte slice.
    #[inline]
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }

    /// Creates a key from owned bytes.
    #[inline]
    #[must_use]
    pub fn from_vec(vec: Vec<u8>) -> Self {
        Self(Bytes::from(vec))
    }

    /// Creates a key from a `Bytes` instance without copying.
    #[inline]
    #[must_use]
    pub const fn from_raw(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Creates a key from an unsigned integer, big-endian encoded so that
    /// byte order matches numeric order.
    #[inline]
    #[must_use]
    pub fn from_u64(n: u64) -> Self {
        Self(Bytes::copy_from_slice(&n.to_be_bytes()))
    }

    /// Returns the length of the key in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the key is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the key as a byte slice.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the underlying `Bytes`.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl Deref for Key {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for Key {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::borrow::Borrow<[u8]> for Key {
    #[inline]
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl Ord for Key {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Key {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for Key {
    fn from(vec: Vec<u8>) -> Self {
        Self::from_vec(vec)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "Key({s:?})"),
            _ => {
                write!(f, "Key(0x")?;
                for byte in &self.0[..self.0.len().min(16)] {
                    write!(f, "{byte:02x}")?;
                }
                if self.0.len() > 16 {
                    write!(f, "...")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A database value.
///
/// Values are opaque bytes limited to
/// [`MAX_VALUE_SIZE`](crate::constants::MAX_VALUE_SIZE). A zero-length
/// value is not representable on disk; the leaf encoding reserves length
/// zero for "absent".
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value(Bytes);

impl Value {
    /// Creates a value from a byte slice.
    #[inline]
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }

    /// Creates a value from owned bytes.
    #[inline]
    #[must_use]
    pub fn from_vec(vec: Vec<u8>) -> Self {
        Self(Bytes::from(vec))
    }

    /// Creates a value from a `Bytes` instance without copying.
    #[inline]
    #[must_use]
    pub const fn from_raw(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Returns the length of the value in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the value is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the value as a byte slice.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the underlying `Bytes`.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl Deref for Value {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for Value {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for Value {
    fn from(vec: Vec<u8>) -> Self {
        Self::from_vec(vec)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "Value({s:?})"),
            _ => write!(f, "Value({} bytes)", self.0.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering() {
        assert!(Key::from_bytes(b"a") < Key::from_bytes(b"b"));
        assert!(Key::from_bytes(b"a") < Key::from_bytes(b"aa"));
        assert_eq!(Key::from_bytes(b"a"), Key::from_bytes(b"a"));
    }

    #[test]
    fn test_key_from_u64_preserves_order() {
        let mut keys: Vec<Key> = [300u64, 1, 256, 42, 2].iter().map(|&n| Key::from_u64(n)).collect();
        keys.sort();
        let expected: Vec<Key> = [1u64, 2, 42, 256, 300].iter().map(|&n| Key::from_u64(n)).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_value_roundtrip() {
        let value = Value::from_bytes(b"hello");
        assert_eq!(value.as_bytes(), b"hello");
        assert_eq!(value.len(), 5);
        assert!(!value.is_empty());
    }

    #[test]
    fn test_key_debug_hex_fallback() {
        let key = Key::from_bytes(&[0x00, 0x01, 0xFF]);
        let repr = format!("{key:?}");
        assert!(repr.starts_with("Key(0x"));
    }
}
