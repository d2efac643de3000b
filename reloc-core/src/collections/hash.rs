//! Key hashing for the hash table containers.
//!
//! Keys are hashed over their canonical bytes: little-endian for numbers,
//! UTF-8 for strings. A stored hash is never equal to [`UNUSED_HASH`], which
//! marks empty slots; hashes that collide with it are remapped.

use crate::arena::BlockMemory;
use crate::error::Result;
use crate::object::{Element, Str};
use crate::types::ArenaOffset;

/// Hash value marking an unused slot.
pub const UNUSED_HASH: u64 = 493_295_393;

/// Replacement for real hashes equal to [`UNUSED_HASH`].
pub const REMAPPED_HASH: u64 = 858_931_273;

/// Make a hash storable by moving it off the unused-slot sentinel.
#[must_use]
pub const fn storable_hash(hash: u64) -> u64 {
    if hash == UNUSED_HASH {
        REMAPPED_HASH
    } else {
        hash
    }
}

/// A hash function over canonical key bytes.
///
/// Stored hashes are reused when a table doubles and travel with the table
/// when it is relocated, so every process reading a table must hash with
/// the same function.
pub trait KeyHasher: 'static {
    /// Hash the canonical bytes of a key.
    fn hash_bytes(bytes: &[u8]) -> u64;
}

/// Default hasher: FNV-1a over the bytes followed by a 64-bit finalizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteMixHasher;

impl KeyHasher for ByteMixHasher {
    fn hash_bytes(bytes: &[u8]) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in bytes {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash ^= hash >> 33;
        hash = hash.wrapping_mul(0xff51_afd7_ed55_8ccd);
        hash ^= hash >> 33;
        hash = hash.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
        hash ^ (hash >> 33)
    }
}

/// An element usable as a map key.
pub trait Key: Element {
    #[doc(hidden)]
    fn key_bytes(memory: &BlockMemory, at: ArenaOffset) -> Result<&[u8]>;
}

/// A Rust-side value that can be looked up among keys of type `Self`.
pub trait Lookup<Q: ?Sized>: Key {
    #[doc(hidden)]
    fn with_query_bytes<R>(query: &Q, f: impl FnOnce(&[u8]) -> R) -> R;
}

/// Hash of a query under hasher `H`, ready to store.
pub(crate) fn query_hash<K, Q, H>(query: &Q) -> u64
where
    K: Lookup<Q>,
    Q: ?Sized,
    H: KeyHasher,
{
    storable_hash(K::with_query_bytes(query, H::hash_bytes))
}

/// Whether the stored key at `at` equals `query`.
pub(crate) fn key_matches<K, Q>(memory: &BlockMemory, at: ArenaOffset, query: &Q) -> Result<bool>
where
    K: Lookup<Q>,
    Q: ?Sized,
{
    let stored = K::key_bytes(memory, at)?;
    Ok(K::with_query_bytes(query, |bytes| bytes == stored))
}

macro_rules! plain_key {
    ($($ty:ty),* $(,)?) => {$(
        impl Key for $ty {
            fn key_bytes(memory: &BlockMemory, at: ArenaOffset) -> Result<&[u8]> {
                Ok(memory.bytes(at, std::mem::size_of::<$ty>() as u64))
            }
        }

        impl Lookup<$ty> for $ty {
            fn with_query_bytes<R>(query: &$ty, f: impl FnOnce(&[u8]) -> R) -> R {
                f(&query.to_le_bytes())
            }
        }
    )*};
}

plain_key!(u8, u16, u32, u64, i8, i16, i32, i64);

impl Key for bool {
    fn key_bytes(memory: &BlockMemory, at: ArenaOffset) -> Result<&[u8]> {
        Ok(memory.bytes(at, 1))
    }
}

impl Lookup<bool> for bool {
    fn with_query_bytes<R>(query: &bool, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&[u8::from(*query)])
    }
}

impl<const N: usize> Key for [u8; N] {
    fn key_bytes(memory: &BlockMemory, at: ArenaOffset) -> Result<&[u8]> {
        Ok(memory.bytes(at, N as u64))
    }
}

impl<const N: usize> Lookup<[u8; N]> for [u8; N] {
    fn with_query_bytes<R>(query: &[u8; N], f: impl FnOnce(&[u8]) -> R) -> R {
        f(query)
    }
}

impl Key for Str {
    fn key_bytes(memory: &BlockMemory, at: ArenaOffset) -> Result<&[u8]> {
        crate::object::string::text_bytes(memory, at)
    }
}

impl Lookup<str> for Str {
    fn with_query_bytes<R>(query: &str, f: impl FnOnce(&[u8]) -> R) -> R {
        f(query.as_bytes())
    }
}

impl Lookup<String> for Str {
    fn with_query_bytes<R>(query: &String, f: impl FnOnce(&[u8]) -> R) -> R {
        f(query.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_never_stored() {
        assert_eq!(storable_hash(UNUSED_HASH), REMAPPED_HASH);
        assert_eq!(storable_hash(5), 5);
    }

    #[test]
    fn hasher_is_deterministic_and_spreads() {
        let a = ByteMixHasher::hash_bytes(b"alpha");
        assert_eq!(a, ByteMixHasher::hash_bytes(b"alpha"));
        assert_ne!(a, ByteMixHasher::hash_bytes(b"alphb"));
        assert_ne!(ByteMixHasher::hash_bytes(&[]), ByteMixHasher::hash_bytes(&[0]));
    }

    #[test]
    fn query_hashes_use_canonical_bytes() {
        let by_query = query_hash::<i64, i64, ByteMixHasher>(&42);
        let by_bytes = storable_hash(ByteMixHasher::hash_bytes(&42i64.to_le_bytes()));
        assert_eq!(by_query, by_bytes);

        let text = query_hash::<Str, str, ByteMixHasher>("key");
        let owned = query_hash::<Str, String, ByteMixHasher>(&"key".to_string());
        assert_eq!(text, owned);
    }
}
