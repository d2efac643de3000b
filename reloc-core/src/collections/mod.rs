//! Containers stored in block memory.
//!
//! - [`Array`]: a fixed-capacity body; growing yields a new array.
//! - [`Vector`]: a growable sequence over an array body.
//! - [`Map`]: an open-addressed hash map with value-compared keys.
//! - [`JoinMap`]: a multimap keyed by precomputed hashes.
//!
//! Every container is addressed by offset and carries the descriptors of
//! what it holds, so a block holding containers can be relocated as bytes.
//! Growth always allocates in the container's own block; when that block is
//! full the operation fails with `NotEnoughSpace` and the container is left
//! as it was.

pub(crate) mod array;
pub mod hash;
pub(crate) mod join_map;
pub(crate) mod join_pair_array;
pub(crate) mod map;
pub(crate) mod pair_array;
pub(crate) mod vector;

pub use array::{ARRAY_HEADER_SIZE, Array};
pub use hash::{ByteMixHasher, Key, KeyHasher, Lookup};
pub use join_map::{DEFAULT_JOIN_MAP_SLOTS, JoinMap, JoinMapIter, JoinRecordList};
pub use map::{DEFAULT_MAP_SLOTS, Map, MapIter};
pub use pair_array::MIN_TABLE_SLOTS;
pub use vector::{Vector, VectorIter};
