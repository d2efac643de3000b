//! Relocatable arena object model.
//!
//! Objects live in fixed-size blocks and refer to each other by offset, so
//! the used bytes of a block can be copied into any other buffer and keep
//! working there. On top of that sit strings, growable vectors, fixed
//! arrays, an open-addressed hash map and a hash-keyed multimap, all stored
//! inside blocks.
//!
//! # Key Components
//!
//! - **Arena**: blocks, allocation policies and the [`Allocator`] context
//! - **Object model**: type descriptors, [`Handle`]s and embedded [`RelPtr`]s
//! - **Collections**: [`Vector`], [`Array`], [`Map`] and [`JoinMap`]
//! - **Records**: capture a block as bytes and re-derive its root elsewhere
//!
//! # Example
//!
//! ```ignore
//! use reloc_core::prelude::*;
//!
//! let allocator = Allocator::new(ArenaConfig::default())?;
//! let orders = allocator.make_map::<Str, u64>(16)?;
//! orders.get()?.insert("widgets", 12u64)?;
//!
//! // Ship the block as bytes and pick it up again
//! let record = Record::snapshot(&orders)?;
//! let received = Record::from_bytes(record.into_bytes())?;
//! let orders = received.root::<Map<Str, u64>>()?;
//! assert_eq!(orders.get()?.get("widgets")?, Some(12));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod collections;
pub mod error;
pub mod object;
pub mod prelude;
pub mod record;
pub mod types;

// Re-export key types at crate root for convenience
pub use arena::{AllocationPolicy, Allocator, ArenaConfig, Block, BlockScope};
pub use collections::{Array, JoinMap, Map, Vector};
pub use error::{RelocError, Result};
pub use object::{Handle, Object, ObjectView, RelPtr, Str};
pub use record::{Record, read_record_file, write_record_file};
pub use types::{ArenaOffset, BlockId, ObjectKind, TypeDescriptor};
