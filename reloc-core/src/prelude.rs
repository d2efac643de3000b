//! Prelude for convenient imports.
//!
//! # Example
//!
//! ```ignore
//! use reloc_core::prelude::*;
//! ```

// Core types
pub use crate::types::{ArenaOffset, BlockId, ObjectKind, TypeDescriptor};

// Error handling
pub use crate::error::{RelocError, Result};

// Arena
pub use crate::arena::{AllocationPolicy, Allocator, ArenaConfig, Block, BlockScope, BlockStats};

// Object model
pub use crate::object::{Element, Handle, Object, ObjectView, Referent, RelPtr, Slot, Store, Str};

// Collections
pub use crate::collections::{
    Array, ByteMixHasher, JoinMap, JoinRecordList, Key, KeyHasher, Map, Vector,
};

// Records
pub use crate::record::{Record, read_record_file, write_record_file};
