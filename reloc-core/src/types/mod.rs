//! Core types for the object model.
//!
//! - `BlockId`: identifier of an allocation block
//! - `ArenaOffset`: byte position in a block, and the deltas between positions
//! - `RawRelPtr`: the stored form of a relative reference
//! - `TypeDescriptor`: runtime tag driving copy/destroy/size-of of erased values

mod descriptor;
mod ids;
mod pointer;

pub use descriptor::{Constituent, EMBEDDED_SIZE, ObjectKind, TypeDescriptor};
pub use ids::BlockId;
pub use pointer::{ArenaOffset, NULL_DELTA, REL_PTR_SIZE, RawRelPtr};
