//! Blocks and the allocator that fills them.
//!
//! A block is a fixed-size byte buffer filled by a bump cursor. Objects are
//! chunks inside it and refer to each other by offset, which makes the used
//! prefix of a block relocatable as plain bytes.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (32 bytes, written only when the block is captured)   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Chunk: [size: u32][refcount: u32][payload, 8-aligned]        │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Chunk: ...                                                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Free space up to capacity                                    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Blocks never grow. When one is full, allocation fails with
//! `NotEnoughSpace` and the caller moves on to a new block through the
//! [`Allocator`].

pub(crate) mod allocation;
mod allocator;
mod block;
mod config;
mod header;
mod place;

pub use allocation::{CHUNK_ALIGNMENT, CHUNK_PREAMBLE};
pub use allocator::{Allocator, BlockScope};
pub use block::{Block, BlockMemory, BlockStats};
pub use config::{AllocationPolicy, ArenaConfig, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
pub use header::{BLOCK_HEADER_SIZE, BLOCK_MAGIC, BLOCK_VERSION, BlockHeader, FLAG_PINNED};

pub(crate) use block::WeakBlock;
pub(crate) use place::Place;
