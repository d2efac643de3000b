//! Locations inside blocks.

use super::block::{Block, BlockMemory};
use crate::error::{RelocError, Result};
use crate::types::{ArenaOffset, BlockId};
use std::fmt;

/// A byte position in a block, remembered together with the block's epoch
/// and the generation of the chunk it falls in.
///
/// Every typed view onto block memory is a `Place`. Access goes through
/// [`Place::read`] and [`Place::write`], which lock the block and fail with
/// `StaleReference` if the block was emptied, or the chunk freed, after the
/// place was taken.
#[derive(Clone)]
pub(crate) struct Place {
    block: Block,
    at: ArenaOffset,
    epoch: u32,
    chunk: Option<(ArenaOffset, u32)>,
}

impl Place {
    pub(crate) fn new(block: &Block, memory: &BlockMemory, at: ArenaOffset) -> Self {
        Self {
            block: block.clone(),
            at,
            epoch: memory.epoch(),
            chunk: memory.owning_chunk(at),
        }
    }

    pub(crate) fn block(&self) -> &Block {
        &self.block
    }

    pub(crate) fn block_id(&self) -> BlockId {
        self.block.id()
    }

    pub(crate) fn at(&self) -> ArenaOffset {
        self.at
    }

    /// Another place in the same block, read from `memory` while it is locked.
    pub(crate) fn moved_to(&self, memory: &BlockMemory, at: ArenaOffset) -> Self {
        Self::new(&self.block, memory, at)
    }

    pub(crate) fn is_current(&self, memory: &BlockMemory) -> bool {
        memory.epoch() == self.epoch
            && self
                .chunk
                .is_none_or(|(payload, generation)| memory.generation(payload) == Some(generation))
    }

    fn check(&self, memory: &BlockMemory) -> Result<()> {
        if self.is_current(memory) {
            Ok(())
        } else {
            Err(RelocError::StaleReference {
                block: self.block.id(),
            })
        }
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&BlockMemory, ArenaOffset) -> Result<R>) -> Result<R> {
        let memory = self.block.read();
        self.check(&memory)?;
        f(&memory, self.at)
    }

    pub(crate) fn write<R>(
        &self,
        f: impl FnOnce(&mut BlockMemory, ArenaOffset) -> Result<R>,
    ) -> Result<R> {
        let mut memory = self.block.write();
        self.check(&memory)?;
        f(&mut memory, self.at)
    }
}

impl fmt::Debug for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.block.id(), self.at)
    }
}
