//! Block slots, their contents, and the chains that link them into files.
//!
//! Every block position has a [BlockSlot] that says whether it is free, part of a file's chain or
//! covered by the metadata region of the image. Chains are singly linked through
//! [BlockSlot::Used::next] and always end in `None`.
//!
//! The pool does not know which file owns a chain. Callers are responsible for only extending the
//! chains they own and for freeing each chain exactly once.
use crate::geometry::{BlockIndex, Geometry};
use thiserror::Error;

/// Errors returned by the allocator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// Every block is in use
    #[error("No free blocks left")]
    OutOfSpace,
    /// The block does not exist or is not part of a chain
    #[error("Block {0} is not part of a chain")]
    NotInChain(BlockIndex),
}

/// State of a single block position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockSlot {
    /// Available to the allocator
    #[default]
    Free,
    /// Part of a chain, `next` is the successor in that chain
    Used { next: Option<BlockIndex> },
    /// Covered by the metadata region of the image
    Reserved,
}

impl BlockSlot {
    pub fn is_free(&self) -> bool {
        matches!(self, BlockSlot::Free)
    }
}

/// Block slots and block contents of a volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPool {
    block_size: usize,
    slots: Vec<BlockSlot>,
    data: Vec<u8>,
}

impl BlockPool {
    /// A pool where every block is free and zeroed
    pub fn new(geometry: &Geometry) -> Self {
        let blocks = geometry.max_blocks() as usize;
        let block_size = geometry.block_size() as usize;
        BlockPool {
            block_size,
            slots: vec![BlockSlot::Free; blocks],
            data: vec![0; blocks * block_size],
        }
    }

    pub(crate) fn from_parts(block_size: usize, slots: Vec<BlockSlot>, data: Vec<u8>) -> Self {
        debug_assert_eq!(slots.len() * block_size, data.len());
        BlockPool {
            block_size,
            slots,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn slots(&self) -> &[BlockSlot] {
        &self.slots
    }

    pub fn slot(&self, index: BlockIndex) -> Option<BlockSlot> {
        self.slots.get(index as usize).copied()
    }

    /// Content of a block
    ///
    /// Panics if the index is out of range.
    pub fn block(&self, index: BlockIndex) -> &[u8] {
        let start = index as usize * self.block_size;
        &self.data[start..start + self.block_size]
    }

    pub(crate) fn block_mut(&mut self, index: BlockIndex) -> &mut [u8] {
        let start = index as usize * self.block_size;
        &mut self.data[start..start + self.block_size]
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of blocks the allocator can still hand out
    pub fn free_blocks(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_free()).count()
    }

    /// Mark the first `count` blocks as reserved for metadata
    pub fn reserve_prefix(&mut self, count: u32) {
        for index in 0..(count as usize).min(self.slots.len()) {
            self.slots[index] = BlockSlot::Reserved;
            self.block_mut(index as BlockIndex).fill(0);
        }
    }

    /// Index of the first free block
    pub fn next_free_block(&self) -> Option<BlockIndex> {
        self.slots
            .iter()
            .position(BlockSlot::is_free)
            .map(|index| index as BlockIndex)
    }

    /// Claim the first free block as the end of a new chain
    pub fn allocate(&mut self) -> Result<BlockIndex, AllocationError> {
        let index = self.next_free_block().ok_or(AllocationError::OutOfSpace)?;
        self.slots[index as usize] = BlockSlot::Used { next: None };
        self.block_mut(index).fill(0);
        log::debug!("Allocated block {}", index);
        Ok(index)
    }

    /// Successor of `current`, allocating and linking a new block if there is none yet
    ///
    /// Nothing is allocated if the pool is out of space.
    pub fn ensure_next(&mut self, current: BlockIndex) -> Result<BlockIndex, AllocationError> {
        let Some(BlockSlot::Used { next }) = self.slot(current) else {
            return Err(AllocationError::NotInChain(current));
        };
        if let Some(next) = next {
            return Ok(next);
        }
        let next = self.allocate()?;
        self.slots[current as usize] = BlockSlot::Used { next: Some(next) };
        Ok(next)
    }

    /// Iterate over an existing chain without allocating
    ///
    /// Iteration stops early if the chain leaves the pool, runs into a block that is not in use or
    /// is longer than the pool itself, so it terminates even on a corrupt table.
    pub fn chain(&self, first: Option<BlockIndex>) -> Chain<'_> {
        Chain {
            pool: self,
            current: first,
            remaining: self.slots.len(),
        }
    }

    /// Return every block of a chain to the pool
    ///
    /// Returns the number of freed blocks.
    pub fn free_chain(&mut self, first: Option<BlockIndex>) -> usize {
        let mut freed = 0;
        let mut current = first;
        while let Some(index) = current {
            let Some(BlockSlot::Used { next }) = self.slot(index) else {
                break;
            };
            self.slots[index as usize] = BlockSlot::Free;
            self.block_mut(index).fill(0);
            freed += 1;
            current = next;
        }
        log::debug!("Freed {} blocks", freed);
        freed
    }
}

/// Iterator over the block indices of a chain
pub struct Chain<'a> {
    pool: &'a BlockPool,
    current: Option<BlockIndex>,
    remaining: usize,
}

impl Iterator for Chain<'_> {
    type Item = BlockIndex;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.current?;
        if self.remaining == 0 {
            self.current = None;
            return None;
        }
        let Some(BlockSlot::Used { next }) = self.pool.slot(index) else {
            self.current = None;
            return None;
        };
        self.remaining -= 1;
        self.current = next;
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(blocks: u32) -> BlockPool {
        BlockPool::new(&Geometry::new(4, blocks, 8).unwrap())
    }

    #[test]
    fn next_free_block_returns_the_lowest_free_index() {
        let mut pool = pool(4);
        assert_eq!(pool.next_free_block(), Some(0));
        pool.allocate().unwrap();
        pool.allocate().unwrap();
        assert_eq!(pool.next_free_block(), Some(2));
    }

    #[test]
    fn reserved_blocks_are_never_allocated() {
        let mut pool = pool(4);
        pool.reserve_prefix(3);
        assert_eq!(pool.allocate(), Ok(3));
        assert_eq!(pool.allocate(), Err(AllocationError::OutOfSpace));
    }

    #[test]
    fn ensure_next_links_a_new_block() {
        let mut pool = pool(4);
        let first = pool.allocate().unwrap();
        let second = pool.ensure_next(first).unwrap();
        assert_eq!(pool.slot(first), Some(BlockSlot::Used { next: Some(second) }));
        assert_eq!(pool.slot(second), Some(BlockSlot::Used { next: None }));
        // Asking again returns the existing successor
        assert_eq!(pool.ensure_next(first), Ok(second));
        assert_eq!(pool.free_blocks(), 2);
    }

    #[test]
    fn ensure_next_does_not_allocate_when_out_of_space() {
        let mut pool = pool(2);
        let first = pool.allocate().unwrap();
        pool.ensure_next(first).unwrap();
        let last = pool.chain(Some(first)).last().unwrap();
        let before = pool.clone();
        assert_eq!(pool.ensure_next(last), Err(AllocationError::OutOfSpace));
        assert_eq!(pool, before);
    }

    #[test]
    fn ensure_next_rejects_blocks_outside_a_chain() {
        let mut pool = pool(2);
        assert_eq!(pool.ensure_next(0), Err(AllocationError::NotInChain(0)));
        assert_eq!(pool.ensure_next(7), Err(AllocationError::NotInChain(7)));
    }

    #[test]
    fn newly_allocated_blocks_are_zeroed() {
        let mut pool = pool(2);
        let first = pool.allocate().unwrap();
        pool.block_mut(first).fill(b'x');
        pool.free_chain(Some(first));
        let again = pool.allocate().unwrap();
        assert_eq!(again, first);
        assert!(pool.block(again).iter().all(|&byte| byte == 0));
    }

    #[test]
    fn freeing_a_chain_returns_every_block() {
        let mut pool = pool(4);
        let first = pool.allocate().unwrap();
        let second = pool.ensure_next(first).unwrap();
        let third = pool.ensure_next(second).unwrap();
        assert_eq!(
            pool.chain(Some(first)).collect::<Vec<_>>(),
            vec![first, second, third]
        );

        assert_eq!(pool.free_chain(Some(first)), 3);
        assert_eq!(pool.free_blocks(), 4);
        assert!(pool.slots().iter().all(|slot| *slot == BlockSlot::Free));
    }

    #[test]
    fn chain_iteration_terminates_on_cycles() {
        let mut pool = pool(3);
        pool.slots[0] = BlockSlot::Used { next: Some(1) };
        pool.slots[1] = BlockSlot::Used { next: Some(0) };
        assert_eq!(pool.chain(Some(0)).count(), 3);
        assert_eq!(pool.chain(None).count(), 0);
    }
}
