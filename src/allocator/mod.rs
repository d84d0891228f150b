//! Sub-allocation of a single device memory block.
//!
//! This module provides the `SubAllocator` contract and the two allocators
//! implementing it: a free list for general purpose blocks and a
//! single-occupant allocator for dedicated blocks.

use std::num::NonZeroU64;

use log::Level;

use crate::{error::Result, report::AllocationReport};

pub(crate) mod dedicated;
pub(crate) mod free_list;

pub(crate) use self::{dedicated::DedicatedBlockAllocator, free_list::FreeListAllocator};

/// Occupancy kind of a chunk within a block.
///
/// Linear and non-linear occupants may not share a buffer-image granularity
/// page; `Free` is an internal state and never passed into `allocate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AllocationType {
    /// Chunk is not occupied.
    Free,
    /// Buffer or linear image.
    Linear,
    /// Tiled image.
    NonLinear,
}

/// Contract shared by the allocators that manage chunks of one block.
pub(crate) trait SubAllocator {
    /// Place a chunk of `size` bytes with the given alignment.
    /// On success returns the chunk's byte offset within the block and its id.
    fn allocate(
        &mut self,
        size: u64,
        alignment: u64,
        allocation_type: AllocationType,
        granularity: u64,
        name: &str,
    ) -> Result<(u64, NonZeroU64)>;

    /// Release a chunk previously returned by `allocate`.
    fn free(&mut self, chunk_id: Option<NonZeroU64>) -> Result<()>;

    /// Change the debug name recorded for a live chunk.
    fn rename_allocation(&mut self, chunk_id: Option<NonZeroU64>, name: &str) -> Result<()>;

    /// Enumerate the live occupants of the block.
    fn report_allocations(&self) -> Vec<AllocationReport>;

    /// Emit one log record per live occupant.
    fn report_leaks(&self, log_level: Level, memory_type_index: usize, block_index: usize);

    /// Whether multiple allocations may coexist in the block.
    fn supports_general_allocations(&self) -> bool;

    /// Size of the managed block.
    fn size(&self) -> u64;

    /// Occupied bytes, including alignment padding absorbed by the chunks.
    fn allocated(&self) -> u64;

    fn available_memory(&self) -> u64 {
        self.size() - self.allocated()
    }

    fn is_empty(&self) -> bool {
        self.allocated() == 0
    }
}

/// Static dispatch over the two sub-allocator flavors.
#[derive(Debug)]
pub(crate) enum SubAllocatorKind {
    Dedicated(DedicatedBlockAllocator),
    FreeList(FreeListAllocator),
}

macro_rules! any_allocator {
    ($self:ident, $allocator:ident => $expr:expr) => {{
        match $self {
            SubAllocatorKind::Dedicated($allocator) => $expr,
            SubAllocatorKind::FreeList($allocator) => $expr,
        }
    }};
}

impl SubAllocator for SubAllocatorKind {
    fn allocate(
        &mut self,
        size: u64,
        alignment: u64,
        allocation_type: AllocationType,
        granularity: u64,
        name: &str,
    ) -> Result<(u64, NonZeroU64)> {
        any_allocator!(self, allocator => {
            allocator.allocate(size, alignment, allocation_type, granularity, name)
        })
    }

    fn free(&mut self, chunk_id: Option<NonZeroU64>) -> Result<()> {
        any_allocator!(self, allocator => allocator.free(chunk_id))
    }

    fn rename_allocation(&mut self, chunk_id: Option<NonZeroU64>, name: &str) -> Result<()> {
        any_allocator!(self, allocator => allocator.rename_allocation(chunk_id, name))
    }

    fn report_allocations(&self) -> Vec<AllocationReport> {
        any_allocator!(self, allocator => allocator.report_allocations())
    }

    fn report_leaks(&self, log_level: Level, memory_type_index: usize, block_index: usize) {
        any_allocator!(self, allocator => {
            allocator.report_leaks(log_level, memory_type_index, block_index)
        })
    }

    fn supports_general_allocations(&self) -> bool {
        any_allocator!(self, allocator => allocator.supports_general_allocations())
    }

    fn size(&self) -> u64 {
        any_allocator!(self, allocator => allocator.size())
    }

    fn allocated(&self) -> u64 {
        any_allocator!(self, allocator => allocator.allocated())
    }
}
