use std::{
    collections::{HashMap, HashSet},
    num::NonZeroU64,
};

use log::{log, Level};

use crate::{
    allocator::{AllocationType, SubAllocator},
    error::{AllocationError, Result},
    report::AllocationReport,
    util::{align_down, align_up},
};

/// When set, placement scans the whole free set for the tightest hole.
/// When unset, the first viable hole wins.
const USE_BEST_FIT: bool = true;

fn is_on_same_page(offset_a: u64, size_a: u64, offset_b: u64, page_size: u64) -> bool {
    let end_a = offset_a + size_a - 1;
    let end_page_a = align_down(end_a, page_size);
    let start_page_b = align_down(offset_b, page_size);

    end_page_a == start_page_b
}

/// Occupants of differing tiling may not share a granularity page.
fn has_granularity_conflict(lhs: AllocationType, rhs: AllocationType) -> bool {
    if lhs == AllocationType::Free || rhs == AllocationType::Free {
        return false;
    }

    lhs != rhs
}

#[derive(Debug)]
pub(crate) struct MemoryChunk {
    pub(crate) chunk_id: NonZeroU64,
    pub(crate) size: u64,
    pub(crate) offset: u64,
    pub(crate) allocation_type: AllocationType,
    pub(crate) name: Option<String>,
    /// Next neighbour in offset order.
    pub(crate) next: Option<NonZeroU64>,
    /// Previous neighbour in offset order.
    pub(crate) prev: Option<NonZeroU64>,
}

/// General purpose allocator managing many chunks inside one block.
///
/// Chunks form a doubly linked list sorted by offset, addressed through ids
/// in a chunk map; the ranges of adjacent chunks are contiguous and together
/// partition the block. A claimed chunk absorbs the padding introduced by
/// alignment and granularity placement. Freed chunks coalesce with free
/// neighbours, so a maximal free run is always a single chunk.
///
/// Chunk ids start at 1 (the initial whole-block chunk) and are issued from
/// a monotonically increasing counter, never reused. Id 0 is reserved.
#[derive(Debug)]
pub(crate) struct FreeListAllocator {
    size: u64,
    allocated: u64,
    chunk_id_counter: u64,
    pub(crate) chunks: HashMap<NonZeroU64, MemoryChunk>,
    pub(crate) free_chunks: HashSet<NonZeroU64>,
}

impl FreeListAllocator {
    pub(crate) fn new(size: u64) -> Self {
        // Id 1 is the initial chunk spanning the whole block.
        let initial_chunk_id = NonZeroU64::MIN;

        let mut chunks = HashMap::new();
        chunks.insert(
            initial_chunk_id,
            MemoryChunk {
                chunk_id: initial_chunk_id,
                size,
                offset: 0,
                allocation_type: AllocationType::Free,
                name: None,
                next: None,
                prev: None,
            },
        );

        let mut free_chunks = HashSet::new();
        free_chunks.insert(initial_chunk_id);

        FreeListAllocator {
            size,
            allocated: 0,
            chunk_id_counter: 2,
            chunks,
            free_chunks,
        }
    }

    fn get_new_chunk_id(&mut self) -> Result<NonZeroU64> {
        if self.chunk_id_counter == u64::MAX {
            return Err(AllocationError::OutOfMemory);
        }

        let id = self.chunk_id_counter;
        self.chunk_id_counter += 1;
        NonZeroU64::new(id)
            .ok_or_else(|| AllocationError::Internal("new chunk id was zero, which is reserved".into()))
    }

    fn chunk(&self, chunk_id: NonZeroU64) -> Result<&MemoryChunk> {
        self.chunks
            .get(&chunk_id)
            .ok_or_else(|| AllocationError::Internal("chunk is missing from the chunk list".into()))
    }

    fn chunk_mut(&mut self, chunk_id: NonZeroU64) -> Result<&mut MemoryChunk> {
        self.chunks
            .get_mut(&chunk_id)
            .ok_or_else(|| AllocationError::Internal("chunk is missing from the chunk list".into()))
    }

    /// Merge the right chunk into the left one. The left id survives, the
    /// right chunk is dropped from the chunk map and the free set.
    fn merge_free_chunks(&mut self, chunk_left: NonZeroU64, chunk_right: NonZeroU64) -> Result<()> {
        let (right_size, right_next) = {
            let chunk = self.chunks.remove(&chunk_right).ok_or_else(|| {
                AllocationError::Internal("chunk expected in the chunk list".into())
            })?;
            if !self.free_chunks.remove(&chunk.chunk_id) {
                return Err(AllocationError::Internal(
                    "chunk expected in the free set".into(),
                ));
            }
            (chunk.size, chunk.next)
        };

        let left = self.chunk_mut(chunk_left)?;
        left.next = right_next;
        left.size += right_size;

        if let Some(right_next) = right_next {
            self.chunk_mut(right_next)?.prev = Some(chunk_left);
        }

        Ok(())
    }
}

impl SubAllocator for FreeListAllocator {
    fn allocate(
        &mut self,
        size: u64,
        alignment: u64,
        allocation_type: AllocationType,
        granularity: u64,
        name: &str,
    ) -> Result<(u64, NonZeroU64)> {
        if allocation_type == AllocationType::Free {
            return Err(AllocationError::Internal(
                "allocate may not be called with AllocationType::Free".into(),
            ));
        }

        let free_size = self.size - self.allocated;
        if size > free_size {
            return Err(AllocationError::OutOfMemory);
        }

        let mut best_fit_id = None;
        let mut best_chunk_size = 0u64;
        let mut best_offset = 0u64;
        let mut best_aligned_size = 0u64;

        for &chunk_id in self.free_chunks.iter() {
            let chunk = self.chunk(chunk_id)?;
            if chunk.size < size {
                continue;
            }

            let mut offset = align_up(chunk.offset, alignment);

            // When the previous occupant ends on the page we'd start on and
            // its tiling conflicts, start on the next granularity page instead.
            if let Some(prev_id) = chunk.prev {
                let previous = self.chunk(prev_id)?;
                if is_on_same_page(previous.offset, previous.size, offset, granularity)
                    && has_granularity_conflict(previous.allocation_type, allocation_type)
                {
                    offset = align_up(offset, granularity);
                }
            }

            let padding = offset - chunk.offset;
            let aligned_size = padding + size;
            if aligned_size > chunk.size {
                continue;
            }

            // A conflicting next occupant starting on our last page makes this
            // chunk unusable; it is too tight to shift within.
            if let Some(next_id) = chunk.next {
                let next = self.chunk(next_id)?;
                if is_on_same_page(offset, size, next.offset, granularity)
                    && has_granularity_conflict(allocation_type, next.allocation_type)
                {
                    continue;
                }
            }

            if USE_BEST_FIT {
                if best_fit_id.is_none() || chunk.size < best_chunk_size {
                    best_fit_id = Some(chunk_id);
                    best_chunk_size = chunk.size;
                    best_offset = offset;
                    best_aligned_size = aligned_size;
                }
            } else {
                best_fit_id = Some(chunk_id);
                best_chunk_size = chunk.size;
                best_offset = offset;
                best_aligned_size = aligned_size;
                break;
            }
        }

        let first_fit_id = best_fit_id.ok_or(AllocationError::OutOfMemory)?;

        let chunk_id = if best_chunk_size > best_aligned_size {
            // Split: a fresh chunk claims the low half, the original chunk
            // stays in the free set as the trailing remainder.
            let new_chunk_id = self.get_new_chunk_id()?;

            let (new_offset, new_prev) = {
                let free_chunk = self.chunk_mut(first_fit_id)?;
                let offset = free_chunk.offset;
                let prev = free_chunk.prev;
                free_chunk.prev = Some(new_chunk_id);
                free_chunk.offset += best_aligned_size;
                free_chunk.size -= best_aligned_size;
                (offset, prev)
            };

            if let Some(prev_id) = new_prev {
                self.chunk_mut(prev_id)?.next = Some(new_chunk_id);
            }

            self.chunks.insert(
                new_chunk_id,
                MemoryChunk {
                    chunk_id: new_chunk_id,
                    size: best_aligned_size,
                    offset: new_offset,
                    allocation_type,
                    name: Some(name.to_string()),
                    next: Some(first_fit_id),
                    prev: new_prev,
                },
            );

            new_chunk_id
        } else {
            // Exact fit; claim the free chunk itself.
            let chunk = self.chunk_mut(first_fit_id)?;
            chunk.allocation_type = allocation_type;
            chunk.name = Some(name.to_string());
            self.free_chunks.remove(&first_fit_id);

            first_fit_id
        };

        self.allocated += best_aligned_size;

        Ok((best_offset, chunk_id))
    }

    fn free(&mut self, chunk_id: Option<NonZeroU64>) -> Result<()> {
        let chunk_id = chunk_id
            .ok_or_else(|| AllocationError::Internal("chunk id must be a valid value".into()))?;

        let (next_id, prev_id) = {
            let chunk = self.chunks.get_mut(&chunk_id).ok_or_else(|| {
                AllocationError::Internal("attempted to free an unknown chunk".into())
            })?;
            if chunk.allocation_type == AllocationType::Free {
                return Err(AllocationError::Internal(
                    "attempted to free an already free chunk".into(),
                ));
            }

            chunk.allocation_type = AllocationType::Free;
            chunk.name = None;
            self.allocated -= chunk.size;

            (chunk.next, chunk.prev)
        };

        self.free_chunks.insert(chunk_id);

        // Coalesce with the right neighbour first so the left id survives
        // both merges.
        if let Some(next_id) = next_id {
            if self.chunk(next_id)?.allocation_type == AllocationType::Free {
                self.merge_free_chunks(chunk_id, next_id)?;
            }
        }

        if let Some(prev_id) = prev_id {
            if self.chunk(prev_id)?.allocation_type == AllocationType::Free {
                self.merge_free_chunks(prev_id, chunk_id)?;
            }
        }

        Ok(())
    }

    fn rename_allocation(&mut self, chunk_id: Option<NonZeroU64>, name: &str) -> Result<()> {
        let chunk_id = chunk_id
            .ok_or_else(|| AllocationError::Internal("chunk id must be a valid value".into()))?;

        let chunk = self.chunks.get_mut(&chunk_id).ok_or_else(|| {
            AllocationError::Internal("attempted to rename an unknown chunk".into())
        })?;
        if chunk.allocation_type == AllocationType::Free {
            return Err(AllocationError::Internal(
                "attempted to rename a free chunk".into(),
            ));
        }

        chunk.name = Some(name.to_string());
        Ok(())
    }

    fn report_allocations(&self) -> Vec<AllocationReport> {
        self.chunks
            .values()
            .filter(|chunk| chunk.allocation_type != AllocationType::Free)
            .map(|chunk| AllocationReport {
                name: chunk
                    .name
                    .clone()
                    .unwrap_or_else(|| "<unnamed>".to_owned()),
                offset: chunk.offset,
                size: chunk.size,
            })
            .collect()
    }

    fn report_leaks(&self, log_level: Level, memory_type_index: usize, block_index: usize) {
        for (chunk_id, chunk) in self.chunks.iter() {
            if chunk.allocation_type == AllocationType::Free {
                continue;
            }

            let name = chunk.name.as_deref().unwrap_or("<unnamed>");
            log!(
                log_level,
                "leak detected: {{ memory type: {}, memory block: {}, chunk: {{ chunk_id: 0x{:x}, size: 0x{:x}, offset: 0x{:x}, allocation_type: {:?}, name: {} }} }}",
                memory_type_index,
                block_index,
                chunk_id,
                chunk.size,
                chunk.offset,
                chunk.allocation_type,
                name,
            );
        }
    }

    fn supports_general_allocations(&self) -> bool {
        true
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn allocated(&self) -> u64 {
        self.allocated
    }
}
