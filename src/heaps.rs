use std::{num::NonZeroU64, ptr::NonNull};

use log::{debug, warn, Level};

use crate::{
    allocator::{AllocationType, SubAllocator},
    block::MemoryBlock,
    device::Device,
    error::{AllocationError, Result},
    memory::Properties,
    report::{HeapsReport, MemoryBlockReport},
    usage::{AllocationScheme, MemoryLocation, MemoryRequirements},
};

const MIN_MEMBLOCK_SIZE: u64 = 4 * 1024 * 1024;
const MAX_MEMBLOCK_SIZE: u64 = 256 * 1024 * 1024;

/// Sizes of the memory blocks opened for general purpose sub-allocation.
///
/// Sizes are clamped to `[4 MiB, 256 MiB]` and rounded up to the next 4 MiB
/// boundary. The host size is used for host-visible memory types, the device
/// size for everything else.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AllocationSizes {
    device_memblock_size: u64,
    host_memblock_size: u64,
}

impl AllocationSizes {
    pub fn new(device_memblock_size: u64, host_memblock_size: u64) -> Self {
        AllocationSizes {
            device_memblock_size: Self::adjust_memblock_size(device_memblock_size, "device"),
            host_memblock_size: Self::adjust_memblock_size(host_memblock_size, "host"),
        }
    }

    fn adjust_memblock_size(size: u64, kind: &str) -> u64 {
        let size = size.clamp(MIN_MEMBLOCK_SIZE, MAX_MEMBLOCK_SIZE);
        if size % MIN_MEMBLOCK_SIZE == 0 {
            return size;
        }

        let adjusted = size - size % MIN_MEMBLOCK_SIZE + MIN_MEMBLOCK_SIZE;
        warn!(
            "{} memory block size must be a multiple of 4 MiB, rounding up to {} MiB",
            kind,
            adjusted / (1024 * 1024)
        );
        adjusted
    }

    pub(crate) fn memblock_size(&self, host_visible: bool) -> u64 {
        if host_visible {
            self.host_memblock_size
        } else {
            self.device_memblock_size
        }
    }
}

impl Default for AllocationSizes {
    fn default() -> Self {
        AllocationSizes {
            device_memblock_size: 256 * 1024 * 1024,
            host_memblock_size: 64 * 1024 * 1024,
        }
    }
}

/// Flags gating the allocator's debug log output.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DebugSettings {
    /// Log the device's memory types and heaps during construction.
    pub log_memory_information: bool,
    /// Report every live allocation at `Warn` level when the heaps are torn down.
    pub log_leaks_on_shutdown: bool,
    /// Log every allocation as it is made. Spammy, off by default.
    pub log_allocations: bool,
    /// Log every free. Spammy, off by default.
    pub log_frees: bool,
}

impl Default for DebugSettings {
    fn default() -> Self {
        DebugSettings {
            log_memory_information: false,
            log_leaks_on_shutdown: true,
            log_allocations: false,
            log_frees: false,
        }
    }
}

/// Config for `Heaps`.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeapsConfig {
    /// Request device addresses for every memory object.
    pub buffer_device_address: bool,
    pub debug_settings: DebugSettings,
    pub allocation_sizes: AllocationSizes,
}

/// Description of one allocation request.
#[derive(Clone, Copy, Debug)]
pub struct AllocationCreateDesc<'a, B, I> {
    /// Name used for debug logging and reports.
    pub name: &'a str,
    /// Size, alignment and memory type mask reported by the driver for the resource.
    pub requirements: MemoryRequirements,
    /// Where the allocation should live.
    pub location: MemoryLocation,
    /// True for buffers and linear images, false for tiled images.
    pub linear: bool,
    /// Whether the resource gets its own dedicated memory object.
    pub scheme: AllocationScheme<B, I>,
}

/// Handle to a sub-allocated memory region, returned by [`Heaps::allocate`].
///
/// Must be handed back through [`Heaps::free`] before the heaps are torn
/// down; anything still live at teardown is reported as a leak.
#[derive(Debug)]
pub struct Allocation<M> {
    pub(crate) chunk_id: Option<NonZeroU64>,
    pub(crate) offset: u64,
    pub(crate) size: u64,
    pub(crate) memory_block_index: usize,
    pub(crate) memory_type_index: usize,
    pub(crate) device_memory: M,
    pub(crate) mapped_ptr: Option<NonNull<u8>>,
    pub(crate) properties: Properties,
    pub(crate) dedicated: bool,
    pub(crate) name: Option<String>,
}

// The mapped pointer refers to driver-owned memory that stays valid until
// the owning block is destroyed.
unsafe impl<M: Send> Send for Allocation<M> {}
unsafe impl<M: Sync> Sync for Allocation<M> {}

impl<M: Copy> Allocation<M> {
    /// The raw memory object backing this allocation.
    ///
    /// # Safety
    ///
    /// The object is shared with other allocations. It may be used for
    /// binding together with [`Allocation::offset`], but must not be freed,
    /// mapped or sub-allocated behind the allocator's back.
    pub unsafe fn memory(&self) -> M {
        self.device_memory
    }
}

impl<M> Allocation<M> {
    /// Byte offset of the allocation within its memory object.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of the allocation in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether this allocation owns its memory object.
    pub fn is_dedicated(&self) -> bool {
        self.dedicated
    }

    /// A null allocation holds no memory; freeing it is a no-op.
    pub fn is_null(&self) -> bool {
        self.chunk_id.is_none()
    }

    /// Properties of the memory type the allocation lives in.
    pub fn properties(&self) -> Properties {
        self.properties
    }

    /// Name recorded for the allocation.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Pointer to the allocation's memory, when it is host-visible.
    /// Already adjusted to the sub-region; no offset needs to be applied.
    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.mapped_ptr
    }

    /// Byte view of the allocation's memory, when it is host-visible.
    pub fn mapped_slice(&self) -> Option<&[u8]> {
        self.mapped_ptr.map(|ptr| {
            // Safety: the mapping covers [offset, offset + size) of a live block.
            unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.size as usize) }
        })
    }

    /// Mutable byte view of the allocation's memory, when it is host-visible.
    pub fn mapped_slice_mut(&mut self) -> Option<&mut [u8]> {
        self.mapped_ptr.map(|ptr| {
            // Safety: the mapping covers [offset, offset + size) of a live block,
            // borrowed uniquely through the allocation handle.
            unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.size as usize) }
        })
    }
}

impl<M: Default> Default for Allocation<M> {
    fn default() -> Self {
        Allocation {
            chunk_id: None,
            offset: 0,
            size: 0,
            memory_block_index: !0,
            memory_type_index: !0,
            device_memory: M::default(),
            mapped_ptr: None,
            properties: Properties::empty(),
            dedicated: false,
            name: None,
        }
    }
}

struct MemoryHeap {
    size: u64,
}

struct MemoryType<D: Device> {
    memory_blocks: Vec<Option<MemoryBlock<D>>>,
    properties: Properties,
    memory_type_index: usize,
    heap_index: usize,
    mappable: bool,
    buffer_device_address: bool,
    active_general_blocks: usize,
}

impl<D: Device> MemoryType<D> {
    fn allocate(
        &mut self,
        device: &D,
        desc: &AllocationCreateDesc<'_, D::Buffer, D::Image>,
        granularity: u64,
        allocation_sizes: &AllocationSizes,
    ) -> Result<Allocation<D::Memory>> {
        let allocation_type = if desc.linear {
            AllocationType::Linear
        } else {
            AllocationType::NonLinear
        };

        let memblock_size = allocation_sizes.memblock_size(self.mappable);
        let size = desc.requirements.size;
        let alignment = desc.requirements.alignment;

        let dedicated = desc.scheme.is_dedicated();
        let requires_personal_block = size > memblock_size;

        // Dedicated and oversized requests get their own exactly sized block.
        if dedicated || requires_personal_block {
            let mem_block = MemoryBlock::new(
                device,
                size,
                self.memory_type_index as u32,
                self.properties,
                self.mappable,
                self.buffer_device_address,
                desc.scheme,
                requires_personal_block,
            )?;

            let block_index = self.memory_blocks.iter().position(Option::is_none);
            let block_index = match block_index {
                Some(i) => {
                    self.memory_blocks[i] = Some(mem_block);
                    i
                }
                None => {
                    self.memory_blocks.push(Some(mem_block));
                    self.memory_blocks.len() - 1
                }
            };

            let mem_block = self.memory_blocks[block_index]
                .as_mut()
                .ok_or_else(|| AllocationError::Internal("memory block must be Some".into()))?;

            let (offset, chunk_id) = mem_block.sub_allocator.allocate(
                size,
                alignment,
                allocation_type,
                granularity,
                desc.name,
            )?;

            return Ok(Allocation {
                chunk_id: Some(chunk_id),
                offset,
                size,
                memory_block_index: block_index,
                memory_type_index: self.memory_type_index,
                device_memory: *mem_block.memory.raw(),
                mapped_ptr: mem_block.mapped_ptr_at(offset),
                properties: self.properties,
                dedicated,
                name: Some(desc.name.to_owned()),
            });
        }

        // Walk existing blocks newest first; bursts of same-sized requests
        // tend to land in the most recently opened block.
        let mut empty_block_index = None;
        for (mem_block_i, mem_block) in self.memory_blocks.iter_mut().enumerate().rev() {
            if let Some(mem_block) = mem_block {
                let allocation = mem_block.sub_allocator.allocate(
                    size,
                    alignment,
                    allocation_type,
                    granularity,
                    desc.name,
                );

                match allocation {
                    Ok((offset, chunk_id)) => {
                        return Ok(Allocation {
                            chunk_id: Some(chunk_id),
                            offset,
                            size,
                            memory_block_index: mem_block_i,
                            memory_type_index: self.memory_type_index,
                            device_memory: *mem_block.memory.raw(),
                            mapped_ptr: mem_block.mapped_ptr_at(offset),
                            properties: self.properties,
                            dedicated: false,
                            name: Some(desc.name.to_owned()),
                        });
                    }
                    // Block is full; continue the search.
                    Err(AllocationError::OutOfMemory) => {}
                    Err(err) => return Err(err),
                }
            } else {
                // The walk runs from the top down, so the lowest absent slot
                // ends up as the reuse candidate.
                empty_block_index = Some(mem_block_i);
            }
        }

        let new_memory_block = MemoryBlock::new(
            device,
            memblock_size,
            self.memory_type_index as u32,
            self.properties,
            self.mappable,
            self.buffer_device_address,
            AllocationScheme::Managed,
            false,
        )?;

        let new_block_index = match empty_block_index {
            Some(i) => {
                self.memory_blocks[i] = Some(new_memory_block);
                i
            }
            None => {
                self.memory_blocks.push(Some(new_memory_block));
                self.memory_blocks.len() - 1
            }
        };

        self.active_general_blocks += 1;

        let mem_block = self.memory_blocks[new_block_index]
            .as_mut()
            .ok_or_else(|| AllocationError::Internal("memory block must be Some".into()))?;

        let (offset, chunk_id) = match mem_block.sub_allocator.allocate(
            size,
            alignment,
            allocation_type,
            granularity,
            desc.name,
        ) {
            Ok(value) => value,
            Err(AllocationError::OutOfMemory) => {
                return Err(AllocationError::Internal(
                    "allocation that must succeed failed; this is a bug in the sub-allocator"
                        .into(),
                ));
            }
            Err(err) => return Err(err),
        };

        Ok(Allocation {
            chunk_id: Some(chunk_id),
            offset,
            size,
            memory_block_index: new_block_index,
            memory_type_index: self.memory_type_index,
            device_memory: *mem_block.memory.raw(),
            mapped_ptr: mem_block.mapped_ptr_at(offset),
            properties: self.properties,
            dedicated: false,
            name: Some(desc.name.to_owned()),
        })
    }

    fn free(&mut self, allocation: Allocation<D::Memory>, device: &D) -> Result<()> {
        let block_index = allocation.memory_block_index;

        let mem_block = self.memory_blocks[block_index]
            .as_mut()
            .ok_or_else(|| AllocationError::Internal("memory block must be Some".into()))?;

        mem_block.sub_allocator.free(allocation.chunk_id)?;

        if mem_block.sub_allocator.is_empty() {
            if mem_block.sub_allocator.supports_general_allocations() {
                // Keep one warm general block per type so bursts don't
                // oscillate between allocating and freeing device memory.
                if self.active_general_blocks > 1 {
                    self.destroy_block(device, block_index)?;
                    self.active_general_blocks -= 1;
                }
            } else {
                self.destroy_block(device, block_index)?;
            }
        }

        Ok(())
    }

    fn destroy_block(&mut self, device: &D, block_index: usize) -> Result<()> {
        let block = self.memory_blocks[block_index]
            .take()
            .ok_or_else(|| AllocationError::Internal("memory block must be Some".into()))?;
        block.destroy(device);
        Ok(())
    }
}

/// Sub-allocating memory heaps of one logical device.
///
/// Owns every memory block it opens; callers hold [`Allocation`] values and
/// must return them through [`Heaps::free`]. Not internally synchronized;
/// the owner serializes access.
pub struct Heaps<D: Device> {
    device: D,
    memory_types: Vec<MemoryType<D>>,
    memory_heaps: Vec<MemoryHeap>,
    buffer_image_granularity: u64,
    debug_settings: DebugSettings,
    allocation_sizes: AllocationSizes,
}

impl<D: Device> Heaps<D> {
    /// Build heaps from device-reported memory types `(properties, heap
    /// index)` and heap sizes.
    ///
    /// # Safety
    ///
    /// `types`, `heaps` and `buffer_image_granularity` must describe the
    /// physical device that `device` was created from.
    pub unsafe fn new<P, H>(
        device: D,
        types: P,
        heaps: H,
        buffer_image_granularity: u64,
        config: HeapsConfig,
    ) -> Self
    where
        P: IntoIterator<Item = (Properties, u32)>,
        H: IntoIterator<Item = u64>,
    {
        Heaps {
            memory_types: types
                .into_iter()
                .enumerate()
                .map(|(index, (properties, heap_index))| MemoryType {
                    memory_blocks: Vec::default(),
                    properties,
                    memory_type_index: index,
                    heap_index: heap_index as usize,
                    mappable: properties.contains(Properties::HOST_VISIBLE),
                    buffer_device_address: config.buffer_device_address,
                    active_general_blocks: 0,
                })
                .collect(),
            memory_heaps: heaps
                .into_iter()
                .map(|size| MemoryHeap { size })
                .collect(),
            device,
            buffer_image_granularity,
            debug_settings: config.debug_settings,
            allocation_sizes: config.allocation_sizes,
        }
    }

    /// Allocate memory for a resource.
    pub fn allocate(
        &mut self,
        desc: &AllocationCreateDesc<'_, D::Buffer, D::Image>,
    ) -> Result<Allocation<D::Memory>> {
        let size = desc.requirements.size;
        let alignment = desc.requirements.alignment;

        if self.debug_settings.log_allocations {
            debug!(
                "Allocating `{}` of {} bytes with an alignment of {}.",
                desc.name, size, alignment
            );
        }

        if size == 0 || !alignment.is_power_of_two() {
            return Err(AllocationError::InvalidAllocationCreateDesc);
        }

        let memory_type_bits = desc.requirements.memory_type_bits;
        let memory_type_index = self
            .find_memory_type_index(memory_type_bits, desc.location.preferred_properties())
            .or_else(|| {
                self.find_memory_type_index(memory_type_bits, desc.location.required_properties())
            })
            .ok_or(AllocationError::NoCompatibleMemoryTypeFound)?;

        // Refuse requests that could never fit the backing heap.
        if size > self.memory_heaps[self.memory_types[memory_type_index].heap_index].size {
            return Err(AllocationError::OutOfMemory);
        }

        let allocation = self.memory_types[memory_type_index].allocate(
            &self.device,
            desc,
            self.buffer_image_granularity,
            &self.allocation_sizes,
        );

        if desc.location == MemoryLocation::CpuToGpu && allocation.is_err() {
            // DEVICE_LOCAL | HOST_VISIBLE heaps tend to be tiny; retry once
            // against plain host memory.
            let fallback_properties = Properties::HOST_VISIBLE | Properties::HOST_COHERENT;
            let memory_type_index = self
                .find_memory_type_index(memory_type_bits, fallback_properties)
                .ok_or(AllocationError::NoCompatibleMemoryTypeFound)?;

            self.memory_types[memory_type_index].allocate(
                &self.device,
                desc,
                self.buffer_image_granularity,
                &self.allocation_sizes,
            )
        } else {
            allocation
        }
    }

    /// First memory type, in driver order, whose bit is set in
    /// `memory_type_bits` and whose properties are a superset of `properties`.
    fn find_memory_type_index(
        &self,
        memory_type_bits: u32,
        properties: Properties,
    ) -> Option<usize> {
        self.memory_types.iter().position(|memory_type| {
            (1 << memory_type.memory_type_index) & memory_type_bits != 0
                && memory_type.properties.contains(properties)
        })
    }

    /// Free an allocation. Null allocations are accepted and ignored.
    pub fn free(&mut self, allocation: Allocation<D::Memory>) -> Result<()> {
        if self.debug_settings.log_frees {
            let name = allocation.name.as_deref().unwrap_or("<unnamed>");
            debug!("Freeing `{}`.", name);
        }

        if allocation.is_null() {
            return Ok(());
        }

        self.memory_types[allocation.memory_type_index].free(allocation, &self.device)
    }

    /// Change the name recorded for a live allocation.
    pub fn rename_allocation(
        &mut self,
        allocation: &mut Allocation<D::Memory>,
        name: &str,
    ) -> Result<()> {
        if allocation.is_null() {
            return Err(AllocationError::Internal(
                "tried to rename a null allocation".into(),
            ));
        }

        allocation.name = Some(name.to_owned());

        let mem_block = self.memory_types[allocation.memory_type_index].memory_blocks
            [allocation.memory_block_index]
            .as_mut()
            .ok_or_else(|| AllocationError::Internal("memory block must be Some".into()))?;

        mem_block
            .sub_allocator
            .rename_allocation(allocation.chunk_id, name)
    }

    /// Snapshot of all live allocations and present blocks.
    pub fn report(&self) -> HeapsReport {
        let mut allocations = Vec::new();
        let mut blocks = Vec::new();
        let mut total_reserved_bytes = 0;

        for memory_type in &self.memory_types {
            for block in memory_type.memory_blocks.iter().flatten() {
                total_reserved_bytes += block.memory.size();
                let first = allocations.len();
                allocations.extend(block.sub_allocator.report_allocations());
                blocks.push(MemoryBlockReport {
                    size: block.memory.size(),
                    allocations: first..allocations.len(),
                });
            }
        }

        let total_allocated_bytes = allocations.iter().map(|report| report.size).sum();

        HeapsReport {
            allocations,
            blocks,
            total_allocated_bytes,
            total_reserved_bytes,
        }
    }

    /// Emit one log record for every live allocation.
    pub fn report_leaks(&self, log_level: Level) {
        for (memory_type_i, memory_type) in self.memory_types.iter().enumerate() {
            for (block_i, block) in memory_type.memory_blocks.iter().enumerate() {
                if let Some(block) = block {
                    block
                        .sub_allocator
                        .report_leaks(log_level, memory_type_i, block_i);
                }
            }
        }
    }

    /// Tear the heaps down, releasing every remaining memory block.
    ///
    /// Live allocations are reported as leaks first when
    /// `log_leaks_on_shutdown` is set. Dropping the heaps has the same
    /// effect; this method only makes the teardown point explicit.
    pub fn dispose(self) {}
}

impl<D: Device> Drop for Heaps<D> {
    fn drop(&mut self) {
        if self.debug_settings.log_leaks_on_shutdown {
            self.report_leaks(Level::Warn);
        }

        for memory_type in self.memory_types.iter_mut() {
            for block in memory_type.memory_blocks.iter_mut() {
                if let Some(block) = block.take() {
                    block.destroy(&self.device);
                }
            }
        }
    }
}
