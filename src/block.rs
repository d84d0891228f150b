use std::ptr::NonNull;

use crate::{
    allocator::{DedicatedBlockAllocator, FreeListAllocator, SubAllocatorKind},
    device::Device,
    error::Result,
    memory::{Memory, Properties},
    usage::AllocationScheme,
};

/// One device memory object paired with the sub-allocator that carves it up.
///
/// When the memory type is mappable the block keeps a persistent mapping for
/// its whole lifetime; sub-allocations derive their pointers from it.
pub(crate) struct MemoryBlock<D: Device> {
    pub(crate) memory: Memory<D::Memory>,
    pub(crate) mapped_ptr: Option<NonNull<u8>>,
    pub(crate) sub_allocator: SubAllocatorKind,
    pub(crate) is_dedicated: bool,
}

// The mapped pointer refers to driver-owned memory that stays valid for the
// lifetime of the block.
unsafe impl<D: Device> Send for MemoryBlock<D> where D::Memory: Send {}
unsafe impl<D: Device> Sync for MemoryBlock<D> where D::Memory: Sync {}

impl<D: Device> MemoryBlock<D> {
    pub(crate) fn new(
        device: &D,
        size: u64,
        memory_type_index: u32,
        properties: Properties,
        mapped: bool,
        device_address: bool,
        scheme: AllocationScheme<D::Buffer, D::Image>,
        requires_personal_block: bool,
    ) -> Result<Self> {
        let is_dedicated = scheme.is_dedicated();
        let raw = unsafe { device.allocate(memory_type_index, size, device_address, scheme) }?;
        let memory = unsafe { Memory::from_raw(raw, size, properties) };

        let mapped_ptr = if mapped {
            match unsafe { device.map(raw, size) } {
                Ok(ptr) => Some(ptr),
                Err(err) => {
                    unsafe { device.free(memory.into_raw()) };
                    return Err(err);
                }
            }
        } else {
            None
        };

        let sub_allocator = if is_dedicated || requires_personal_block {
            SubAllocatorKind::Dedicated(DedicatedBlockAllocator::new(size))
        } else {
            SubAllocatorKind::FreeList(FreeListAllocator::new(size))
        };

        Ok(MemoryBlock {
            memory,
            mapped_ptr,
            sub_allocator,
            is_dedicated,
        })
    }

    /// Pointer into the persistent mapping at `offset`, when the block is mapped.
    pub(crate) fn mapped_ptr_at(&self, offset: u64) -> Option<NonNull<u8>> {
        self.mapped_ptr.map(|ptr| {
            // Safety: offsetting within the mapped range of a non-null base.
            unsafe { NonNull::new_unchecked(ptr.as_ptr().add(offset as usize)) }
        })
    }

    pub(crate) fn destroy(self, device: &D) {
        let mapped = self.mapped_ptr.is_some();
        let raw = self.memory.into_raw();
        if mapped {
            unsafe { device.unmap(raw) };
        }
        unsafe { device.free(raw) };
    }
}
