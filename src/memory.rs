use bitflags::bitflags;

bitflags! {
    /// Memory properties of a device memory type.
    /// Bit values mirror the Vulkan property flag assignments.
    pub struct Properties: u32 {
        /// Fastest memory for device access. Not necessarily host visible.
        const DEVICE_LOCAL = 0x1;
        /// Memory that can be mapped into host address space.
        const HOST_VISIBLE = 0x2;
        /// Host writes don't require flushing, device writes don't require invalidation.
        const HOST_COHERENT = 0x4;
        /// Host access to this memory goes through the CPU cache.
        const HOST_CACHED = 0x8;
        /// Memory that may be committed lazily by the driver.
        const LAZILY_ALLOCATED = 0x10;
    }
}

/// Memory object wrapper.
/// Contains size and properties of the memory.
#[derive(Debug)]
pub struct Memory<M> {
    raw: M,
    size: u64,
    properties: Properties,
    relevant: relevant::Relevant,
}

impl<M> Memory<M> {
    /// Create memory from a raw object.
    ///
    /// # Safety
    ///
    /// `size` and `properties` must match the object's actual allocation.
    /// The wrapper must be consumed with `into_raw` before the raw object is freed.
    pub(crate) unsafe fn from_raw(raw: M, size: u64, properties: Properties) -> Self {
        Memory {
            raw,
            size,
            properties,
            relevant: relevant::Relevant,
        }
    }

    /// Get memory properties.
    pub fn properties(&self) -> Properties {
        self.properties
    }

    /// Get memory size.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Get raw memory.
    pub fn raw(&self) -> &M {
        &self.raw
    }

    /// Unwrap raw memory.
    pub(crate) fn into_raw(self) -> M {
        self.relevant.dispose();
        self.raw
    }

    /// Check if this memory is host-visible and can be mapped.
    pub fn host_visible(&self) -> bool {
        self.properties.contains(Properties::HOST_VISIBLE)
    }
}
