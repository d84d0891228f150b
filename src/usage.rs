//! Caller-facing vocabulary for placing allocations.

use crate::memory::Properties;

/// Hint on where an allocation should live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Let the driver decide; no property preference at all.
    Unknown,
    /// GPU-only accessible memory. The fastest choice, and where most
    /// allocations should live.
    GpuOnly,
    /// Memory for uploading data to the GPU: staging buffers, frequently
    /// rewritten constant buffers.
    CpuToGpu,
    /// Memory for reading data back on the CPU.
    GpuToCpu,
}

impl MemoryLocation {
    /// Property set tried first during memory type selection.
    pub(crate) fn preferred_properties(self) -> Properties {
        match self {
            MemoryLocation::Unknown => Properties::empty(),
            MemoryLocation::GpuOnly => Properties::DEVICE_LOCAL,
            MemoryLocation::CpuToGpu => {
                Properties::HOST_VISIBLE | Properties::HOST_COHERENT | Properties::DEVICE_LOCAL
            }
            MemoryLocation::GpuToCpu => {
                Properties::HOST_VISIBLE | Properties::HOST_COHERENT | Properties::HOST_CACHED
            }
        }
    }

    /// Fallback property set when nothing matches the preferred one.
    pub(crate) fn required_properties(self) -> Properties {
        match self {
            MemoryLocation::Unknown => Properties::empty(),
            MemoryLocation::GpuOnly => Properties::DEVICE_LOCAL,
            MemoryLocation::CpuToGpu | MemoryLocation::GpuToCpu => {
                Properties::HOST_VISIBLE | Properties::HOST_COHERENT
            }
        }
    }
}

/// How the backing memory object for an allocation is obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationScheme<B, I> {
    /// Sub-allocate from the shared memory blocks of the selected memory type.
    Managed,
    /// Perform a driver-level dedicated allocation for the given buffer.
    DedicatedBuffer(B),
    /// Perform a driver-level dedicated allocation for the given image.
    DedicatedImage(I),
}

impl<B, I> AllocationScheme<B, I> {
    pub(crate) fn is_dedicated(&self) -> bool {
        !matches!(self, AllocationScheme::Managed)
    }
}

/// Size, alignment and memory type mask the driver reports for a resource.
#[derive(Clone, Copy, Debug)]
pub struct MemoryRequirements {
    /// Required size of the allocation, in bytes.
    pub size: u64,
    /// Required alignment of the allocation, in bytes. Must be a power of two.
    pub alignment: u64,
    /// One bit set for every memory type the resource may be bound to.
    pub memory_type_bits: u32,
}
