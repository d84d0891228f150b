use std::ptr::NonNull;

use crate::{error::Result, usage::AllocationScheme};

/// Trait for device memory allocation and mapping.
///
/// This is the sole surface through which the heaps talk to the graphics API.
/// An implementation for `ash::Device` ships behind the `ash` feature; tests
/// run against a mock.
pub trait Device {
    /// Device memory object handle.
    type Memory: Copy;
    /// Buffer handle, used by dedicated allocations.
    type Buffer: Copy;
    /// Image handle, used by dedicated allocations.
    type Image: Copy;

    /// Allocate a memory object of `size` bytes from the driver memory type
    /// at `memory_type_index`.
    ///
    /// `device_address` requests a device-addressable memory object. A
    /// dedicated `scheme` carries the resource handle so the driver can
    /// attach its dedicated-allocation info.
    ///
    /// # Safety
    ///
    /// `memory_type_index` must be a valid memory type index of the device.
    unsafe fn allocate(
        &self,
        memory_type_index: u32,
        size: u64,
        device_address: bool,
        scheme: AllocationScheme<Self::Buffer, Self::Image>,
    ) -> Result<Self::Memory>;

    /// Free a memory object.
    ///
    /// # Safety
    ///
    /// `memory` must have been allocated from this device and not freed before.
    unsafe fn free(&self, memory: Self::Memory);

    /// Map the whole memory object into host address space.
    /// Failures must be reported as [`AllocationError::FailedToMap`].
    ///
    /// # Safety
    ///
    /// `memory` must be host-visible and not currently mapped.
    ///
    /// [`AllocationError::FailedToMap`]: crate::AllocationError::FailedToMap
    unsafe fn map(&self, memory: Self::Memory, size: u64) -> Result<NonNull<u8>>;

    /// Unmap a memory object previously mapped with [`Device::map`].
    ///
    /// # Safety
    ///
    /// No pointer derived from the mapping may be used afterwards.
    unsafe fn unmap(&self, memory: Self::Memory);
}
