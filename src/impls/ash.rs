use std::ptr::NonNull;

use ash::vk;
use log::{debug, warn};

use crate::{
    device::Device,
    error::{AllocationError, Result},
    heaps::{Heaps, HeapsConfig},
    memory::Properties,
    usage::{AllocationScheme, MemoryRequirements},
};

impl From<vk::MemoryPropertyFlags> for Properties {
    fn from(flags: vk::MemoryPropertyFlags) -> Self {
        Properties::from_bits_truncate(flags.as_raw())
    }
}

impl From<vk::MemoryRequirements> for MemoryRequirements {
    fn from(requirements: vk::MemoryRequirements) -> Self {
        MemoryRequirements {
            size: requirements.size,
            alignment: requirements.alignment,
            memory_type_bits: requirements.memory_type_bits,
        }
    }
}

impl Device for ash::Device {
    type Memory = vk::DeviceMemory;
    type Buffer = vk::Buffer;
    type Image = vk::Image;

    unsafe fn allocate(
        &self,
        memory_type_index: u32,
        size: u64,
        device_address: bool,
        scheme: AllocationScheme<vk::Buffer, vk::Image>,
    ) -> Result<vk::DeviceMemory> {
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type_index);

        let mut flags_info =
            vk::MemoryAllocateFlagsInfo::builder().flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
        let alloc_info = if device_address {
            alloc_info.push_next(&mut flags_info)
        } else {
            alloc_info
        };

        let mut dedicated_info = vk::MemoryDedicatedAllocateInfo::builder();
        let alloc_info = match scheme {
            AllocationScheme::DedicatedBuffer(buffer) => {
                dedicated_info = dedicated_info.buffer(buffer);
                alloc_info.push_next(&mut dedicated_info)
            }
            AllocationScheme::DedicatedImage(image) => {
                dedicated_info = dedicated_info.image(image);
                alloc_info.push_next(&mut dedicated_info)
            }
            AllocationScheme::Managed => alloc_info,
        };

        self.allocate_memory(&alloc_info, None).map_err(|err| match err {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                AllocationError::OutOfMemory
            }
            err => AllocationError::Internal(format!(
                "unexpected error from vkAllocateMemory: {}",
                err
            )),
        })
    }

    unsafe fn free(&self, memory: vk::DeviceMemory) {
        self.free_memory(memory, None);
    }

    unsafe fn map(&self, memory: vk::DeviceMemory, _size: u64) -> Result<NonNull<u8>> {
        let ptr = self
            .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            .map_err(|err| AllocationError::FailedToMap(err.to_string()))?;

        NonNull::new(ptr as *mut u8)
            .ok_or_else(|| AllocationError::FailedToMap("returned mapping was null".into()))
    }

    unsafe fn unmap(&self, memory: vk::DeviceMemory) {
        self.unmap_memory(memory);
    }
}

/// Construction parameters for [`Heaps`] on a Vulkan device.
pub struct HeapsCreateDesc {
    pub instance: ash::Instance,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub config: HeapsConfig,
}

impl Heaps<ash::Device> {
    /// Query the physical device's memory properties and limits and build
    /// heaps for it.
    pub fn with_device(desc: &HeapsCreateDesc) -> Result<Self> {
        if desc.physical_device == vk::PhysicalDevice::null() {
            return Err(AllocationError::InvalidAllocatorCreateDesc(
                "HeapsCreateDesc field `physical_device` is null".into(),
            ));
        }

        let mem_props = unsafe {
            desc.instance
                .get_physical_device_memory_properties(desc.physical_device)
        };
        let memory_types = &mem_props.memory_types[..mem_props.memory_type_count as usize];
        let memory_heaps = &mem_props.memory_heaps[..mem_props.memory_heap_count as usize];

        if desc.config.debug_settings.log_memory_information {
            debug!("memory type count: {}", mem_props.memory_type_count);
            debug!("memory heap count: {}", mem_props.memory_heap_count);

            for (index, memory_type) in memory_types.iter().enumerate() {
                debug!(
                    "memory type[{}]: prop flags: 0x{:x}, heap[{}]",
                    index,
                    memory_type.property_flags.as_raw(),
                    memory_type.heap_index,
                );
            }
            for (index, heap) in memory_heaps.iter().enumerate() {
                debug!(
                    "heap[{}] flags: 0x{:x}, size: {} MiB",
                    index,
                    heap.flags.as_raw(),
                    heap.size / (1024 * 1024),
                );
            }
        }

        // Nothing here takes advantage of host visible memory that needs
        // explicit flushes yet.
        let host_visible_not_coherent = memory_types.iter().any(|memory_type| {
            let flags = memory_type.property_flags;
            flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
                && !flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        });
        if host_visible_not_coherent {
            warn!("There is a memory type that is host visible, but not host coherent.");
        }

        let buffer_image_granularity = unsafe {
            desc.instance
                .get_physical_device_properties(desc.physical_device)
        }
        .limits
        .buffer_image_granularity;

        let types = memory_types
            .iter()
            .map(|memory_type| (Properties::from(memory_type.property_flags), memory_type.heap_index));
        let heaps = memory_heaps.iter().map(|heap| heap.size);

        Ok(unsafe {
            Heaps::new(
                desc.device.clone(),
                types,
                heaps,
                buffer_image_granularity,
                desc.config,
            )
        })
    }
}
