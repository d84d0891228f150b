//! Sub-allocating GPU memory heaps.
//!
//! Graphics APIs hand out a small number of large device memory objects,
//! each drawn from a typed memory heap; applications need many small,
//! aligned regions for their buffers and images. This crate sits in
//! between: it opens memory blocks on demand, carves them up with a free
//! list that honors alignment and the driver's buffer-image granularity,
//! and keeps dedicated allocations on their own blocks.
//!
//! The core is generic over the [`Device`] trait; an implementation for
//! [`ash`] ships behind the `ash` feature (enabled by default).
//!
//! ```no_run
//! use ashpool::{
//!     AllocationCreateDesc, AllocationScheme, Heaps, HeapsConfig, HeapsCreateDesc,
//!     MemoryLocation, MemoryRequirements,
//! };
//!
//! # let instance: ash::Instance = todo!();
//! # let device: ash::Device = todo!();
//! # let physical_device: ash::vk::PhysicalDevice = todo!();
//! let mut heaps = Heaps::with_device(&HeapsCreateDesc {
//!     instance,
//!     device,
//!     physical_device,
//!     config: HeapsConfig::default(),
//! })?;
//!
//! let allocation = heaps.allocate(&AllocationCreateDesc {
//!     name: "example buffer",
//!     requirements: MemoryRequirements {
//!         size: 512,
//!         alignment: 64,
//!         memory_type_bits: !0,
//!     },
//!     location: MemoryLocation::CpuToGpu,
//!     linear: true,
//!     scheme: AllocationScheme::Managed,
//! })?;
//!
//! // Bind buffers or images against `allocation.memory()` at
//! // `allocation.offset()`, then hand the allocation back.
//! heaps.free(allocation)?;
//! heaps.dispose();
//! # Ok::<(), ashpool::AllocationError>(())
//! ```

#![deny(unused_must_use)]

mod allocator;
mod block;
mod device;
mod error;
mod heaps;
mod impls;
mod memory;
mod report;
mod usage;
mod util;

#[cfg(test)]
mod test;

pub use crate::{
    device::Device,
    error::{AllocationError, Result},
    heaps::{
        Allocation, AllocationCreateDesc, AllocationSizes, DebugSettings, Heaps, HeapsConfig,
    },
    memory::{Memory, Properties},
    report::{AllocationReport, HeapsReport, MemoryBlockReport},
    usage::{AllocationScheme, MemoryLocation, MemoryRequirements},
};

#[cfg(feature = "ash")]
pub use crate::impls::ash::HeapsCreateDesc;
