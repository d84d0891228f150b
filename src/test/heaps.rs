use std::{cell::RefCell, collections::HashMap, ptr::NonNull, rc::Rc};

use crate::{
    device::Device,
    error::{AllocationError, Result},
    heaps::{
        Allocation, AllocationCreateDesc, AllocationSizes, DebugSettings, Heaps, HeapsConfig,
    },
    memory::Properties,
    usage::{AllocationScheme, MemoryLocation, MemoryRequirements},
};

const GRANULARITY: u64 = 1024;
const MEMBLOCK_SIZE: u64 = 4 * 1024 * 1024;

struct Inner {
    next: u64,
    live: HashMap<u64, u64>,
    mappings: HashMap<u64, Box<[u8]>>,
    fail_mapping: bool,
}

#[derive(Clone)]
struct MockDevice(Rc<RefCell<Inner>>);

impl MockDevice {
    fn new() -> Self {
        MockDevice(Rc::new(RefCell::new(Inner {
            next: 1,
            live: HashMap::new(),
            mappings: HashMap::new(),
            fail_mapping: false,
        })))
    }

    fn fail_mapping(&self, fail: bool) {
        self.0.borrow_mut().fail_mapping = fail;
    }

    fn live_memory_objects(&self) -> usize {
        self.0.borrow().live.len()
    }
}

impl Device for MockDevice {
    type Memory = u64;
    type Buffer = u64;
    type Image = u64;

    unsafe fn allocate(
        &self,
        _memory_type_index: u32,
        size: u64,
        _device_address: bool,
        _scheme: AllocationScheme<u64, u64>,
    ) -> Result<u64> {
        let mut inner = self.0.borrow_mut();
        let id = inner.next;
        inner.next += 1;
        inner.live.insert(id, size);
        Ok(id)
    }

    unsafe fn free(&self, memory: u64) {
        let mut inner = self.0.borrow_mut();
        assert!(
            inner.live.remove(&memory).is_some(),
            "double free of memory object {}",
            memory
        );
        inner.mappings.remove(&memory);
    }

    unsafe fn map(&self, memory: u64, size: u64) -> Result<NonNull<u8>> {
        let mut inner = self.0.borrow_mut();
        if inner.fail_mapping {
            return Err(AllocationError::FailedToMap("mapping disabled".into()));
        }

        let buffer = inner
            .mappings
            .entry(memory)
            .or_insert_with(|| vec![0u8; size as usize].into_boxed_slice());
        Ok(NonNull::new(buffer.as_mut_ptr()).expect("mock mapping must not be null"))
    }

    unsafe fn unmap(&self, _memory: u64) {}
}

/// A device with no `HOST_VISIBLE | HOST_COHERENT | DEVICE_LOCAL` type, so
/// `CpuToGpu` exercises the documented fallback.
fn make_heaps(device: &MockDevice) -> Heaps<MockDevice> {
    unsafe {
        Heaps::new(
            device.clone(),
            vec![
                (Properties::DEVICE_LOCAL, 0),
                (Properties::HOST_VISIBLE | Properties::HOST_COHERENT, 1),
                (
                    Properties::HOST_VISIBLE
                        | Properties::HOST_COHERENT
                        | Properties::HOST_CACHED,
                    1,
                ),
            ],
            vec![256 * 1024 * 1024, 64 * 1024 * 1024],
            GRANULARITY,
            HeapsConfig {
                buffer_device_address: false,
                debug_settings: DebugSettings {
                    log_leaks_on_shutdown: false,
                    ..Default::default()
                },
                allocation_sizes: AllocationSizes::new(MEMBLOCK_SIZE, MEMBLOCK_SIZE),
            },
        )
    }
}

fn managed_desc(
    name: &str,
    size: u64,
    alignment: u64,
    location: MemoryLocation,
) -> AllocationCreateDesc<'_, u64, u64> {
    AllocationCreateDesc {
        name,
        requirements: MemoryRequirements {
            size,
            alignment,
            memory_type_bits: !0,
        },
        location,
        linear: true,
        scheme: AllocationScheme::Managed,
    }
}

#[test]
fn managed_gpu_only_round_trip() {
    let device = MockDevice::new();
    let mut heaps = make_heaps(&device);

    let allocation = heaps
        .allocate(&managed_desc("test allocation", 512, 256, MemoryLocation::GpuOnly))
        .unwrap();

    assert_eq!(allocation.offset(), 0);
    assert_eq!(allocation.size(), 512);
    assert!(!allocation.is_dedicated());
    assert!(allocation.properties().contains(Properties::DEVICE_LOCAL));
    assert!(allocation.mapped_ptr().is_none());
    assert_eq!(allocation.memory_type_index, 0);

    heaps.free(allocation).unwrap();

    // The last warm general block per type is kept around.
    let report = heaps.report();
    assert!(report.allocations.is_empty());
    assert_eq!(report.blocks.len(), 1);
    assert_eq!(report.total_allocated_bytes, 0);
    assert_eq!(report.total_reserved_bytes, MEMBLOCK_SIZE);
}

#[test]
fn dedicated_buffer_gets_its_own_block() {
    let device = MockDevice::new();
    let mut heaps = make_heaps(&device);

    let allocation = heaps
        .allocate(&AllocationCreateDesc {
            name: "dedicated buffer",
            requirements: MemoryRequirements {
                size: 512,
                alignment: 256,
                memory_type_bits: !0,
            },
            location: MemoryLocation::GpuOnly,
            linear: true,
            scheme: AllocationScheme::DedicatedBuffer(7),
        })
        .unwrap();

    assert_eq!(allocation.offset(), 0);
    assert!(allocation.is_dedicated());

    let report = heaps.report();
    assert_eq!(report.blocks.len(), 1);
    assert_eq!(report.blocks[0].size, 512);

    // Dedicated blocks are destroyed unconditionally on free.
    heaps.free(allocation).unwrap();
    assert!(heaps.report().blocks.is_empty());
    assert_eq!(device.live_memory_objects(), 0);
}

#[test]
fn two_managed_allocations_share_a_block() {
    let device = MockDevice::new();
    let mut heaps = make_heaps(&device);

    let a = heaps
        .allocate(&managed_desc("a", 512, 256, MemoryLocation::GpuOnly))
        .unwrap();
    let b = heaps
        .allocate(&managed_desc("b", 512, 256, MemoryLocation::GpuOnly))
        .unwrap();

    assert_eq!(unsafe { a.memory() }, unsafe { b.memory() });
    assert_eq!(a.offset(), 0);
    assert_eq!(b.offset(), 512);
    assert_eq!(heaps.report().blocks.len(), 1);

    heaps.free(a).unwrap();
    heaps.free(b).unwrap();

    let report = heaps.report();
    assert!(report.allocations.is_empty());
    assert_eq!(report.blocks.len(), 1);
    assert_eq!(report.total_allocated_bytes, 0);
}

#[test]
fn oversize_managed_request_gets_personal_block() {
    let device = MockDevice::new();
    let mut heaps = make_heaps(&device);

    let size = MEMBLOCK_SIZE + 4;
    let allocation = heaps
        .allocate(&managed_desc("oversize", size, 4, MemoryLocation::GpuOnly))
        .unwrap();

    // Not a dedicated binding, but the block is exactly sized and
    // single-occupant.
    assert!(!allocation.is_dedicated());
    assert_eq!(allocation.offset(), 0);
    let report = heaps.report();
    assert_eq!(report.blocks.len(), 1);
    assert_eq!(report.blocks[0].size, size);

    // A single-occupant block doesn't survive its occupant.
    heaps.free(allocation).unwrap();
    assert!(heaps.report().blocks.is_empty());
    assert_eq!(device.live_memory_objects(), 0);
}

#[test]
fn cpu_to_gpu_falls_back_to_host_memory() {
    let device = MockDevice::new();
    let mut heaps = make_heaps(&device);

    let desc = managed_desc("upload", 1024, 64, MemoryLocation::CpuToGpu);
    let mut allocation = heaps.allocate(&desc).unwrap();

    // No HOST_VISIBLE | HOST_COHERENT | DEVICE_LOCAL type exists; the plain
    // host type must be chosen.
    assert_eq!(allocation.memory_type_index, 1);
    assert_ne!(
        (1 << allocation.memory_type_index) & desc.requirements.memory_type_bits,
        0
    );
    assert!(allocation.properties().contains(Properties::HOST_VISIBLE));

    let slice = allocation.mapped_slice_mut().unwrap();
    assert_eq!(slice.len(), 1024);
    slice[0] = 0xa5;
    assert_eq!(allocation.mapped_slice().unwrap()[0], 0xa5);

    heaps.free(allocation).unwrap();
}

#[test]
fn gpu_to_cpu_prefers_cached_memory() {
    let device = MockDevice::new();
    let mut heaps = make_heaps(&device);

    let allocation = heaps
        .allocate(&managed_desc("readback", 1024, 64, MemoryLocation::GpuToCpu))
        .unwrap();
    assert_eq!(allocation.memory_type_index, 2);
    assert!(allocation.properties().contains(Properties::HOST_CACHED));

    heaps.free(allocation).unwrap();
}

#[test]
fn invalid_requests_leave_heaps_untouched() {
    let device = MockDevice::new();
    let mut heaps = make_heaps(&device);

    let err = heaps
        .allocate(&managed_desc("bad alignment", 512, 3, MemoryLocation::GpuOnly))
        .unwrap_err();
    assert_eq!(err, AllocationError::InvalidAllocationCreateDesc);

    let err = heaps
        .allocate(&managed_desc("zero size", 0, 256, MemoryLocation::GpuOnly))
        .unwrap_err();
    assert_eq!(err, AllocationError::InvalidAllocationCreateDesc);

    assert!(heaps.report().blocks.is_empty());
    assert_eq!(device.live_memory_objects(), 0);
}

#[test]
fn memory_type_bits_are_respected() {
    let device = MockDevice::new();
    let mut heaps = make_heaps(&device);

    let allocation = heaps
        .allocate(&AllocationCreateDesc {
            name: "masked",
            requirements: MemoryRequirements {
                size: 1024,
                alignment: 64,
                memory_type_bits: 1 << 2,
            },
            location: MemoryLocation::CpuToGpu,
            linear: true,
            scheme: AllocationScheme::Managed,
        })
        .unwrap();
    assert_eq!(allocation.memory_type_index, 2);
    heaps.free(allocation).unwrap();

    let err = heaps
        .allocate(&AllocationCreateDesc {
            name: "impossible",
            requirements: MemoryRequirements {
                size: 1024,
                alignment: 64,
                memory_type_bits: 1 << 0,
            },
            location: MemoryLocation::GpuToCpu,
            linear: true,
            scheme: AllocationScheme::Managed,
        })
        .unwrap_err();
    assert_eq!(err, AllocationError::NoCompatibleMemoryTypeFound);
}

#[test]
fn requests_larger_than_the_heap_are_refused() {
    let device = MockDevice::new();
    let mut heaps = make_heaps(&device);

    let err = heaps
        .allocate(&managed_desc(
            "oversized",
            257 * 1024 * 1024,
            256,
            MemoryLocation::GpuOnly,
        ))
        .unwrap_err();
    assert_eq!(err, AllocationError::OutOfMemory);
}

#[test]
fn failed_mapping_rolls_back_the_memory_object() {
    let device = MockDevice::new();
    let mut heaps = make_heaps(&device);
    device.fail_mapping(true);

    let err = heaps
        .allocate(&managed_desc("upload", 1024, 64, MemoryLocation::CpuToGpu))
        .unwrap_err();
    assert!(matches!(err, AllocationError::FailedToMap(_)));
    assert_eq!(device.live_memory_objects(), 0);

    device.fail_mapping(false);
    let allocation = heaps
        .allocate(&managed_desc("upload", 1024, 64, MemoryLocation::CpuToGpu))
        .unwrap();
    heaps.free(allocation).unwrap();
}

#[test]
fn emptied_general_blocks_are_destroyed_and_slots_reused() {
    let device = MockDevice::new();
    let mut heaps = make_heaps(&device);
    let large = 3 * 1024 * 1024;

    let a = heaps
        .allocate(&managed_desc("a", large, 256, MemoryLocation::GpuOnly))
        .unwrap();
    let b = heaps
        .allocate(&managed_desc("b", large, 256, MemoryLocation::GpuOnly))
        .unwrap();
    assert_eq!(heaps.report().blocks.len(), 2);
    let a_block_index = a.memory_block_index;

    // With two general blocks alive, emptying one releases it.
    heaps.free(a).unwrap();
    assert_eq!(heaps.report().blocks.len(), 1);

    // The vacated slot is reused for the next block.
    let c = heaps
        .allocate(&managed_desc("c", large, 256, MemoryLocation::GpuOnly))
        .unwrap();
    assert_eq!(c.memory_block_index, a_block_index);

    heaps.free(b).unwrap();
    heaps.free(c).unwrap();
    assert_eq!(heaps.report().blocks.len(), 1);
}

#[test]
fn null_allocations_are_ignored() {
    let device = MockDevice::new();
    let mut heaps = make_heaps(&device);

    let allocation: Allocation<u64> = Allocation::default();
    assert!(allocation.is_null());
    heaps.free(allocation).unwrap();
}

#[test]
fn report_groups_allocations_by_block() {
    let device = MockDevice::new();
    let mut heaps = make_heaps(&device);

    let a = heaps
        .allocate(&managed_desc("a", 1024, 1024, MemoryLocation::GpuOnly))
        .unwrap();
    let b = heaps
        .allocate(&managed_desc("b", 1024, 1024, MemoryLocation::GpuOnly))
        .unwrap();
    let mut c = heaps
        .allocate(&managed_desc("c", 1024, 1024, MemoryLocation::CpuToGpu))
        .unwrap();

    heaps.rename_allocation(&mut c, "c renamed").unwrap();
    assert_eq!(c.name(), Some("c renamed"));

    let report = heaps.report();
    assert_eq!(report.allocations.len(), 3);
    assert_eq!(report.blocks.len(), 2);
    assert_eq!(report.total_allocated_bytes, 3 * 1024);
    assert_eq!(report.total_reserved_bytes, 2 * MEMBLOCK_SIZE);

    // Block slices tile the flat allocation list.
    let mut covered = 0;
    for block in &report.blocks {
        assert_eq!(block.allocations.start, covered);
        covered = block.allocations.end;
    }
    assert_eq!(covered, report.allocations.len());

    assert!(report
        .allocations
        .iter()
        .any(|allocation| allocation.name == "c renamed"));

    // The pretty printer shouldn't choke on a live report.
    let _ = format!("{}", report);

    heaps.free(a).unwrap();
    heaps.free(b).unwrap();
    heaps.free(c).unwrap();
}

#[test]
fn dispose_releases_all_blocks() {
    let device = MockDevice::new();
    let mut heaps = make_heaps(&device);

    // Leak both allocations deliberately; teardown must still release the
    // device memory.
    let _a = heaps
        .allocate(&managed_desc("a", 1024, 64, MemoryLocation::GpuOnly))
        .unwrap();
    let _b = heaps
        .allocate(&managed_desc("b", 1024, 64, MemoryLocation::CpuToGpu))
        .unwrap();
    assert!(device.live_memory_objects() > 0);

    heaps.dispose();
    assert_eq!(device.live_memory_objects(), 0);
}

#[test]
fn allocation_sizes_are_clamped_and_rounded() {
    const MIB: u64 = 1024 * 1024;

    let sizes = AllocationSizes::new(0, 0);
    assert_eq!(sizes.memblock_size(false), 4 * MIB);
    assert_eq!(sizes.memblock_size(true), 4 * MIB);

    let sizes = AllocationSizes::new(1024 * MIB, 5 * MIB);
    assert_eq!(sizes.memblock_size(false), 256 * MIB);
    assert_eq!(sizes.memblock_size(true), 8 * MIB);

    let sizes = AllocationSizes::new(64 * MIB, 8 * MIB);
    assert_eq!(sizes.memblock_size(false), 64 * MIB);
    assert_eq!(sizes.memblock_size(true), 8 * MIB);

    let sizes = AllocationSizes::default();
    assert_eq!(sizes.memblock_size(false), 256 * MIB);
    assert_eq!(sizes.memblock_size(true), 64 * MIB);
}

#[test]
fn randomized_stress_round_trips() {
    let device = MockDevice::new();
    let mut heaps = make_heaps(&device);
    let mut live: Vec<Allocation<u64>> = Vec::new();

    for _ in 0..256 {
        if live.is_empty() || rand::random::<u8>() % 2 == 0 {
            let size = 1 + rand::random::<u64>() % (64 * 1024);
            let alignment = 1u64 << (rand::random::<u32>() % 9);
            let location = match rand::random::<u8>() % 3 {
                0 => MemoryLocation::GpuOnly,
                1 => MemoryLocation::CpuToGpu,
                _ => MemoryLocation::GpuToCpu,
            };
            let linear: bool = rand::random();

            let allocation = heaps
                .allocate(&AllocationCreateDesc {
                    name: "stress",
                    requirements: MemoryRequirements {
                        size,
                        alignment,
                        memory_type_bits: !0,
                    },
                    location,
                    linear,
                    scheme: AllocationScheme::Managed,
                })
                .unwrap();
            assert_eq!(allocation.offset() % alignment, 0);
            live.push(allocation);
        } else {
            let index = rand::random::<usize>() % live.len();
            heaps.free(live.swap_remove(index)).unwrap();
        }
    }

    assert_eq!(heaps.report().allocations.len(), live.len());

    for allocation in live.drain(..) {
        heaps.free(allocation).unwrap();
    }
    assert_eq!(heaps.report().total_allocated_bytes, 0);

    heaps.dispose();
    assert_eq!(device.live_memory_objects(), 0);
}
