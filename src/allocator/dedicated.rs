use std::num::NonZeroU64;

use log::{log, Level};

use crate::{
    allocator::{AllocationType, SubAllocator},
    error::{AllocationError, Result},
    report::AllocationReport,
};

/// Whole-block allocator for memory that hosts exactly one allocation.
///
/// Used for dedicated resource bindings and for requests larger than the
/// configured general block size. The sole occupant always has chunk id 1
/// and offset 0.
#[derive(Debug)]
pub(crate) struct DedicatedBlockAllocator {
    size: u64,
    allocated: u64,
    name: Option<String>,
}

impl DedicatedBlockAllocator {
    pub(crate) fn new(size: u64) -> Self {
        DedicatedBlockAllocator {
            size,
            allocated: 0,
            name: None,
        }
    }
}

impl SubAllocator for DedicatedBlockAllocator {
    fn allocate(
        &mut self,
        size: u64,
        _alignment: u64,
        _allocation_type: AllocationType,
        _granularity: u64,
        name: &str,
    ) -> Result<(u64, NonZeroU64)> {
        if self.allocated != 0 {
            return Err(AllocationError::OutOfMemory);
        }
        if self.size != size {
            return Err(AllocationError::Internal(
                "dedicated block size does not match the allocation size".into(),
            ));
        }

        self.allocated = size;
        self.name = Some(name.to_string());

        Ok((0, NonZeroU64::MIN))
    }

    fn free(&mut self, chunk_id: Option<NonZeroU64>) -> Result<()> {
        if chunk_id != Some(NonZeroU64::MIN) {
            return Err(AllocationError::Internal(
                "chunk id of a dedicated block must be 1".into(),
            ));
        }
        if self.allocated == 0 {
            return Err(AllocationError::Internal(
                "dedicated block is not currently allocated".into(),
            ));
        }

        self.allocated = 0;
        self.name = None;
        Ok(())
    }

    fn rename_allocation(&mut self, chunk_id: Option<NonZeroU64>, name: &str) -> Result<()> {
        if chunk_id != Some(NonZeroU64::MIN) {
            return Err(AllocationError::Internal(
                "chunk id of a dedicated block must be 1".into(),
            ));
        }
        if self.allocated == 0 {
            return Err(AllocationError::Internal(
                "dedicated block is not currently allocated".into(),
            ));
        }

        self.name = Some(name.to_string());
        Ok(())
    }

    fn report_allocations(&self) -> Vec<AllocationReport> {
        if self.allocated == 0 {
            return Vec::new();
        }

        vec![AllocationReport {
            name: self
                .name
                .clone()
                .unwrap_or_else(|| "<unnamed dedicated allocation>".to_owned()),
            offset: 0,
            size: self.size,
        }]
    }

    fn report_leaks(&self, log_level: Level, memory_type_index: usize, block_index: usize) {
        if self.allocated == 0 {
            return;
        }

        let name = self.name.as_deref().unwrap_or("<unnamed>");
        log!(
            log_level,
            "leak detected: {{ memory type: {}, memory block: {}, dedicated allocation: {{ size: 0x{:x}, name: {} }} }}",
            memory_type_index,
            block_index,
            self.size,
            name,
        );
    }

    fn supports_general_allocations(&self) -> bool {
        false
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn allocated(&self) -> u64 {
        self.allocated
    }
}
