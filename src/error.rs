/// Possible errors returned by the allocator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocationError {
    /// The request cannot be satisfied from the available device memory.
    OutOfMemory,

    /// Mapping a freshly allocated memory object failed.
    FailedToMap(String),

    /// No device memory type matches both the type mask and the requested properties.
    NoCompatibleMemoryTypeFound,

    /// The allocation description failed validation.
    InvalidAllocationCreateDesc,

    /// The heaps description failed validation.
    InvalidAllocatorCreateDesc(String),

    /// Allocator bookkeeping was driven into an inconsistent state.
    /// These are bugs, not recoverable conditions.
    Internal(String),

    /// Only raised by a Direct3D 12 backend.
    BarrierLayoutNeedsDevice10,

    /// Only raised by a Direct3D 12 backend.
    CastableFormatsRequiresEnhancedBarriers,

    /// Only raised by a Direct3D 12 backend.
    CastableFormatsRequiresAtLeastDevice12,
}

impl std::fmt::Display for AllocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::FailedToMap(e) => write!(f, "failed to map memory: {}", e),
            Self::NoCompatibleMemoryTypeFound => {
                f.write_str("no compatible memory type available")
            }
            Self::InvalidAllocationCreateDesc => {
                f.write_str("invalid AllocationCreateDesc")
            }
            Self::InvalidAllocatorCreateDesc(e) => {
                write!(f, "invalid HeapsCreateDesc: {}", e)
            }
            Self::Internal(e) => write!(f, "internal error: {}", e),
            Self::BarrierLayoutNeedsDevice10 => {
                f.write_str("ID3D12Device10 is required for enhanced barrier layouts")
            }
            Self::CastableFormatsRequiresEnhancedBarriers => {
                f.write_str("casting formats requires enhanced barriers")
            }
            Self::CastableFormatsRequiresAtLeastDevice12 => {
                f.write_str("casting formats requires at least ID3D12Device12")
            }
        }
    }
}

impl std::error::Error for AllocationError {}

pub type Result<V, E = AllocationError> = std::result::Result<V, E>;
