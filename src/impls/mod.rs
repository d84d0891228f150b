//! Graphics API implementations of the `Device` trait.

#[cfg(feature = "ash")]
pub(crate) mod ash;
