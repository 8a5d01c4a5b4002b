//! Stable, ABI-facing result codes returned by plugin operations.
//!
//! `StatusCode` is deliberately a plain ordinal enum, not a `thiserror` type:
//! it crosses the boundary to format drivers and eventually to real plugin
//! SDKs, so its discriminants must stay stable and it must not carry a
//! backtrace or a `std::error::Error` impl that a `?` could accidentally
//! widen into something heavier.

/// Outcome of a plugin operation (`configure`, `startProcessing`,
/// `stopProcessing`, `process`, parameter access, instantiation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StatusCode {
    Ok = 0,
    NotImplemented,
    BundleNotFound,
    FailedToInstantiate,
    AlreadyInstantiated,
    FailedToConfigure,
    FailedToStartProcessing,
    FailedToStopProcessing,
    FailedToProcess,
    UnsupportedChannelLayoutRequested,
    AlreadyInvalidState,
    InvalidParameterOperation,
    InvalidStateData,
    InsufficientMemory,
}

impl StatusCode {
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
