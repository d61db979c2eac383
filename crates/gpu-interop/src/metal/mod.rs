//! IOSurface-backed Metal render targets (macOS, iOS).

pub mod allocator;
pub mod device;

pub use allocator::{MetalAllocator, MetalContext, MetalSurface};
pub use device::MetalDevice;
