//! EGL over D3D11 through ANGLE (Windows).

pub mod allocator;
pub mod device;
mod staging;

pub use allocator::AngleAllocator;
pub use device::Dx11Device;
