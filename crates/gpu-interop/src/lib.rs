//! Platform layer of the GPU surface bridge.
//!
//! This crate defines the [`TargetAllocator`] and [`NativeContext`] traits:
//! an allocator produces the GPU-resident render target the compositor
//! samples, plus the offscreen surface and paired contexts that render into
//! it; a native context is one platform rendering context that can be made
//! current on a thread, flushed, and bound to a surface.
//!
//! Implementations:
//!
//! - [`headless`] -- CPU pixel buffers, compiled everywhere. Used by tests
//!   and as the fallback on platforms without a GPU backend.
//! - `egl` -- EGL window surfaces composited by the OS (Android).
//! - `dx11` -- EGL over D3D11 through ANGLE, rendering straight into a
//!   shareable D3D11 texture (Windows).
//! - `metal` -- IOSurface-backed Metal textures (macOS, iOS).
//!
//! [`PlatformAllocator`] names the implementation selected for the build
//! target.

pub mod current;
pub mod headless;
pub mod pixels;
pub mod target;

pub use current::ContextId;
pub use target::{
    AllocatorOptions, BackendKind, DeviceHealth, ExportedHandle, NativeContext, RenderPath,
    SharedTarget, TargetAllocator,
};

// Platform-specific implementations.

#[cfg(any(target_os = "android", target_os = "windows"))]
pub mod egl;

#[cfg(target_os = "windows")]
pub mod dx11;

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub mod metal;

#[cfg(target_os = "windows")]
pub type PlatformAllocator = dx11::AngleAllocator;

#[cfg(target_os = "android")]
pub type PlatformAllocator = egl::WindowAllocator;

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub type PlatformAllocator = metal::MetalAllocator;

#[cfg(not(any(
    target_os = "windows",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
pub type PlatformAllocator = headless::HeadlessAllocator;
