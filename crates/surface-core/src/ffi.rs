//! C-repr structures and constants exchanged with the host compositor.
//!
//! The descriptor layout matches what desktop compositors consume for
//! GPU-surface textures: a struct-size prefix, the shared handle, the
//! surface and visible extents, a format code, and a release callback that
//! the compositor invokes exactly once when it no longer needs the handle.

use std::ffi::c_void;

// =====================================================================
// Result codes
// =====================================================================
pub const SURFACE_SUCCESS: i32 = 0;
pub const SURFACE_ERROR_INVALID_DIMENSIONS: i32 = -1;
pub const SURFACE_ERROR_FACTORY_INVALID: i32 = -2;
pub const SURFACE_ERROR_NOT_CREATED: i32 = -3;
pub const SURFACE_ERROR_DESTROYED: i32 = -4;
pub const SURFACE_ERROR_RESIZE_FAILED: i32 = -5;
pub const SURFACE_ERROR_ENGINE: i32 = -6;

// =====================================================================
// Pixel formats
// =====================================================================
pub const SURFACE_FORMAT_NONE: u32 = 0;
pub const SURFACE_FORMAT_RGBA8888: u32 = 1;
pub const SURFACE_FORMAT_BGRA8888: u32 = 2;

/// Callback the compositor invokes once it is done with `handle`.
pub type ReleaseCallback = unsafe extern "C" fn(release_context: *mut c_void);

/// GPU surface descriptor handed to the compositor.
#[repr(C)]
#[derive(Debug)]
pub struct GpuSurfaceDescriptor {
    /// `size_of::<GpuSurfaceDescriptor>()`, for forward compatibility.
    pub struct_size: usize,
    pub handle: *mut c_void,
    pub width: usize,
    pub height: usize,
    pub visible_width: usize,
    pub visible_height: usize,
    pub format: u32,
    pub release_callback: Option<ReleaseCallback>,
    pub release_context: *mut c_void,
}

impl GpuSurfaceDescriptor {
    /// A zeroed descriptor with `struct_size` filled in.
    pub fn empty() -> Self {
        Self {
            struct_size: std::mem::size_of::<Self>(),
            handle: std::ptr::null_mut(),
            width: 0,
            height: 0,
            visible_width: 0,
            visible_height: 0,
            format: SURFACE_FORMAT_NONE,
            release_callback: None,
            release_context: std::ptr::null_mut(),
        }
    }

    /// Run the release callback, if any, and clear it so it cannot run twice.
    ///
    /// # Safety
    /// `release_context` must still be the value paired with
    /// `release_callback` when the descriptor was produced.
    pub unsafe fn release(&mut self) {
        if let Some(callback) = self.release_callback.take() {
            let context = std::mem::replace(&mut self.release_context, std::ptr::null_mut());
            callback(context);
        }
    }
}
