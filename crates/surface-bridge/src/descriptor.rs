//! Per-request frame descriptors handed to the compositor.

use std::ffi::c_void;
use std::fmt;

use gpu_interop::ExportedHandle;
use surface_core::ffi::GpuSurfaceDescriptor;
use surface_core::{NativeHandle, PixelFormat, SurfaceSize};

/// A duplicated handle to the current render target.
///
/// Dropping the descriptor (or calling [`release`](Self::release)) closes
/// the duplicate exactly once. [`into_raw`](Self::into_raw) hands that duty
/// to a C consumer through the descriptor's release callback.
pub struct FrameDescriptor {
    exported: ExportedHandle,
    size: SurfaceSize,
    format: PixelFormat,
    generation: u64,
}

impl FrameDescriptor {
    pub(crate) fn new(
        exported: ExportedHandle,
        size: SurfaceSize,
        format: PixelFormat,
        generation: u64,
    ) -> Self {
        Self {
            exported,
            size,
            format,
            generation,
        }
    }

    pub fn handle(&self) -> NativeHandle {
        self.exported.handle()
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width()
    }

    pub fn height(&self) -> u32 {
        self.size.height()
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Allocation generation of the target this handle refers to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn release(self) {
        drop(self);
    }

    /// Convert into the C layout. The consumer must invoke the release
    /// callback exactly once.
    pub fn into_raw(self) -> GpuSurfaceDescriptor {
        let handle = self.handle();
        let (width, height) = (self.width() as usize, self.height() as usize);
        let format = self.format.descriptor_code();
        let release: Box<Box<dyn FnOnce() + Send>> = Box::new(self.exported.into_release());

        GpuSurfaceDescriptor {
            struct_size: std::mem::size_of::<GpuSurfaceDescriptor>(),
            handle: handle.as_ptr(),
            width,
            height,
            visible_width: width,
            visible_height: height,
            format,
            release_callback: Some(release_exported),
            release_context: Box::into_raw(release) as *mut c_void,
        }
    }
}

unsafe extern "C" fn release_exported(context: *mut c_void) {
    if context.is_null() {
        return;
    }
    let release = Box::from_raw(context as *mut Box<dyn FnOnce() + Send>);
    release();
}

impl fmt::Debug for FrameDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameDescriptor")
            .field("handle", &self.handle())
            .field("size", &self.size)
            .field("format", &self.format)
            .field("generation", &self.generation)
            .finish()
    }
}
