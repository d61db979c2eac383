//! Mobile EGL path: the draw surface is an EGL window surface on a
//! host-owned `ANativeWindow`, and the OS compositor picks frames up on
//! `eglSwapBuffers`. Nothing is exported.

use std::ffi::c_void;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use libloading::Library;
use surface_core::{NativeWindow, PixelFormat, SurfaceSize};
use tracing::{debug, warn};

use super::api::*;
use super::display::{EglContext, EglDisplay, EglSurface, EglSurfaceKind};
use crate::target::{
    AllocatorOptions, BackendKind, ExportedHandle, RenderPath, SharedTarget, TargetAllocator,
};

#[allow(non_camel_case_types)]
type PFN_ANativeWindow_setBuffersGeometry =
    unsafe extern "C" fn(window: *mut c_void, width: i32, height: i32, format: i32) -> i32;

/// `ANativeWindow_setBuffersGeometry` from `libandroid.so`.
struct WindowGeometry {
    _lib: Library,
    set_buffers_geometry: PFN_ANativeWindow_setBuffersGeometry,
}

impl WindowGeometry {
    fn load() -> Result<Self> {
        unsafe {
            let lib = Library::new("libandroid.so").context("failed to load libandroid.so")?;
            let set_buffers_geometry = *lib
                .get::<PFN_ANativeWindow_setBuffersGeometry>(b"ANativeWindow_setBuffersGeometry\0")
                .context("libandroid.so is missing ANativeWindow_setBuffersGeometry")?;
            Ok(Self {
                _lib: lib,
                set_buffers_geometry,
            })
        }
    }
}

pub struct WindowAllocator {
    options: AllocatorOptions,
    display: Arc<EglDisplay>,
    window: NativeWindow,
    geometry: WindowGeometry,
    /// The single window surface; a window cannot carry two at once.
    window_surface: Option<EglSurface>,
    /// Live targets referencing `window_surface`.
    window_refs: usize,
    next_generation: u64,
}

// SAFETY: the native window pointer is only passed back to EGL and
// libandroid, both of which accept it from any thread.
unsafe impl Send for WindowAllocator {}

impl TargetAllocator for WindowAllocator {
    type Surface = EglSurface;
    type Context = EglContext;

    fn open(options: &AllocatorOptions) -> Result<Self> {
        let window = options
            .native_window
            .context("the window-surface path needs a native window")?;
        let api = egl()?;
        let raw = unsafe { (api.get_display)(EGL_DEFAULT_DISPLAY) };
        let display = EglDisplay::initialize(
            api,
            raw,
            EGL_WINDOW_BIT | EGL_PBUFFER_BIT,
            options.verbose,
        )?;
        api.load_gl();

        Ok(Self {
            options: options.clone(),
            display,
            window,
            geometry: WindowGeometry::load()?,
            window_surface: None,
            window_refs: 0,
            next_generation: 1,
        })
    }

    fn backend(&self) -> BackendKind {
        BackendKind::EglWindow
    }

    fn allocate(&mut self, size: SurfaceSize) -> Result<SharedTarget<EglSurface>> {
        self.options.check_size(size)?;

        let format = self.display.config_attrib(EGL_NATIVE_VISUAL_ID).unwrap_or(0);
        let rc = unsafe {
            (self.geometry.set_buffers_geometry)(
                self.window.as_ptr(),
                size.width() as i32,
                size.height() as i32,
                format,
            )
        };
        if rc != 0 {
            warn!("ANativeWindow_setBuffersGeometry({size}) returned {rc}");
        }

        let surface = match &self.window_surface {
            Some(existing) => existing.clone(),
            None => {
                let raw = self.display.create_window_surface(self.window.as_ptr())?;
                let surface = EglSurface::new(raw, EglSurfaceKind::Window);
                self.window_surface = Some(surface.clone());
                surface
            }
        };
        self.window_refs += 1;

        let generation = self.next_generation;
        self.next_generation += 1;
        debug!("Window surface sized to {size} (generation {generation})");

        Ok(SharedTarget {
            surface,
            size,
            format: PixelFormat::Rgba8Unorm,
            generation,
            path: RenderPath::WindowComposition,
        })
    }

    fn create_offscreen_surface(&mut self) -> Result<EglSurface> {
        let raw = self.display.create_pbuffer(SurfaceSize::new(1, 1)?)?;
        Ok(EglSurface::new(raw, EglSurfaceKind::Pbuffer))
    }

    fn create_context(&mut self, share_with: Option<&EglContext>) -> Result<EglContext> {
        EglContext::create(&self.display, share_with)
    }

    fn export(&self, _target: &SharedTarget<EglSurface>) -> Result<Option<ExportedHandle>> {
        Ok(None)
    }

    fn release_target(&mut self, target: SharedTarget<EglSurface>) {
        let is_window = self
            .window_surface
            .as_ref()
            .is_some_and(|s| s.raw() == target.surface.raw());
        if !is_window {
            self.display.destroy_surface(target.surface.raw());
            return;
        }
        self.window_refs = self.window_refs.saturating_sub(1);
        if self.window_refs == 0 {
            if let Some(surface) = self.window_surface.take() {
                debug!("Destroying window surface");
                self.display.destroy_surface(surface.raw());
            }
        }
    }

    fn release_surface(&mut self, surface: EglSurface) {
        self.display.destroy_surface(surface.raw());
    }
}
