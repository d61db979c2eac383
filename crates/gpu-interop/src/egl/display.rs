//! EGL display, surfaces, and contexts shared by the EGL-based backends.

use std::ffi::{c_void, CStr};
use std::sync::Arc;

use anyhow::{bail, Result};
use surface_core::SurfaceSize;
use tracing::{debug, info, warn};

use super::api::*;
use crate::current::ContextId;
use crate::target::NativeContext;

// ---------------------------------------------------------------------------
// EglDisplay
// ---------------------------------------------------------------------------

/// An initialized EGL display with the single config every surface and
/// context on it uses.
pub struct EglDisplay {
    api: &'static EglApi,
    raw: EGLDisplay,
    config: EGLConfig,
    extensions: String,
    verbose: bool,
}

// SAFETY: EGL display handles are process-global and every EGL entry point
// is thread-safe. Per-thread state (the current context) is never cached here.
unsafe impl Send for EglDisplay {}
unsafe impl Sync for EglDisplay {}

impl EglDisplay {
    /// Initialize `raw`, bind the GLES API, and choose an RGBA8 config with
    /// 24-bit depth and 8-bit stencil that supports `surface_type`.
    ///
    /// `verbose` turns on driver diagnostics for the display and every
    /// context created on it.
    pub fn initialize(
        api: &'static EglApi,
        raw: EGLDisplay,
        surface_type: EGLint,
        verbose: bool,
    ) -> Result<Arc<Self>> {
        if raw == EGL_NO_DISPLAY {
            bail!("no EGL display: {}", api.last_error());
        }

        let (mut major, mut minor) = (0, 0);
        if unsafe { (api.initialize)(raw, &mut major, &mut minor) } != EGL_TRUE {
            bail!("eglInitialize failed: {}", api.last_error());
        }
        if unsafe { (api.bind_api)(EGL_OPENGL_ES_API) } != EGL_TRUE {
            bail!("eglBindAPI(OPENGL_ES) failed: {}", api.last_error());
        }

        info!("EGL {major}.{minor} initialized");

        let config = choose_config(api, raw, surface_type)?;
        let extensions = query_string(api, raw, EGL_EXTENSIONS);
        if verbose {
            debug!(
                "EGL vendor: {}, version: {}",
                query_string(api, raw, EGL_VENDOR),
                query_string(api, raw, EGL_VERSION)
            );
            debug!("EGL extensions: {extensions}");
        }

        Ok(Arc::new(Self {
            api,
            raw,
            config,
            extensions,
            verbose,
        }))
    }

    pub fn api(&self) -> &'static EglApi {
        self.api
    }

    pub fn raw(&self) -> EGLDisplay {
        self.raw
    }

    pub fn config(&self) -> EGLConfig {
        self.config
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.split_whitespace().any(|ext| ext == name)
    }

    /// Query an integer attribute of the chosen config.
    pub fn config_attrib(&self, attribute: EGLint) -> Option<EGLint> {
        let mut value = 0;
        let ok = unsafe {
            (self.api.get_config_attrib)(self.raw, self.config, attribute, &mut value)
        };
        (ok == EGL_TRUE).then_some(value)
    }

    /// Create a plain pbuffer of `size`.
    pub fn create_pbuffer(&self, size: SurfaceSize) -> Result<EGLSurface> {
        let attribs = [
            EGL_WIDTH,
            size.width() as EGLint,
            EGL_HEIGHT,
            size.height() as EGLint,
            EGL_NONE,
        ];
        let surface =
            unsafe { (self.api.create_pbuffer_surface)(self.raw, self.config, attribs.as_ptr()) };
        if surface == EGL_NO_SURFACE {
            bail!("eglCreatePbufferSurface({size}) failed: {}", self.api.last_error());
        }
        Ok(surface)
    }

    /// Create a window surface on a host-owned native window.
    pub fn create_window_surface(&self, window: EGLNativeWindowType) -> Result<EGLSurface> {
        let attribs = [EGL_NONE];
        let surface = unsafe {
            (self.api.create_window_surface)(self.raw, self.config, window, attribs.as_ptr())
        };
        if surface == EGL_NO_SURFACE {
            bail!("eglCreateWindowSurface failed: {}", self.api.last_error());
        }
        Ok(surface)
    }

    /// Create a GLES 3 context (GLES 2 if 3 is refused) sharing objects with
    /// `share`.
    pub fn create_context(&self, share: EGLContext) -> Result<EGLContext> {
        for version in [3, 2] {
            let attribs = [EGL_CONTEXT_CLIENT_VERSION, version, EGL_NONE];
            let ctx = unsafe {
                (self.api.create_context)(self.raw, self.config, share, attribs.as_ptr())
            };
            if ctx != EGL_NO_CONTEXT {
                debug!("Created GLES {version} context {ctx:?} (shared with {share:?})");
                return Ok(ctx);
            }
            warn!("GLES {version} context refused: {}", self.api.last_error());
        }
        bail!("eglCreateContext failed for every GLES version")
    }

    pub fn destroy_surface(&self, surface: EGLSurface) {
        if surface == EGL_NO_SURFACE {
            return;
        }
        if unsafe { (self.api.destroy_surface)(self.raw, surface) } != EGL_TRUE {
            warn!("eglDestroySurface({surface:?}) failed: {}", self.api.last_error());
        }
    }
}

impl Drop for EglDisplay {
    fn drop(&mut self) {
        unsafe {
            (self.api.make_current)(self.raw, EGL_NO_SURFACE, EGL_NO_SURFACE, EGL_NO_CONTEXT);
            (self.api.terminate)(self.raw);
        }
        debug!("EGL display terminated");
    }
}

fn query_string(api: &EglApi, display: EGLDisplay, name: EGLint) -> String {
    let ptr = unsafe { (api.query_string)(display, name) };
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

fn choose_config(api: &EglApi, display: EGLDisplay, surface_type: EGLint) -> Result<EGLConfig> {
    for renderable in [EGL_OPENGL_ES3_BIT, EGL_OPENGL_ES2_BIT] {
        let attribs = [
            EGL_SURFACE_TYPE,
            surface_type,
            EGL_RENDERABLE_TYPE,
            renderable,
            EGL_RED_SIZE,
            8,
            EGL_GREEN_SIZE,
            8,
            EGL_BLUE_SIZE,
            8,
            EGL_ALPHA_SIZE,
            8,
            EGL_DEPTH_SIZE,
            24,
            EGL_STENCIL_SIZE,
            8,
            EGL_NONE,
        ];
        let mut config: EGLConfig = std::ptr::null_mut();
        let mut count = 0;
        let ok = unsafe {
            (api.choose_config)(display, attribs.as_ptr(), &mut config, 1, &mut count)
        };
        if ok == EGL_TRUE && count > 0 {
            return Ok(config);
        }
    }
    bail!("no RGBA8 EGL config: {}", api.last_error())
}

// ---------------------------------------------------------------------------
// EglSurface
// ---------------------------------------------------------------------------

/// Work run after the GPU finish on every present.
pub trait PresentHook: Send + Sync {
    fn after_finish(&self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EglSurfaceKind {
    /// Presented with `eglSwapBuffers`.
    Window,
    /// Presented with `glFinish`.
    Pbuffer,
}

/// An EGL surface plus how it is presented.
#[derive(Clone)]
pub struct EglSurface {
    raw: RawSurface,
    kind: EglSurfaceKind,
    hook: Option<Arc<dyn PresentHook>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RawSurface(EGLSurface);

// SAFETY: an EGLSurface is an opaque display-scoped handle; EGL serializes
// access internally and the bridge binds a surface on at most one thread.
unsafe impl Send for RawSurface {}
unsafe impl Sync for RawSurface {}

impl EglSurface {
    pub fn new(raw: EGLSurface, kind: EglSurfaceKind) -> Self {
        Self {
            raw: RawSurface(raw),
            kind,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn PresentHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn raw(&self) -> EGLSurface {
        self.raw.0
    }

    pub fn kind(&self) -> EglSurfaceKind {
        self.kind
    }
}

impl std::fmt::Debug for EglSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EglSurface")
            .field("raw", &self.raw.0)
            .field("kind", &self.kind)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EglContext
// ---------------------------------------------------------------------------

pub struct EglContext {
    id: ContextId,
    display: Arc<EglDisplay>,
    raw: EGLContext,
}

// SAFETY: EGL contexts may be created on one thread and made current on
// another; they are only ever current on one thread at a time, which the
// factory guarantees by giving each role its own thread.
unsafe impl Send for EglContext {}
unsafe impl Sync for EglContext {}

impl EglContext {
    pub fn create(display: &Arc<EglDisplay>, share_with: Option<&EglContext>) -> Result<Self> {
        let share = share_with.map_or(EGL_NO_CONTEXT, |c| c.raw);
        let raw = display.create_context(share)?;
        Ok(Self {
            id: ContextId::next(),
            display: display.clone(),
            raw,
        })
    }

    pub fn raw(&self) -> EGLContext {
        self.raw
    }
}

impl NativeContext for EglContext {
    type Surface = EglSurface;

    fn id(&self) -> ContextId {
        self.id
    }

    fn make_current(&self, surface: &EglSurface) -> Result<()> {
        let api = self.display.api();
        let raw = surface.raw();
        if unsafe { (api.make_current)(self.display.raw(), raw, raw, self.raw) } != EGL_TRUE {
            bail!("eglMakeCurrent({:?}) failed: {}", self.raw, api.last_error());
        }
        if self.display.verbose() {
            let (context, draw) = unsafe {
                ((api.get_current_context)(), (api.get_current_surface)(EGL_DRAW))
            };
            debug!(
                "Context {} current: EGL context {context:?}, draw surface {draw:?} ({:?})",
                self.id.get(),
                surface.kind()
            );
        }
        Ok(())
    }

    fn done_current(&self) -> Result<()> {
        if !self.is_current() {
            return Ok(());
        }
        let api = self.display.api();
        let ok = unsafe {
            (api.make_current)(self.display.raw(), EGL_NO_SURFACE, EGL_NO_SURFACE, EGL_NO_CONTEXT)
        };
        if ok != EGL_TRUE {
            bail!("eglMakeCurrent(NONE) failed: {}", api.last_error());
        }
        Ok(())
    }

    fn is_current(&self) -> bool {
        unsafe { (self.display.api().get_current_context)() == self.raw }
    }

    fn finish(&self, surface: &EglSurface) -> Result<()> {
        match surface.kind() {
            EglSurfaceKind::Window => {
                let api = self.display.api();
                if unsafe { (api.swap_buffers)(self.display.raw(), surface.raw()) } != EGL_TRUE {
                    bail!("eglSwapBuffers failed: {}", api.last_error());
                }
            }
            EglSurfaceKind::Pbuffer => unsafe { gl::Finish() },
        }
        if let Some(hook) = &surface.hook {
            hook.after_finish()?;
        }
        Ok(())
    }
}

impl Drop for EglContext {
    fn drop(&mut self) {
        if let Err(e) = self.done_current() {
            warn!("{e}");
        }
        let api = self.display.api();
        if unsafe { (api.destroy_context)(self.display.raw(), self.raw) } != EGL_TRUE {
            warn!("eglDestroyContext failed: {}", api.last_error());
        }
    }
}

/// Raw pointer of a host object, as EGL expects it.
pub(crate) fn as_client_buffer<T>(ptr: *mut T) -> EGLClientBuffer {
    ptr as *mut c_void
}
