//! Runtime-loaded EGL entry points.
//!
//! `libEGL` is opened once per process with `libloading`; the table lives
//! for the rest of the process so raw function pointers handed out from it
//! never dangle. GLES entry points for the `gl` crate are resolved through
//! the GLES library first and `eglGetProcAddress` second.

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::Once;

use anyhow::{Context as _, Result};
use libloading::{Library, Symbol};
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

pub type EGLDisplay = *mut c_void;
pub type EGLConfig = *mut c_void;
pub type EGLContext = *mut c_void;
pub type EGLSurface = *mut c_void;
pub type EGLClientBuffer = *mut c_void;
pub type EGLNativeWindowType = *mut c_void;
pub type EGLNativeDisplayType = *mut c_void;
pub type EGLint = i32;
pub type EGLenum = u32;
pub type EGLBoolean = u32;
pub type EGLAttrib = isize;

pub const EGL_FALSE: EGLBoolean = 0;
pub const EGL_TRUE: EGLBoolean = 1;

pub const EGL_DEFAULT_DISPLAY: EGLNativeDisplayType = std::ptr::null_mut();
pub const EGL_NO_DISPLAY: EGLDisplay = std::ptr::null_mut();
pub const EGL_NO_CONTEXT: EGLContext = std::ptr::null_mut();
pub const EGL_NO_SURFACE: EGLSurface = std::ptr::null_mut();

// Config / surface attributes
pub const EGL_ALPHA_SIZE: EGLint = 0x3021;
pub const EGL_BLUE_SIZE: EGLint = 0x3022;
pub const EGL_GREEN_SIZE: EGLint = 0x3023;
pub const EGL_RED_SIZE: EGLint = 0x3024;
pub const EGL_DEPTH_SIZE: EGLint = 0x3025;
pub const EGL_STENCIL_SIZE: EGLint = 0x3026;
pub const EGL_NATIVE_VISUAL_ID: EGLint = 0x302E;
pub const EGL_SURFACE_TYPE: EGLint = 0x3033;
pub const EGL_NONE: EGLint = 0x3038;
pub const EGL_RENDERABLE_TYPE: EGLint = 0x3040;
pub const EGL_HEIGHT: EGLint = 0x3056;
pub const EGL_WIDTH: EGLint = 0x3057;
pub const EGL_TEXTURE_FORMAT: EGLint = 0x3080;
pub const EGL_TEXTURE_TARGET: EGLint = 0x3081;
pub const EGL_MIPMAP_TEXTURE: EGLint = 0x3082;
pub const EGL_TEXTURE_RGBA: EGLint = 0x305E;
pub const EGL_TEXTURE_2D: EGLint = 0x305F;
pub const EGL_CONTEXT_CLIENT_VERSION: EGLint = 0x3098;
pub const EGL_DRAW: EGLint = 0x3059;

pub const EGL_PBUFFER_BIT: EGLint = 0x0001;
pub const EGL_WINDOW_BIT: EGLint = 0x0004;
pub const EGL_OPENGL_ES2_BIT: EGLint = 0x0004;
pub const EGL_OPENGL_ES3_BIT: EGLint = 0x0040;

pub const EGL_VENDOR: EGLint = 0x3053;
pub const EGL_VERSION: EGLint = 0x3054;
pub const EGL_EXTENSIONS: EGLint = 0x3055;

pub const EGL_OPENGL_ES_API: EGLenum = 0x30A0;

// ANGLE
pub const EGL_PLATFORM_ANGLE_ANGLE: EGLenum = 0x3202;
pub const EGL_PLATFORM_ANGLE_TYPE_ANGLE: EGLint = 0x3203;
pub const EGL_PLATFORM_ANGLE_TYPE_D3D11_ANGLE: EGLint = 0x3208;
pub const EGL_D3D11_DEVICE_ANGLE: EGLint = 0x33A1;
pub const EGL_D3D_TEXTURE_ANGLE: EGLenum = 0x33A3;

// Errors
pub const EGL_SUCCESS: EGLint = 0x3000;
pub const EGL_NOT_INITIALIZED: EGLint = 0x3001;
pub const EGL_BAD_ACCESS: EGLint = 0x3002;
pub const EGL_BAD_ALLOC: EGLint = 0x3003;
pub const EGL_BAD_ATTRIBUTE: EGLint = 0x3004;
pub const EGL_BAD_CONFIG: EGLint = 0x3005;
pub const EGL_BAD_CONTEXT: EGLint = 0x3006;
pub const EGL_BAD_CURRENT_SURFACE: EGLint = 0x3007;
pub const EGL_BAD_DISPLAY: EGLint = 0x3008;
pub const EGL_BAD_MATCH: EGLint = 0x3009;
pub const EGL_BAD_NATIVE_PIXMAP: EGLint = 0x300A;
pub const EGL_BAD_NATIVE_WINDOW: EGLint = 0x300B;
pub const EGL_BAD_PARAMETER: EGLint = 0x300C;
pub const EGL_BAD_SURFACE: EGLint = 0x300D;
pub const EGL_CONTEXT_LOST: EGLint = 0x300E;

// ---------------------------------------------------------------------------
// Function pointer types
// ---------------------------------------------------------------------------

type PFN_eglGetError = unsafe extern "system" fn() -> EGLint;
type PFN_eglGetProcAddress = unsafe extern "system" fn(name: *const c_char) -> *const c_void;
type PFN_eglGetDisplay = unsafe extern "system" fn(native: EGLNativeDisplayType) -> EGLDisplay;
type PFN_eglGetPlatformDisplay = unsafe extern "system" fn(
    platform: EGLenum,
    native: *mut c_void,
    attribs: *const EGLAttrib,
) -> EGLDisplay;
type PFN_eglGetPlatformDisplayEXT = unsafe extern "system" fn(
    platform: EGLenum,
    native: *mut c_void,
    attribs: *const EGLint,
) -> EGLDisplay;
type PFN_eglInitialize = unsafe extern "system" fn(
    dpy: EGLDisplay,
    major: *mut EGLint,
    minor: *mut EGLint,
) -> EGLBoolean;
type PFN_eglTerminate = unsafe extern "system" fn(dpy: EGLDisplay) -> EGLBoolean;
type PFN_eglBindAPI = unsafe extern "system" fn(api: EGLenum) -> EGLBoolean;
type PFN_eglQueryString = unsafe extern "system" fn(dpy: EGLDisplay, name: EGLint) -> *const c_char;
type PFN_eglChooseConfig = unsafe extern "system" fn(
    dpy: EGLDisplay,
    attribs: *const EGLint,
    configs: *mut EGLConfig,
    config_size: EGLint,
    num_config: *mut EGLint,
) -> EGLBoolean;
type PFN_eglGetConfigAttrib = unsafe extern "system" fn(
    dpy: EGLDisplay,
    config: EGLConfig,
    attribute: EGLint,
    value: *mut EGLint,
) -> EGLBoolean;
type PFN_eglCreateContext = unsafe extern "system" fn(
    dpy: EGLDisplay,
    config: EGLConfig,
    share: EGLContext,
    attribs: *const EGLint,
) -> EGLContext;
type PFN_eglDestroyContext =
    unsafe extern "system" fn(dpy: EGLDisplay, ctx: EGLContext) -> EGLBoolean;
type PFN_eglMakeCurrent = unsafe extern "system" fn(
    dpy: EGLDisplay,
    draw: EGLSurface,
    read: EGLSurface,
    ctx: EGLContext,
) -> EGLBoolean;
type PFN_eglGetCurrentContext = unsafe extern "system" fn() -> EGLContext;
type PFN_eglGetCurrentSurface = unsafe extern "system" fn(readdraw: EGLint) -> EGLSurface;
type PFN_eglCreatePbufferSurface = unsafe extern "system" fn(
    dpy: EGLDisplay,
    config: EGLConfig,
    attribs: *const EGLint,
) -> EGLSurface;
type PFN_eglCreatePbufferFromClientBuffer = unsafe extern "system" fn(
    dpy: EGLDisplay,
    buftype: EGLenum,
    buffer: EGLClientBuffer,
    config: EGLConfig,
    attribs: *const EGLint,
) -> EGLSurface;
type PFN_eglCreateWindowSurface = unsafe extern "system" fn(
    dpy: EGLDisplay,
    config: EGLConfig,
    window: EGLNativeWindowType,
    attribs: *const EGLint,
) -> EGLSurface;
type PFN_eglDestroySurface =
    unsafe extern "system" fn(dpy: EGLDisplay, surface: EGLSurface) -> EGLBoolean;
type PFN_eglSwapBuffers =
    unsafe extern "system" fn(dpy: EGLDisplay, surface: EGLSurface) -> EGLBoolean;

// ---------------------------------------------------------------------------
// EglApi
// ---------------------------------------------------------------------------

#[cfg(target_os = "windows")]
const EGL_LIBRARY: &str = "libEGL.dll";
#[cfg(target_os = "windows")]
const GLES_LIBRARY: &str = "libGLESv2.dll";

#[cfg(not(target_os = "windows"))]
const EGL_LIBRARY: &str = "libEGL.so";
#[cfg(not(target_os = "windows"))]
const GLES_LIBRARY: &str = "libGLESv2.so";

/// Loaded EGL function table.
pub struct EglApi {
    _egl: Library,
    gles: Option<Library>,
    pub get_error: PFN_eglGetError,
    pub get_proc_address: PFN_eglGetProcAddress,
    pub get_display: PFN_eglGetDisplay,
    pub get_platform_display: Option<PFN_eglGetPlatformDisplay>,
    pub get_platform_display_ext: Option<PFN_eglGetPlatformDisplayEXT>,
    pub initialize: PFN_eglInitialize,
    pub terminate: PFN_eglTerminate,
    pub bind_api: PFN_eglBindAPI,
    pub query_string: PFN_eglQueryString,
    pub choose_config: PFN_eglChooseConfig,
    pub get_config_attrib: PFN_eglGetConfigAttrib,
    pub create_context: PFN_eglCreateContext,
    pub destroy_context: PFN_eglDestroyContext,
    pub make_current: PFN_eglMakeCurrent,
    pub get_current_context: PFN_eglGetCurrentContext,
    pub get_current_surface: PFN_eglGetCurrentSurface,
    pub create_pbuffer_surface: PFN_eglCreatePbufferSurface,
    pub create_pbuffer_from_client_buffer: Option<PFN_eglCreatePbufferFromClientBuffer>,
    pub create_window_surface: PFN_eglCreateWindowSurface,
    pub destroy_surface: PFN_eglDestroySurface,
    pub swap_buffers: PFN_eglSwapBuffers,
}

static EGL_API: OnceCell<EglApi> = OnceCell::new();
static GL_INIT_ONCE: Once = Once::new();

/// The process-wide EGL table, loading it on first use.
pub fn egl() -> Result<&'static EglApi> {
    EGL_API.get_or_try_init(EglApi::load)
}

impl EglApi {
    fn load() -> Result<Self> {
        let egl = unsafe { Library::new(EGL_LIBRARY) }
            .with_context(|| format!("failed to load {EGL_LIBRARY}"))?;
        let gles = match unsafe { Library::new(GLES_LIBRARY) } {
            Ok(lib) => Some(lib),
            Err(e) => {
                warn!("{GLES_LIBRARY} unavailable, resolving GL through eglGetProcAddress: {e}");
                None
            }
        };

        unsafe {
            let get_proc_address: PFN_eglGetProcAddress = required(&egl, b"eglGetProcAddress\0")?;
            let get_platform_display_ext =
                lookup_proc(get_proc_address, c"eglGetPlatformDisplayEXT")
                .map(|p| std::mem::transmute::<*const c_void, PFN_eglGetPlatformDisplayEXT>(p));

            let api = Self {
                get_error: required(&egl, b"eglGetError\0")?,
                get_proc_address,
                get_display: required(&egl, b"eglGetDisplay\0")?,
                get_platform_display: optional(&egl, b"eglGetPlatformDisplay\0"),
                get_platform_display_ext,
                initialize: required(&egl, b"eglInitialize\0")?,
                terminate: required(&egl, b"eglTerminate\0")?,
                bind_api: required(&egl, b"eglBindAPI\0")?,
                query_string: required(&egl, b"eglQueryString\0")?,
                choose_config: required(&egl, b"eglChooseConfig\0")?,
                get_config_attrib: required(&egl, b"eglGetConfigAttrib\0")?,
                create_context: required(&egl, b"eglCreateContext\0")?,
                destroy_context: required(&egl, b"eglDestroyContext\0")?,
                make_current: required(&egl, b"eglMakeCurrent\0")?,
                get_current_context: required(&egl, b"eglGetCurrentContext\0")?,
                get_current_surface: required(&egl, b"eglGetCurrentSurface\0")?,
                create_pbuffer_surface: required(&egl, b"eglCreatePbufferSurface\0")?,
                create_pbuffer_from_client_buffer: optional(
                    &egl,
                    b"eglCreatePbufferFromClientBuffer\0",
                ),
                create_window_surface: required(&egl, b"eglCreateWindowSurface\0")?,
                destroy_surface: required(&egl, b"eglDestroySurface\0")?,
                swap_buffers: required(&egl, b"eglSwapBuffers\0")?,
                _egl: egl,
                gles,
            };
            debug!("Loaded {EGL_LIBRARY}");
            Ok(api)
        }
    }

    /// Last EGL error on the calling thread, as a readable name.
    pub fn last_error(&self) -> &'static str {
        error_name(unsafe { (self.get_error)() })
    }

    /// Resolve a GLES entry point.
    pub fn gl_proc_address(&self, name: &str) -> *const c_void {
        let Ok(cname) = CString::new(name) else {
            return std::ptr::null();
        };
        if let Some(gles) = &self.gles {
            let symbol: Result<Symbol<unsafe extern "system" fn()>, _> =
                unsafe { gles.get(cname.as_bytes_with_nul()) };
            if let Ok(symbol) = symbol {
                return *symbol as *const c_void;
            }
        }
        lookup_proc(self.get_proc_address, &cname).unwrap_or(std::ptr::null())
    }

    /// Point the `gl` crate at this EGL implementation. Runs once.
    pub fn load_gl(&'static self) {
        GL_INIT_ONCE.call_once(|| {
            gl::load_with(|name| self.gl_proc_address(name));
            debug!("GLES entry points loaded");
        });
    }
}

unsafe fn required<T: Copy>(lib: &Library, name: &[u8]) -> Result<T> {
    let symbol: Symbol<T> = lib.get(name).with_context(|| {
        format!(
            "{EGL_LIBRARY} is missing {}",
            String::from_utf8_lossy(&name[..name.len().saturating_sub(1)])
        )
    })?;
    Ok(*symbol)
}

unsafe fn optional<T: Copy>(lib: &Library, name: &[u8]) -> Option<T> {
    lib.get::<T>(name).ok().map(|symbol| *symbol)
}

fn lookup_proc(get_proc_address: PFN_eglGetProcAddress, name: &CStr) -> Option<*const c_void> {
    let ptr = unsafe { get_proc_address(name.as_ptr()) };
    if ptr.is_null() {
        None
    } else {
        Some(ptr)
    }
}

pub fn error_name(code: EGLint) -> &'static str {
    match code {
        EGL_SUCCESS => "EGL_SUCCESS",
        EGL_NOT_INITIALIZED => "EGL_NOT_INITIALIZED",
        EGL_BAD_ACCESS => "EGL_BAD_ACCESS",
        EGL_BAD_ALLOC => "EGL_BAD_ALLOC",
        EGL_BAD_ATTRIBUTE => "EGL_BAD_ATTRIBUTE",
        EGL_BAD_CONFIG => "EGL_BAD_CONFIG",
        EGL_BAD_CONTEXT => "EGL_BAD_CONTEXT",
        EGL_BAD_CURRENT_SURFACE => "EGL_BAD_CURRENT_SURFACE",
        EGL_BAD_DISPLAY => "EGL_BAD_DISPLAY",
        EGL_BAD_MATCH => "EGL_BAD_MATCH",
        EGL_BAD_NATIVE_PIXMAP => "EGL_BAD_NATIVE_PIXMAP",
        EGL_BAD_NATIVE_WINDOW => "EGL_BAD_NATIVE_WINDOW",
        EGL_BAD_PARAMETER => "EGL_BAD_PARAMETER",
        EGL_BAD_SURFACE => "EGL_BAD_SURFACE",
        EGL_CONTEXT_LOST => "EGL_CONTEXT_LOST",
        _ => "unknown EGL error",
    }
}
