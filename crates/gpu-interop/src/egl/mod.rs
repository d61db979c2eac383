//! EGL plumbing shared by the Android and ANGLE backends.

pub mod api;
pub mod display;

#[cfg(target_os = "android")]
pub mod window;

pub use api::{egl, EglApi};
pub use display::{EglContext, EglDisplay, EglSurface, EglSurfaceKind, PresentHook};

#[cfg(target_os = "android")]
pub use window::WindowAllocator;
