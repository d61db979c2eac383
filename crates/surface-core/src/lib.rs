//! Shared vocabulary for the GPU surface bridge.
//!
//! This crate holds the pieces every other layer agrees on: surface sizes,
//! the fixed pixel format, opaque native handles, adapter identity, the typed
//! error returned by the outward API, the C-repr descriptor handed to a
//! compositor, runtime configuration, and logging setup. It contains no GPU
//! code.

pub mod config;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod types;

pub use config::BridgeConfig;
pub use error::SurfaceError;
pub use types::{AdapterLuid, NativeHandle, NativeWindow, PixelFormat, SurfaceId, SurfaceSize};
