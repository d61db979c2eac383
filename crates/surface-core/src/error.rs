//! Errors surfaced to the host through the outward API.
//!
//! Platform failures stay inside the bridge as `anyhow` errors and are
//! reported through the factory's validity flag; only the conditions a host
//! can act on reach this enum.

use thiserror::Error;

use crate::ffi;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("invalid surface dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("graphics context factory failed to initialize")]
    FactoryInvalid,

    #[error("no surface has been created")]
    NotCreated,

    #[error("surface has been destroyed")]
    Destroyed,

    #[error("failed to reallocate render target at {width}x{height}")]
    ResizeFailed { width: u32, height: u32 },

    #[error("render engine failed to start: {0}")]
    Engine(String),
}

impl SurfaceError {
    /// Stable negative code for hosts that talk through a C ABI.
    pub fn code(&self) -> i32 {
        match self {
            SurfaceError::InvalidDimensions { .. } => ffi::SURFACE_ERROR_INVALID_DIMENSIONS,
            SurfaceError::FactoryInvalid => ffi::SURFACE_ERROR_FACTORY_INVALID,
            SurfaceError::NotCreated => ffi::SURFACE_ERROR_NOT_CREATED,
            SurfaceError::Destroyed => ffi::SURFACE_ERROR_DESTROYED,
            SurfaceError::ResizeFailed { .. } => ffi::SURFACE_ERROR_RESIZE_FAILED,
            SurfaceError::Engine(_) => ffi::SURFACE_ERROR_ENGINE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_negative_and_distinct() {
        let errors = [
            SurfaceError::InvalidDimensions { width: 0, height: 0 },
            SurfaceError::FactoryInvalid,
            SurfaceError::NotCreated,
            SurfaceError::Destroyed,
            SurfaceError::ResizeFailed { width: 1, height: 1 },
            SurfaceError::Engine("boom".into()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(SurfaceError::code).collect();
        assert!(codes.iter().all(|c| *c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
