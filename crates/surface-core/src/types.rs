//! Plain value types shared across the bridge.

use std::fmt;

use crate::error::SurfaceError;

/// Pixel format of every shared render target.
///
/// The bridge renders into 8-bit-per-channel RGBA, unsigned normalized, on
/// every platform. The enum exists so descriptors and allocators carry the
/// format explicitly instead of assuming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    #[default]
    Rgba8Unorm,
}

impl PixelFormat {
    /// Bytes per pixel.
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgba8Unorm => 4,
        }
    }

    /// Format code used in [`crate::ffi::GpuSurfaceDescriptor::format`].
    pub const fn descriptor_code(self) -> u32 {
        match self {
            PixelFormat::Rgba8Unorm => crate::ffi::SURFACE_FORMAT_RGBA8888,
        }
    }
}

/// Dimensions of a surface in physical pixels. Both sides are always > 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceSize {
    width: u32,
    height: u32,
}

impl SurfaceSize {
    /// Validate and build a size. Zero on either axis is rejected.
    pub fn new(width: u32, height: u32) -> Result<Self, SurfaceError> {
        if width == 0 || height == 0 {
            return Err(SurfaceError::InvalidDimensions { width, height });
        }
        Ok(Self { width, height })
    }

    /// Validate a size coming from a signed host API.
    pub fn from_signed(width: i32, height: i32) -> Result<Self, SurfaceError> {
        match (u32::try_from(width), u32::try_from(height)) {
            (Ok(w), Ok(h)) => Self::new(w, h),
            _ => Err(SurfaceError::InvalidDimensions {
                width: width.max(0) as u32,
                height: height.max(0) as u32,
            }),
        }
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Byte length of a tightly packed buffer of this size in `format`.
    pub fn byte_len(&self, format: PixelFormat) -> usize {
        self.width as usize * self.height as usize * format.bytes_per_pixel() as usize
    }

    /// Whether either side exceeds `limit`.
    pub fn exceeds(&self, limit: u32) -> bool {
        self.width > limit || self.height > limit
    }
}

impl fmt::Display for SurfaceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An opaque OS handle exported to the compositor.
///
/// On Windows this is a duplicated D3D shared-resource `HANDLE`, on Apple
/// platforms an `IOSurfaceRef`. The value is never dereferenced by the
/// bridge core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub usize);

impl NativeHandle {
    pub fn as_ptr(self) -> *mut std::ffi::c_void {
        self.0 as *mut std::ffi::c_void
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// An OS window the host owns (Android `ANativeWindow*`).
///
/// The bridge only borrows it to create window surfaces; acquiring and
/// releasing the window reference stays with the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeWindow(pub usize);

impl NativeWindow {
    pub fn as_ptr(self) -> *mut std::ffi::c_void {
        self.0 as *mut std::ffi::c_void
    }
}

/// Locally unique identifier of a graphics adapter (DXGI `LUID`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdapterLuid {
    pub low_part: u32,
    pub high_part: i32,
}

impl fmt::Display for AdapterLuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:{:08x}", self.high_part as u32, self.low_part)
    }
}

/// Identifier handed back to the host when a surface is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub i64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(matches!(
            SurfaceSize::new(0, 600),
            Err(SurfaceError::InvalidDimensions { width: 0, height: 600 })
        ));
        assert!(SurfaceSize::new(800, 0).is_err());
        assert!(SurfaceSize::from_signed(-1, 10).is_err());
    }

    #[test]
    fn byte_len_uses_four_bytes_per_pixel() {
        let size = SurfaceSize::new(800, 600).unwrap();
        assert_eq!(size.byte_len(PixelFormat::Rgba8Unorm), 800 * 600 * 4);
        assert_eq!(size.to_string(), "800x600");
    }

    #[test]
    fn exceeds_checks_both_axes() {
        let size = SurfaceSize::new(100, 20_000).unwrap();
        assert!(size.exceeds(16_384));
        assert!(!SurfaceSize::new(16_384, 16_384).unwrap().exceeds(16_384));
    }
}
