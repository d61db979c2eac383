//! Degraded present path: read the GL pbuffer back and upload it into the
//! shared D3D11 texture.
//!
//! Only used when ANGLE cannot render straight into the texture. Costs a
//! GPU stall and a full-frame CPU round trip per present.

use std::ffi::c_void;
use std::sync::Arc;

use anyhow::{bail, Result};
use gl::types::{GLenum, GLsizei};
use parking_lot::Mutex;
use surface_core::{PixelFormat, SurfaceSize};
use windows::Win32::Graphics::Direct3D11::{ID3D11Resource, ID3D11Texture2D};
use windows::core::Interface;

use super::device::Dx11Device;
use crate::egl::PresentHook;
use crate::pixels::flip_rows;

pub(crate) struct StagingCopy {
    device: Arc<Dx11Device>,
    texture: ID3D11Texture2D,
    size: SurfaceSize,
    scratch: Mutex<Vec<u8>>,
}

// SAFETY: the texture belongs to a multithread-protected device.
unsafe impl Send for StagingCopy {}
unsafe impl Sync for StagingCopy {}

impl StagingCopy {
    pub(crate) fn new(
        device: Arc<Dx11Device>,
        texture: ID3D11Texture2D,
        size: SurfaceSize,
    ) -> Self {
        Self {
            device,
            texture,
            size,
            scratch: Mutex::new(vec![0; size.byte_len(PixelFormat::Rgba8Unorm)]),
        }
    }
}

impl PresentHook for StagingCopy {
    fn after_finish(&self) -> Result<()> {
        let width = self.size.width();
        let height = self.size.height();
        let row_bytes = (width * PixelFormat::Rgba8Unorm.bytes_per_pixel()) as usize;
        let mut pixels = self.scratch.lock();

        unsafe {
            gl::PixelStorei(gl::PACK_ALIGNMENT, 1);
            gl::ReadPixels(
                0,
                0,
                width as GLsizei,
                height as GLsizei,
                gl::RGBA as GLenum,
                gl::UNSIGNED_BYTE,
                pixels.as_mut_ptr() as *mut c_void,
            );
            let err = gl::GetError();
            if err != gl::NO_ERROR {
                bail!("glReadPixels failed: 0x{err:04X}");
            }
        }

        flip_rows(&mut pixels, row_bytes);

        let resource: ID3D11Resource = self.texture.cast()?;
        unsafe {
            self.device.context().UpdateSubresource(
                &resource,
                0,
                None,
                pixels.as_ptr() as *const c_void,
                row_bytes as u32,
                0,
            );
            self.device.context().Flush();
        }
        self.device.check_removed("degraded copy");
        Ok(())
    }
}
