//! ANGLE-backed render targets.
//!
//! Each target is a D3D11 texture (RGBA8, render target + shader resource,
//! legacy-shared) that ANGLE renders into through a pbuffer created from the
//! texture itself (`EGL_ANGLE_d3d_texture_client_buffer`). The compositor
//! opens a duplicate of the texture's shared handle, so rendering reaches it
//! without a copy.
//!
//! If the client-buffer extension is missing the pbuffer is a plain one and
//! every present copies its pixels into the texture instead (see
//! [`super::staging`]).

use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _, Result};
use surface_core::{NativeHandle, PixelFormat, SurfaceSize};
use tracing::{debug, error, info, warn};
use windows::core::Interface;
use windows::Win32::Foundation::{CloseHandle, DuplicateHandle, DUPLICATE_SAME_ACCESS, HANDLE};
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::IDXGIResource;
use windows::Win32::System::Threading::GetCurrentProcess;

use super::device::Dx11Device;
use super::staging::StagingCopy;
use crate::egl::api::*;
use crate::egl::display::as_client_buffer;
use crate::egl::{EglContext, EglDisplay, EglSurface, EglSurfaceKind};
use crate::target::{
    AllocatorOptions, BackendKind, DeviceHealth, ExportedHandle, RenderPath, SharedTarget,
    TargetAllocator,
};

const CLIENT_BUFFER_EXTENSION: &str = "EGL_ANGLE_d3d_texture_client_buffer";

// ---------------------------------------------------------------------------
// D3D targets
// ---------------------------------------------------------------------------

/// The D3D11 side of one allocated target.
struct D3dTarget {
    generation: u64,
    /// Kept alive for as long as the EGL surface renders into it.
    _texture: ID3D11Texture2D,
    /// Legacy shared handle. Owned by the texture, never closed directly.
    shared_handle: HANDLE,
}

fn create_shared_texture(
    device: &ID3D11Device,
    size: SurfaceSize,
) -> Result<(ID3D11Texture2D, HANDLE)> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: size.width(),
        Height: size.height(),
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_R8G8B8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
        CPUAccessFlags: 0,
        MiscFlags: D3D11_RESOURCE_MISC_SHARED.0 as u32,
    };

    let mut texture = None;
    unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture as *mut _)) }
        .with_context(|| format!("CreateTexture2D({size}) failed"))?;
    let texture = texture.ok_or_else(|| anyhow!("CreateTexture2D returned no texture"))?;

    let resource: IDXGIResource = texture.cast()?;
    let shared_handle = unsafe { resource.GetSharedHandle() }.context("GetSharedHandle failed")?;
    if shared_handle.is_invalid() {
        bail!("shared texture has no shared handle");
    }
    Ok((texture, shared_handle))
}

// ---------------------------------------------------------------------------
// AngleAllocator
// ---------------------------------------------------------------------------

pub struct AngleAllocator {
    options: AllocatorOptions,
    // Field order: EGL objects go before the device they were created on.
    targets: Vec<D3dTarget>,
    display: Arc<EglDisplay>,
    device: Arc<Dx11Device>,
    client_buffer_supported: bool,
    degraded_logged: bool,
    next_generation: u64,
}

// SAFETY: every D3D11 object here belongs to a multithread-protected
// device, and the legacy shared handle is a plain value.
unsafe impl Send for AngleAllocator {}

impl AngleAllocator {
    pub fn device(&self) -> &Dx11Device {
        &self.device
    }

    fn create_client_buffer_surface(
        &self,
        texture: &ID3D11Texture2D,
        size: SurfaceSize,
    ) -> Option<EGLSurface> {
        if !self.client_buffer_supported {
            return None;
        }
        let create = self.display.api().create_pbuffer_from_client_buffer?;
        let attribs = [
            EGL_WIDTH,
            size.width() as EGLint,
            EGL_HEIGHT,
            size.height() as EGLint,
            EGL_TEXTURE_FORMAT,
            EGL_TEXTURE_RGBA,
            EGL_TEXTURE_TARGET,
            EGL_TEXTURE_2D,
            EGL_MIPMAP_TEXTURE,
            EGL_FALSE as EGLint,
            EGL_NONE,
        ];
        let surface = unsafe {
            create(
                self.display.raw(),
                EGL_D3D_TEXTURE_ANGLE,
                as_client_buffer(texture.as_raw()),
                self.display.config(),
                attribs.as_ptr(),
            )
        };
        if surface == EGL_NO_SURFACE {
            warn!(
                "eglCreatePbufferFromClientBuffer({size}) failed: {}",
                self.display.api().last_error()
            );
            return None;
        }
        Some(surface)
    }
}

/// Open an ANGLE display on `device`, trying EGL 1.5 platform display, the
/// EXT variant, then the default display.
fn open_angle_display(api: &'static EglApi, device: &Dx11Device) -> Result<Arc<EglDisplay>> {
    let mut raw = EGL_NO_DISPLAY;

    if let Some(get_platform_display) = api.get_platform_display {
        let attribs: [EGLAttrib; 5] = [
            EGL_PLATFORM_ANGLE_TYPE_ANGLE as EGLAttrib,
            EGL_PLATFORM_ANGLE_TYPE_D3D11_ANGLE as EGLAttrib,
            EGL_D3D11_DEVICE_ANGLE as EGLAttrib,
            device.as_raw() as EGLAttrib,
            EGL_NONE as EGLAttrib,
        ];
        raw = unsafe {
            get_platform_display(EGL_PLATFORM_ANGLE_ANGLE, EGL_DEFAULT_DISPLAY, attribs.as_ptr())
        };
        debug!("eglGetPlatformDisplay with shared D3D11 device -> {raw:?}");
    }

    if raw == EGL_NO_DISPLAY {
        if let Some(get_platform_display_ext) = api.get_platform_display_ext {
            // EGLint attributes cannot carry a 64-bit device pointer, so ANGLE
            // creates its own device on the default adapter here.
            let attribs = [
                EGL_PLATFORM_ANGLE_TYPE_ANGLE,
                EGL_PLATFORM_ANGLE_TYPE_D3D11_ANGLE,
                EGL_NONE,
            ];
            raw = unsafe {
                get_platform_display_ext(
                    EGL_PLATFORM_ANGLE_ANGLE,
                    EGL_DEFAULT_DISPLAY,
                    attribs.as_ptr(),
                )
            };
            warn!("Falling back to eglGetPlatformDisplayEXT without a shared D3D11 device");
        }
    }

    if raw == EGL_NO_DISPLAY {
        raw = unsafe { (api.get_display)(EGL_DEFAULT_DISPLAY) };
        warn!("Falling back to eglGetDisplay(EGL_DEFAULT_DISPLAY)");
    }

    EglDisplay::initialize(api, raw, EGL_PBUFFER_BIT, device.verbose())
}

impl TargetAllocator for AngleAllocator {
    type Surface = EglSurface;
    type Context = EglContext;

    fn open(options: &AllocatorOptions) -> Result<Self> {
        let device = Dx11Device::new(options.preferred_adapter, options.verbose)
            .map(Arc::new)
            .context("failed to create D3D11 device")?;
        let api = egl()?;
        let display = open_angle_display(api, &device)?;
        api.load_gl();

        let client_buffer_supported = display.has_extension(CLIENT_BUFFER_EXTENSION)
            && api.create_pbuffer_from_client_buffer.is_some();
        if !client_buffer_supported {
            warn!("{CLIENT_BUFFER_EXTENSION} unavailable, presents will copy through the CPU");
        }
        info!(
            "ANGLE allocator ready (adapter: {})",
            device
                .adapter()
                .map_or_else(|| "default".to_string(), |luid| luid.to_string())
        );

        Ok(Self {
            options: options.clone(),
            targets: Vec::new(),
            display,
            device,
            client_buffer_supported,
            degraded_logged: false,
            next_generation: 1,
        })
    }

    fn backend(&self) -> BackendKind {
        BackendKind::AngleD3d11
    }

    fn allocate(&mut self, size: SurfaceSize) -> Result<SharedTarget<EglSurface>> {
        self.options.check_size(size)?;

        let (texture, shared_handle) = create_shared_texture(self.device.device(), size)?;
        // Make the texture visible to other devices before anyone opens it.
        unsafe { self.device.context().Flush() };
        self.device.check_removed("shared texture creation");

        let (surface, path) = match self.create_client_buffer_surface(&texture, size) {
            Some(raw) => (EglSurface::new(raw, EglSurfaceKind::Pbuffer), RenderPath::ZeroCopy),
            None => {
                let raw = self.display.create_pbuffer(size)?;
                if !self.degraded_logged {
                    warn!("Rendering through the degraded copy path");
                    self.degraded_logged = true;
                }
                let hook = Arc::new(StagingCopy::new(self.device.clone(), texture.clone(), size));
                (
                    EglSurface::new(raw, EglSurfaceKind::Pbuffer).with_hook(hook),
                    RenderPath::Degraded,
                )
            }
        };

        let generation = self.next_generation;
        self.next_generation += 1;
        self.targets.push(D3dTarget {
            generation,
            _texture: texture,
            shared_handle,
        });
        debug!("Allocated shared texture {size} (generation {generation}, {path:?})");

        Ok(SharedTarget {
            surface,
            size,
            format: PixelFormat::Rgba8Unorm,
            generation,
            path,
        })
    }

    fn create_offscreen_surface(&mut self) -> Result<EglSurface> {
        let raw = self.display.create_pbuffer(SurfaceSize::new(1, 1)?)?;
        Ok(EglSurface::new(raw, EglSurfaceKind::Pbuffer))
    }

    fn create_context(&mut self, share_with: Option<&EglContext>) -> Result<EglContext> {
        EglContext::create(&self.display, share_with)
    }

    fn export(&self, target: &SharedTarget<EglSurface>) -> Result<Option<ExportedHandle>> {
        let d3d = self
            .targets
            .iter()
            .find(|t| t.generation == target.generation)
            .ok_or_else(|| anyhow!("target generation {} is not live", target.generation))?;

        let mut duplicate = HANDLE::default();
        unsafe {
            let process = GetCurrentProcess();
            DuplicateHandle(
                process,
                d3d.shared_handle,
                process,
                &mut duplicate,
                0,
                false.into(),
                DUPLICATE_SAME_ACCESS,
            )
        }
        .context("DuplicateHandle on shared texture failed")?;

        let raw = duplicate.0 as usize;
        Ok(Some(ExportedHandle::new(NativeHandle(raw), move || {
            if let Err(e) = unsafe { CloseHandle(HANDLE(raw as *mut _)) } {
                error!("CloseHandle on exported texture handle failed: {e}");
            }
        })))
    }

    fn release_target(&mut self, target: SharedTarget<EglSurface>) {
        self.display.destroy_surface(target.surface.raw());
        self.targets.retain(|t| t.generation != target.generation);
        debug!(
            "Released shared texture {} (generation {})",
            target.size, target.generation
        );
    }

    fn release_surface(&mut self, surface: EglSurface) {
        self.display.destroy_surface(surface.raw());
    }

    fn device_health(&self) -> DeviceHealth {
        match self.device.removed_reason() {
            None => DeviceHealth::Healthy,
            Some(reason) => DeviceHealth::Lost(reason),
        }
    }
}
