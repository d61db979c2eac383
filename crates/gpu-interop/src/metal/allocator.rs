//! Render targets backed by IOSurfaces.
//!
//! Each target is an RGBA8 IOSurface with a Metal texture aliasing it. The
//! compositor receives the IOSurface itself, retained once per export, and
//! samples the same memory the engine renders into.

use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};
use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2_core_foundation::{CFDictionary, CFNumber, CFRetained, CFString};
use objc2_io_surface::IOSurfaceRef;
use objc2_metal::{
    MTLCommandBuffer, MTLCommandQueue, MTLDevice, MTLPixelFormat, MTLStorageMode, MTLTexture,
    MTLTextureDescriptor, MTLTextureType, MTLTextureUsage,
};
use surface_core::{NativeHandle, PixelFormat, SurfaceSize};
use tracing::{debug, trace};

use super::device::MetalDevice;
use crate::current::{self, ContextId};
use crate::target::{
    AllocatorOptions, BackendKind, ExportedHandle, NativeContext, RenderPath, SharedTarget,
    TargetAllocator,
};

/// Pixel format FourCC for RGBA8 ('RGBA' = 0x52474241).
const IOSURFACE_PIXEL_FORMAT_RGBA: u32 = 0x52474241;

// ---------------------------------------------------------------------------
// IOSurface / texture creation
// ---------------------------------------------------------------------------

fn create_iosurface(size: SurfaceSize) -> Option<CFRetained<IOSurfaceRef>> {
    unsafe {
        let k_width = objc2_io_surface::kIOSurfaceWidth;
        let k_height = objc2_io_surface::kIOSurfaceHeight;
        let k_bpe = objc2_io_surface::kIOSurfaceBytesPerElement;
        let k_pf = objc2_io_surface::kIOSurfacePixelFormat;

        let v_width = CFNumber::new_i32(size.width() as i32);
        let v_height = CFNumber::new_i32(size.height() as i32);
        let v_bpe = CFNumber::new_i32(PixelFormat::Rgba8Unorm.bytes_per_pixel() as i32);
        let v_pf = CFNumber::new_i32(IOSURFACE_PIXEL_FORMAT_RGBA as i32);

        let keys: &[&CFString] = &[k_width, k_height, k_bpe, k_pf];
        let values: &[&CFNumber] = &[&v_width, &v_height, &v_bpe, &v_pf];

        let props = CFDictionary::from_slices(keys, values);
        let props_untyped: &CFDictionary = props.cast_unchecked();
        IOSurfaceRef::new(props_untyped)
    }
}

fn texture_descriptor(
    size: SurfaceSize,
    storage: MTLStorageMode,
) -> Retained<MTLTextureDescriptor> {
    let desc = MTLTextureDescriptor::new();
    desc.setTextureType(MTLTextureType::Type2D);
    desc.setPixelFormat(MTLPixelFormat::RGBA8Unorm);
    unsafe {
        desc.setWidth(size.width() as usize);
        desc.setHeight(size.height() as usize);
    }
    desc.setStorageMode(storage);
    desc.setUsage(MTLTextureUsage::RenderTarget | MTLTextureUsage::ShaderRead);
    desc
}

// ---------------------------------------------------------------------------
// MetalSurface
// ---------------------------------------------------------------------------

/// A Metal texture, optionally aliasing an IOSurface.
#[derive(Clone)]
pub struct MetalSurface {
    texture: Retained<ProtocolObject<dyn MTLTexture>>,
    iosurface: Option<CFRetained<IOSurfaceRef>>,
}

// SAFETY: Metal textures and IOSurfaces are reference-counted and safe to
// retain and release from any thread; rendering into them is confined to the
// thread the owning context is current on.
unsafe impl Send for MetalSurface {}
unsafe impl Sync for MetalSurface {}

impl MetalSurface {
    pub fn texture(&self) -> &ProtocolObject<dyn MTLTexture> {
        &self.texture
    }

    pub fn iosurface(&self) -> Option<&IOSurfaceRef> {
        self.iosurface.as_deref()
    }
}

// ---------------------------------------------------------------------------
// MetalContext
// ---------------------------------------------------------------------------

/// A rendering context: one command queue on the shared device.
pub struct MetalContext {
    id: ContextId,
    queue: Retained<ProtocolObject<dyn MTLCommandQueue>>,
    shared_with: Option<ContextId>,
}

// SAFETY: MTLCommandQueue is thread-safe.
unsafe impl Send for MetalContext {}
unsafe impl Sync for MetalContext {}

impl MetalContext {
    pub fn queue(&self) -> &ProtocolObject<dyn MTLCommandQueue> {
        &self.queue
    }

    pub fn shared_with(&self) -> Option<ContextId> {
        self.shared_with
    }
}

impl NativeContext for MetalContext {
    type Surface = MetalSurface;

    fn id(&self) -> ContextId {
        self.id
    }

    fn make_current(&self, _surface: &MetalSurface) -> Result<()> {
        current::bind(self.id);
        Ok(())
    }

    fn done_current(&self) -> Result<()> {
        current::unbind(self.id);
        Ok(())
    }

    fn is_current(&self) -> bool {
        current::is_current(self.id)
    }

    /// Commit an empty command buffer and wait for it. Buffers on one queue
    /// complete in order, so this waits for everything submitted before.
    fn finish(&self, _surface: &MetalSurface) -> Result<()> {
        let cb = self
            .queue
            .commandBuffer()
            .ok_or_else(|| anyhow!("failed to create Metal command buffer"))?;
        cb.commit();
        cb.waitUntilCompleted();
        trace!("Metal queue drained for context {}", self.id.get());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MetalAllocator
// ---------------------------------------------------------------------------

pub struct MetalAllocator {
    options: AllocatorOptions,
    device: Arc<MetalDevice>,
    next_generation: u64,
}

impl TargetAllocator for MetalAllocator {
    type Surface = MetalSurface;
    type Context = MetalContext;

    fn open(options: &AllocatorOptions) -> Result<Self> {
        let device = MetalDevice::new().context("Metal is unavailable")?;
        Ok(Self {
            options: options.clone(),
            device: Arc::new(device),
            next_generation: 1,
        })
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Metal
    }

    fn allocate(&mut self, size: SurfaceSize) -> Result<SharedTarget<MetalSurface>> {
        self.options.check_size(size)?;

        let iosurface =
            create_iosurface(size).ok_or_else(|| anyhow!("IOSurface creation failed for {size}"))?;
        let desc = texture_descriptor(size, MTLStorageMode::Shared);
        let texture = self
            .device
            .device()
            .newTextureWithDescriptor_iosurface_plane(&desc, &iosurface, 0)
            .ok_or_else(|| anyhow!("Metal texture creation from IOSurface failed for {size}"))?;

        let generation = self.next_generation;
        self.next_generation += 1;
        debug!("Allocated IOSurface target {size} (generation {generation})");

        Ok(SharedTarget {
            surface: MetalSurface {
                texture,
                iosurface: Some(iosurface),
            },
            size,
            format: PixelFormat::Rgba8Unorm,
            generation,
            path: RenderPath::ZeroCopy,
        })
    }

    fn create_offscreen_surface(&mut self) -> Result<MetalSurface> {
        let desc = texture_descriptor(SurfaceSize::new(1, 1)?, MTLStorageMode::Private);
        let texture = self
            .device
            .device()
            .newTextureWithDescriptor(&desc)
            .ok_or_else(|| anyhow!("failed to create 1x1 offscreen texture"))?;
        Ok(MetalSurface {
            texture,
            iosurface: None,
        })
    }

    fn create_context(&mut self, share_with: Option<&MetalContext>) -> Result<MetalContext> {
        let queue = self
            .device
            .new_queue()
            .ok_or_else(|| anyhow!("failed to create Metal command queue"))?;
        Ok(MetalContext {
            id: ContextId::next(),
            queue,
            shared_with: share_with.map(|c| c.id),
        })
    }

    fn export(&self, target: &SharedTarget<MetalSurface>) -> Result<Option<ExportedHandle>> {
        let iosurface = target
            .surface
            .iosurface
            .clone()
            .ok_or_else(|| anyhow!("target has no IOSurface"))?;
        let handle = NativeHandle(&*iosurface as *const IOSurfaceRef as usize);
        let retained = RetainedSurface(iosurface);
        Ok(Some(ExportedHandle::new(handle, move || drop(retained))))
    }

    fn release_target(&mut self, target: SharedTarget<MetalSurface>) {
        debug!(
            "Released IOSurface target {} (generation {})",
            target.size, target.generation
        );
    }

    fn release_surface(&mut self, _surface: MetalSurface) {}
}

/// One retain on an IOSurface held on behalf of the compositor.
struct RetainedSurface(CFRetained<IOSurfaceRef>);

// SAFETY: IOSurface retain/release is thread-safe.
unsafe impl Send for RetainedSurface {}
