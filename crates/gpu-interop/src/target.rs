//! Common interface for shared render targets and native contexts.

use std::fmt;

use anyhow::Result;
use surface_core::{
    AdapterLuid, BridgeConfig, NativeHandle, NativeWindow, PixelFormat, SurfaceSize,
};

use crate::current::ContextId;

/// Which platform implementation produced a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Headless,
    /// EGL window surface, composited by the OS.
    EglWindow,
    /// EGL over D3D11 through ANGLE.
    AngleD3d11,
    Metal,
}

/// How rendered pixels reach the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPath {
    /// Rendering lands directly in the exported resource.
    ZeroCopy,
    /// Rendering goes to a private surface and is copied into the exported
    /// resource on every present.
    Degraded,
    /// The OS composites the window surface; nothing is exported.
    WindowComposition,
}

/// Result of a device health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceHealth {
    Healthy,
    /// The device was removed or reset. Recovery is a destroy + create.
    Lost(String),
}

/// Inputs an allocator needs at construction time.
#[derive(Debug, Clone, Default)]
pub struct AllocatorOptions {
    /// Adapter the compositor runs on. Targets are created there so the
    /// exported handle can be opened without a cross-adapter copy.
    pub preferred_adapter: Option<AdapterLuid>,
    /// Host-owned window for backends that composite through the OS.
    pub native_window: Option<NativeWindow>,
    /// Requests larger than this on either axis are refused. `0` means no
    /// limit.
    pub max_texture_dimension: u32,
    pub verbose: bool,
}

impl AllocatorOptions {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            preferred_adapter: config.preferred_adapter,
            native_window: None,
            max_texture_dimension: config.max_texture_dimension,
            verbose: config.verbose_logging(),
        }
    }

    /// Reject `size` if it exceeds the configured texture limit.
    pub fn check_size(&self, size: SurfaceSize) -> Result<()> {
        if self.max_texture_dimension != 0 && size.exceeds(self.max_texture_dimension) {
            anyhow::bail!(
                "requested {size} exceeds the maximum texture dimension {}",
                self.max_texture_dimension
            );
        }
        Ok(())
    }
}

/// One GPU-resident render target.
///
/// `generation` increases with every allocation an allocator performs, so a
/// resize always yields a target with a strictly larger generation.
#[derive(Debug, Clone)]
pub struct SharedTarget<S> {
    pub surface: S,
    pub size: SurfaceSize,
    pub format: PixelFormat,
    pub generation: u64,
    pub path: RenderPath,
}

/// A handle duplicated for the compositor together with the action that
/// releases it.
///
/// The release runs exactly once: either through [`ExportedHandle::release`]
/// or when the value is dropped.
pub struct ExportedHandle {
    handle: NativeHandle,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ExportedHandle {
    pub fn new(handle: NativeHandle, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            handle,
            release: Some(Box::new(release)),
        }
    }

    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    /// Give up ownership of the release action. The caller becomes
    /// responsible for running it.
    pub fn into_release(mut self) -> Box<dyn FnOnce() + Send> {
        self.release.take().unwrap_or_else(|| Box::new(|| {}))
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ExportedHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for ExportedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedHandle")
            .field("handle", &self.handle)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// One platform rendering context.
///
/// Contexts created by the same allocator with `share_with` set share one
/// GPU object namespace: textures and buffers created on one are visible on
/// the other.
pub trait NativeContext: Send + Sync + 'static {
    type Surface: Clone + Send + Sync + 'static;

    fn id(&self) -> ContextId;

    /// Bind this context and `surface` to the calling thread.
    fn make_current(&self, surface: &Self::Surface) -> Result<()>;

    /// Unbind whatever this context has bound on the calling thread.
    fn done_current(&self) -> Result<()>;

    /// Whether this context is bound to the calling thread.
    fn is_current(&self) -> bool;

    /// Block until all GPU work submitted through this context has
    /// completed, so the compositor never samples a partial frame.
    fn finish(&self, surface: &Self::Surface) -> Result<()>;
}

/// Produces render targets, offscreen surfaces, and paired contexts for one
/// platform.
pub trait TargetAllocator: Send + 'static {
    type Surface: Clone + Send + Sync + 'static;
    type Context: NativeContext<Surface = Self::Surface>;

    /// Acquire the display/device. Fails if the platform graphics stack is
    /// unavailable.
    fn open(options: &AllocatorOptions) -> Result<Self>
    where
        Self: Sized;

    fn backend(&self) -> BackendKind;

    /// Allocate a shareable target of exactly `size`.
    fn allocate(&mut self, size: SurfaceSize) -> Result<SharedTarget<Self::Surface>>;

    /// A minimal (1x1) surface for contexts that never present.
    fn create_offscreen_surface(&mut self) -> Result<Self::Surface>;

    /// Create a context, sharing objects with `share_with` when given.
    fn create_context(&mut self, share_with: Option<&Self::Context>) -> Result<Self::Context>;

    /// Duplicate the target's handle for the compositor. `Ok(None)` means
    /// this backend does not export handles.
    fn export(&self, target: &SharedTarget<Self::Surface>) -> Result<Option<ExportedHandle>>;

    /// Drop the allocator's reference to `target`. Handles already exported
    /// keep the underlying resource alive until they are released.
    fn release_target(&mut self, target: SharedTarget<Self::Surface>);

    /// Destroy a surface from [`create_offscreen_surface`](Self::create_offscreen_surface).
    fn release_surface(&mut self, surface: Self::Surface);

    fn device_health(&self) -> DeviceHealth {
        DeviceHealth::Healthy
    }
}
