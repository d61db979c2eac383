//! Hooks into the external render engine.
//!
//! The engine is not part of the bridge. It receives a non-owning handle to
//! the context factory, spawns its own draw and upload threads, and calls
//! back into the factory from them. The bridge drives it only through
//! [`RenderEngine`].

use std::sync::{Arc, Weak};

use gpu_interop::BackendKind;
use surface_core::SurfaceSize;

use crate::factory::GraphicsContextFactory;
use crate::task_queue::TaskQueue;

/// Non-owning factory handle given to the engine. Upgrading fails once the
/// surface is destroyed, which is the engine's signal to stop rendering.
pub type FactoryHandle = Weak<dyn GraphicsContextFactory>;

/// Called by the engine after it renders a frame.
pub type ActiveFrameCallback = Arc<dyn Fn() + Send + Sync>;

/// Parameters for draw engine construction.
#[derive(Clone)]
pub struct DrawEngineParams {
    pub size: SurfaceSize,
    /// Physical pixels per logical pixel.
    pub density: f32,
    pub backend: BackendKind,
    /// Where the engine posts work that must run on the host's UI thread.
    pub gui_queue: Arc<dyn TaskQueue>,
}

pub trait RenderEngine: Send {
    /// Register the per-frame hook. Installed before the draw engine is
    /// created so the first frame is not missed.
    fn set_active_frame_callback(&mut self, callback: Option<ActiveFrameCallback>);

    /// Build the draw engine against `factory`. Called once per surface.
    fn create_draw_engine(
        &mut self,
        factory: FactoryHandle,
        params: DrawEngineParams,
    ) -> anyhow::Result<()>;

    fn set_rendering_enabled(&mut self, enabled: bool);

    /// New surface size in physical pixels.
    fn on_size(&mut self, size: SurfaceSize);

    /// Release the draw engine and everything holding the factory handle.
    /// Called on destroy after rendering was disabled.
    fn destroy_draw_engine(&mut self) {}
}
