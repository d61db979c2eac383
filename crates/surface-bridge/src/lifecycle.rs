//! Surface lifecycle: `Uninitialized -> Created -> (resize)* -> Destroyed`.
//!
//! The controller owns the factory and enforces ordering between the host's
//! create/resize/destroy calls and the render engine: the engine is built at
//! most once per surface, resize rebinds before it releases, and destroy
//! silences presents before any resource goes away.

use std::sync::Arc;

use gpu_interop::{AllocatorOptions, TargetAllocator};
use surface_core::{SurfaceError, SurfaceSize};
use tracing::{debug, info, warn};

use crate::descriptor::FrameDescriptor;
use crate::engine::{DrawEngineParams, FactoryHandle, RenderEngine};
use crate::factory::{ContextFactory, GraphicsContextFactory};
use crate::notifier::FrameNotifier;
use crate::task_queue::TaskQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    Uninitialized,
    Created,
    /// Terminal. A new surface needs a new controller.
    Destroyed,
}

pub struct SurfaceController<A: TargetAllocator> {
    state: SurfaceState,
    factory: Option<Arc<ContextFactory<A>>>,
    size: Option<SurfaceSize>,
    density: f32,
    draw_engine_created: bool,
}

impl<A: TargetAllocator> Default for SurfaceController<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: TargetAllocator> SurfaceController<A> {
    pub fn new() -> Self {
        Self {
            state: SurfaceState::Uninitialized,
            factory: None,
            size: None,
            density: 1.0,
            draw_engine_created: false,
        }
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    pub fn size(&self) -> Option<SurfaceSize> {
        self.size
    }

    pub fn density(&self) -> f32 {
        self.density
    }

    pub fn factory(&self) -> Option<&Arc<ContextFactory<A>>> {
        self.factory.as_ref()
    }

    pub fn is_draw_engine_created(&self) -> bool {
        self.draw_engine_created
    }

    /// Build the factory at `size` and start the draw engine on it.
    ///
    /// Calling this again on a created surface is idempotent; a different
    /// size is treated as a resize.
    pub fn create(
        &mut self,
        engine: &mut dyn RenderEngine,
        options: &AllocatorOptions,
        size: SurfaceSize,
        density: f32,
        notifier: &Arc<FrameNotifier>,
        gui_queue: &Arc<dyn TaskQueue>,
    ) -> Result<(), SurfaceError> {
        match self.state {
            SurfaceState::Destroyed => return Err(SurfaceError::Destroyed),
            SurfaceState::Created => {
                debug!("Surface already created, treating create({size}) as resize");
                self.density = density;
                self.resize(engine, size)?;
                return Ok(());
            }
            SurfaceState::Uninitialized => {}
        }

        let factory = Arc::new(ContextFactory::<A>::new(options, size));
        if !factory.is_valid() {
            return Err(SurfaceError::FactoryInvalid);
        }

        // Registered before the engine exists so its first frame is seen.
        let frame_notifier = notifier.clone();
        engine.set_active_frame_callback(Some(Arc::new(move || {
            frame_notifier.notify();
        })));

        if !self.draw_engine_created {
            let handle: FactoryHandle = Arc::downgrade(&factory) as FactoryHandle;
            let params = DrawEngineParams {
                size,
                density,
                backend: factory.backend().unwrap_or(gpu_interop::BackendKind::Headless),
                gui_queue: gui_queue.clone(),
            };
            if let Err(e) = engine.create_draw_engine(handle, params) {
                engine.set_active_frame_callback(None);
                return Err(SurfaceError::Engine(format!("{e:#}")));
            }
            self.draw_engine_created = true;
        }

        info!("Surface created at {size} (density {density})");
        self.factory = Some(factory);
        self.size = Some(size);
        self.density = density;
        self.state = SurfaceState::Created;
        Ok(())
    }

    /// Reallocate the render target. Returns `Ok(false)` when `size` equals
    /// the current size and nothing was done.
    pub fn resize(
        &mut self,
        engine: &mut dyn RenderEngine,
        size: SurfaceSize,
    ) -> Result<bool, SurfaceError> {
        match self.state {
            SurfaceState::Uninitialized => return Err(SurfaceError::NotCreated),
            SurfaceState::Destroyed => return Err(SurfaceError::Destroyed),
            SurfaceState::Created => {}
        }
        if self.size == Some(size) {
            return Ok(false);
        }
        let factory = self.factory.as_ref().ok_or(SurfaceError::NotCreated)?;
        if !factory.resize(size) {
            return Err(SurfaceError::ResizeFailed {
                width: size.width(),
                height: size.height(),
            });
        }
        self.size = Some(size);
        if self.draw_engine_created {
            engine.on_size(size);
        }
        Ok(true)
    }

    /// Stop rendering and release every resource. Returns `false` when there
    /// was nothing to destroy.
    pub fn destroy(&mut self, engine: &mut dyn RenderEngine) -> bool {
        if self.state != SurfaceState::Created {
            return false;
        }

        if self.draw_engine_created {
            engine.set_rendering_enabled(false);
        }
        if let Some(factory) = self.factory.take() {
            factory.set_present_available(false);
            factory.teardown();
            if self.draw_engine_created {
                engine.destroy_draw_engine();
            }
            if Arc::strong_count(&factory) > 1 {
                warn!("Render engine still holds the context factory after destroy");
            }
        }

        self.draw_engine_created = false;
        self.state = SurfaceState::Destroyed;
        info!("Surface destroyed");
        true
    }

    /// Export a handle to the current render target.
    pub fn frame_descriptor(&self) -> Option<FrameDescriptor> {
        if self.state != SurfaceState::Created {
            return None;
        }
        self.factory.as_ref()?.export_current()
    }
}
