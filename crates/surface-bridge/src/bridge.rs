//! The application context object that owns one surface and its engine
//! wiring.
//!
//! Hosts create one [`SurfaceBridge`] per embedded view and call into it
//! from their platform channel. Host-facing calls take `&mut self`; a host
//! that serves compositor callbacks from another thread wraps the bridge in
//! a mutex.

use std::sync::Arc;

use gpu_interop::{AllocatorOptions, DeviceHealth, PlatformAllocator, TargetAllocator};
use surface_core::{
    AdapterLuid, BridgeConfig, NativeWindow, SurfaceError, SurfaceId, SurfaceSize,
};
use tracing::{debug, error, info, trace, warn};

use crate::descriptor::FrameDescriptor;
use crate::engine::RenderEngine;
use crate::factory::ContextFactory;
use crate::lifecycle::{SurfaceController, SurfaceState};
use crate::notifier::{FrameNotifier, FrameReadyCallback};
use crate::task_queue::{Task, TaskQueue};

pub struct SurfaceBridge<A: TargetAllocator = PlatformAllocator> {
    config: BridgeConfig,
    native_window: Option<NativeWindow>,
    controller: SurfaceController<A>,
    engine: Box<dyn RenderEngine>,
    notifier: Arc<FrameNotifier>,
    gui_queue: Arc<dyn TaskQueue>,
    surface_id: Option<SurfaceId>,
    next_surface_id: i64,
}

impl<A: TargetAllocator> SurfaceBridge<A> {
    pub fn new(
        config: BridgeConfig,
        engine: Box<dyn RenderEngine>,
        gui_queue: Arc<dyn TaskQueue>,
    ) -> Self {
        debug!("Surface bridge configured: {config:?}");
        let notifier = Arc::new(FrameNotifier::new(config.frame_interval()));
        Self {
            config,
            native_window: None,
            controller: SurfaceController::new(),
            engine,
            notifier,
            gui_queue,
            surface_id: None,
            next_surface_id: 1,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Pin render targets to the adapter the compositor runs on. Applies to
    /// the next created surface.
    pub fn set_preferred_adapter(&mut self, adapter: Option<AdapterLuid>) {
        match adapter {
            Some(luid) => info!("Preferred adapter set to {luid}"),
            None => info!("Preferred adapter cleared"),
        }
        self.config.preferred_adapter = adapter;
    }

    /// Host-owned window for backends that composite through the OS.
    /// Applies to the next created surface.
    pub fn set_native_window(&mut self, window: Option<NativeWindow>) {
        self.native_window = window;
    }

    /// Create the surface at `width`x`height` physical pixels.
    ///
    /// Repeated calls on a live surface return the same id and resize it if
    /// the dimensions changed. After a destroy a fresh surface is built.
    pub fn create_surface(
        &mut self,
        width: i32,
        height: i32,
        density: f32,
    ) -> Result<SurfaceId, SurfaceError> {
        let size = SurfaceSize::from_signed(width, height)?;

        if self.controller.state() == SurfaceState::Destroyed {
            self.controller = SurfaceController::new();
            self.surface_id = None;
        }

        let mut options = AllocatorOptions::from_config(&self.config);
        options.native_window = self.native_window;

        if let Err(e) = self.controller.create(
            self.engine.as_mut(),
            &options,
            size,
            density,
            &self.notifier,
            &self.gui_queue,
        ) {
            error!("create_surface({size}) failed: {e}");
            return Err(e);
        }

        let id = match self.surface_id {
            Some(id) => id,
            None => {
                let id = SurfaceId(self.next_surface_id);
                self.next_surface_id += 1;
                self.surface_id = Some(id);
                id
            }
        };
        Ok(id)
    }

    pub fn resize_surface(&mut self, width: i32, height: i32) -> Result<(), SurfaceError> {
        let size = SurfaceSize::from_signed(width, height)?;
        match self.controller.resize(self.engine.as_mut(), size) {
            Ok(true) => debug!("Surface resized to {size}"),
            Ok(false) => trace!("Resize to current size {size} ignored"),
            Err(e) => {
                warn!("resize_surface({size}) failed: {e}");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Tear the surface down. A no-op when nothing is live.
    pub fn destroy_surface(&mut self) {
        if self.controller.destroy(self.engine.as_mut()) {
            self.surface_id = None;
        }
    }

    /// Duplicate the current frame's handle for the compositor.
    ///
    /// The requested size is advisory: the descriptor always reports the
    /// render target's actual size and the compositor scales.
    pub fn obtain_current_frame_descriptor(
        &self,
        requested_width: usize,
        requested_height: usize,
    ) -> Option<FrameDescriptor> {
        let descriptor = self.controller.frame_descriptor()?;
        let served = (descriptor.width() as usize, descriptor.height() as usize);
        if (requested_width, requested_height) != served {
            trace!(
                "Compositor asked for {requested_width}x{requested_height}, serving {}",
                descriptor.size()
            );
        }
        Some(descriptor)
    }

    /// Install or clear the host's frame-ready callback.
    pub fn set_frame_ready_callback(&self, callback: Option<FrameReadyCallback>) {
        self.notifier.set_callback(callback);
    }

    /// Check the graphics device. Loss is logged; recovery is a destroy
    /// followed by a create.
    pub fn check_device_health(&self) -> DeviceHealth {
        let health = match self.controller.factory() {
            Some(factory) => factory.device_health(),
            None => DeviceHealth::Healthy,
        };
        if let DeviceHealth::Lost(reason) = &health {
            error!("Graphics device lost: {reason}");
        }
        health
    }

    /// Queue work for the host's UI thread.
    pub fn post_gui_task(&self, task: Task) -> bool {
        self.gui_queue.push(task)
    }

    pub fn surface_state(&self) -> SurfaceState {
        self.controller.state()
    }

    pub fn surface_id(&self) -> Option<SurfaceId> {
        self.surface_id
    }

    pub fn surface_size(&self) -> Option<SurfaceSize> {
        match self.controller.state() {
            SurfaceState::Created => self.controller.size(),
            _ => None,
        }
    }

    pub fn factory(&self) -> Option<&Arc<ContextFactory<A>>> {
        self.controller.factory()
    }

    pub fn notifier(&self) -> &Arc<FrameNotifier> {
        &self.notifier
    }

    pub fn engine(&self) -> &dyn RenderEngine {
        self.engine.as_ref()
    }
}

impl<A: TargetAllocator> Drop for SurfaceBridge<A> {
    fn drop(&mut self) {
        self.destroy_surface();
    }
}
