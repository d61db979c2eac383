//! Lazy creation of the draw/upload context pair around one shared render
//! target.
//!
//! The factory is handed to the render engine as a non-owning
//! [`FactoryHandle`](crate::engine::FactoryHandle); the engine's draw and
//! upload threads call [`GraphicsContextFactory`] methods from whatever
//! thread they run on. Construction never fails outright: platform errors
//! are logged and reported through [`GraphicsContextFactory::is_valid`].

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context as _, Result};
use gpu_interop::{
    AllocatorOptions, BackendKind, DeviceHealth, RenderPath, SharedTarget, TargetAllocator,
};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use surface_core::SurfaceSize;
use tracing::{debug, error, info, warn};

use crate::context::{ContextRole, GraphicsContext, RenderContext};
use crate::descriptor::FrameDescriptor;
use crate::rendezvous::InitRendezvous;

/// Engine-facing factory interface. Object-safe so the engine never sees
/// the platform allocator type.
pub trait GraphicsContextFactory: Send + Sync {
    /// The draw context, created on first call (after the upload context,
    /// which it shares objects with). `None` if the factory is invalid.
    fn draw_context(&self) -> Option<&dyn RenderContext>;

    /// The upload context, created on first call. `None` if the factory is
    /// invalid.
    fn resources_upload_context(&self) -> Option<&dyn RenderContext>;

    fn is_draw_context_created(&self) -> bool;

    fn is_upload_context_created(&self) -> bool;

    /// Block until both the draw and the upload thread have called this.
    fn wait_for_initialization(&self, context: &dyn RenderContext);

    /// Forwarded to the draw context, if it exists.
    fn set_present_available(&self, available: bool);

    fn is_valid(&self) -> bool;

    fn backend(&self) -> Option<BackendKind>;
}

struct FactoryState<A: TargetAllocator> {
    allocator: Option<A>,
    target: Option<SharedTarget<A::Surface>>,
    upload_surface: Option<A::Surface>,
    torn_down: bool,
}

pub struct ContextFactory<A: TargetAllocator> {
    // Field order is drop order: draw goes before upload, and both go before
    // the allocator that created them.
    draw: OnceCell<GraphicsContext<A::Context>>,
    upload: OnceCell<GraphicsContext<A::Context>>,
    state: Mutex<FactoryState<A>>,
    rendezvous: InitRendezvous,
    valid: AtomicBool,
    backend: Option<BackendKind>,
}

impl<A: TargetAllocator> ContextFactory<A> {
    /// Open the platform allocator and allocate the first render target.
    pub fn new(options: &AllocatorOptions, size: SurfaceSize) -> Self {
        let mut state = FactoryState {
            allocator: None,
            target: None,
            upload_surface: None,
            torn_down: false,
        };

        let valid = match A::open(options) {
            Ok(mut allocator) => {
                let allocated = allocator.allocate(size);
                let backend = allocator.backend();
                state.allocator = Some(allocator);
                match allocated {
                    Ok(target) => {
                        info!(
                            "Context factory ready: {backend:?}, {size}, {:?}",
                            target.path
                        );
                        state.target = Some(target);
                        true
                    }
                    Err(e) => {
                        error!("Failed to allocate initial {size} render target: {e:#}");
                        false
                    }
                }
            }
            Err(e) => {
                error!("Failed to open graphics allocator: {e:#}");
                false
            }
        };

        let backend = state.allocator.as_ref().map(|a| a.backend());
        Self {
            draw: OnceCell::new(),
            upload: OnceCell::new(),
            state: Mutex::new(state),
            rendezvous: InitRendezvous::new(),
            valid: AtomicBool::new(valid),
            backend,
        }
    }

    // -----------------------------------------------------------------------
    // Contexts
    // -----------------------------------------------------------------------

    /// Typed access to the upload context.
    pub fn upload(&self) -> Option<&GraphicsContext<A::Context>> {
        if let Some(ctx) = self.upload.get() {
            return Some(ctx);
        }
        if !self.is_valid() {
            return None;
        }
        let created = self.upload.get_or_try_init(|| -> Result<_> {
            let mut state = self.state.lock();
            let allocator = state.allocator.as_mut().context("allocator unavailable")?;
            let surface = allocator.create_offscreen_surface()?;
            let native = match allocator.create_context(None) {
                Ok(native) => native,
                Err(e) => {
                    allocator.release_surface(surface);
                    return Err(e);
                }
            };
            state.upload_surface = Some(surface.clone());
            debug!("Upload context created");
            Ok(GraphicsContext::new(ContextRole::Upload, native, Some(surface)))
        });
        self.absorb(ContextRole::Upload, created)
    }

    /// Typed access to the draw context. Creates the upload context first.
    pub fn draw(&self) -> Option<&GraphicsContext<A::Context>> {
        if let Some(ctx) = self.draw.get() {
            return Some(ctx);
        }
        if !self.is_valid() {
            return None;
        }
        let upload = self.upload()?;
        let created = self.draw.get_or_try_init(|| -> Result<_> {
            let mut state = self.state.lock();
            let surface = state
                .target
                .as_ref()
                .map(|t| t.surface.clone())
                .context("no render target")?;
            let allocator = state.allocator.as_mut().context("allocator unavailable")?;
            let native = allocator.create_context(Some(upload.native()))?;
            debug!("Draw context created");
            Ok(GraphicsContext::new(ContextRole::Draw, native, Some(surface)))
        });
        self.absorb(ContextRole::Draw, created)
    }

    fn absorb<'a>(
        &self,
        role: ContextRole,
        created: Result<&'a GraphicsContext<A::Context>>,
    ) -> Option<&'a GraphicsContext<A::Context>> {
        match created {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                error!("Failed to create {role:?} context: {e:#}");
                self.valid.store(false, Ordering::Release);
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Render target
    // -----------------------------------------------------------------------

    /// Reallocate the render target at `size` and retarget the draw context.
    ///
    /// Equal dimensions are a no-op. The previous target is released only
    /// after the draw context points at the new one. On failure the factory
    /// becomes invalid and the previous target stays bound.
    pub fn resize(&self, size: SurfaceSize) -> bool {
        let mut state = self.state.lock();
        if state.torn_down {
            warn!("Resize to {size} after teardown ignored");
            return false;
        }
        if state.target.as_ref().is_some_and(|t| t.size == size) {
            return true;
        }

        let FactoryState {
            allocator, target, ..
        } = &mut *state;
        let Some(allocator) = allocator.as_mut() else {
            return false;
        };

        let next = match allocator.allocate(size) {
            Ok(next) => next,
            Err(e) => {
                error!("Failed to reallocate render target at {size}: {e:#}");
                self.valid.store(false, Ordering::Release);
                return false;
            }
        };

        info!(
            "Render target resized to {size} (generation {}, {:?})",
            next.generation, next.path
        );
        if let Some(draw) = self.draw.get() {
            draw.set_surface(next.surface.clone());
        }
        if let Some(previous) = target.replace(next) {
            allocator.release_target(previous);
        }
        true
    }

    /// Stop presenting, unbind both contexts from their surfaces, and
    /// release every GPU resource the factory owns. Idempotent.
    pub fn teardown(&self) {
        if let Some(draw) = self.draw.get() {
            draw.set_present_available(false);
            draw.reset_surface();
        }
        if let Some(upload) = self.upload.get() {
            upload.reset_surface();
        }

        let mut state = self.state.lock();
        if state.torn_down {
            return;
        }
        state.torn_down = true;
        self.valid.store(false, Ordering::Release);

        let FactoryState {
            allocator,
            target,
            upload_surface,
            ..
        } = &mut *state;
        if let Some(allocator) = allocator.as_mut() {
            if let Some(target) = target.take() {
                allocator.release_target(target);
            }
            if let Some(surface) = upload_surface.take() {
                allocator.release_surface(surface);
            }
        }
        debug!("Context factory torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.state.lock().torn_down
    }

    /// Duplicate the current target's handle for the compositor.
    ///
    /// `None` when there is no live target, the backend does not export, or
    /// duplication fails (logged).
    pub fn export_current(&self) -> Option<FrameDescriptor> {
        let state = self.state.lock();
        let target = state.target.as_ref()?;
        let allocator = state.allocator.as_ref()?;
        match allocator.export(target) {
            Ok(Some(exported)) => Some(FrameDescriptor::new(
                exported,
                target.size,
                target.format,
                target.generation,
            )),
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to export render target: {e:#}");
                None
            }
        }
    }

    pub fn target_size(&self) -> Option<SurfaceSize> {
        self.state.lock().target.as_ref().map(|t| t.size)
    }

    pub fn target_generation(&self) -> Option<u64> {
        self.state.lock().target.as_ref().map(|t| t.generation)
    }

    pub fn render_path(&self) -> Option<RenderPath> {
        self.state.lock().target.as_ref().map(|t| t.path)
    }

    pub fn device_health(&self) -> DeviceHealth {
        match self.state.lock().allocator.as_ref() {
            Some(allocator) => allocator.device_health(),
            None => DeviceHealth::Lost("no graphics allocator".to_string()),
        }
    }

    /// Run `f` against the allocator, for diagnostics.
    pub fn inspect_allocator<R>(&self, f: impl FnOnce(&A) -> R) -> Option<R> {
        self.state.lock().allocator.as_ref().map(f)
    }

    pub fn is_initialized(&self) -> bool {
        self.rendezvous.is_initialized()
    }
}

impl<A: TargetAllocator> GraphicsContextFactory for ContextFactory<A> {
    fn draw_context(&self) -> Option<&dyn RenderContext> {
        self.draw().map(|c| c as &dyn RenderContext)
    }

    fn resources_upload_context(&self) -> Option<&dyn RenderContext> {
        self.upload().map(|c| c as &dyn RenderContext)
    }

    fn is_draw_context_created(&self) -> bool {
        self.draw.get().is_some()
    }

    fn is_upload_context_created(&self) -> bool {
        self.upload.get().is_some()
    }

    fn wait_for_initialization(&self, context: &dyn RenderContext) {
        self.rendezvous.arrive(context.role());
    }

    fn set_present_available(&self, available: bool) {
        if let Some(draw) = self.draw.get() {
            draw.set_present_available(available);
        }
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn backend(&self) -> Option<BackendKind> {
        self.backend
    }
}

impl<A: TargetAllocator> Drop for ContextFactory<A> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crossbeam_channel::bounded;
    use gpu_interop::headless::HeadlessAllocator;
    use gpu_interop::NativeContext;

    use super::*;

    fn size(w: u32, h: u32) -> SurfaceSize {
        SurfaceSize::new(w, h).unwrap()
    }

    fn factory(w: u32, h: u32) -> ContextFactory<HeadlessAllocator> {
        ContextFactory::new(&AllocatorOptions::default(), size(w, h))
    }

    #[test]
    fn contexts_are_created_once() {
        let factory = factory(800, 600);
        assert!(factory.is_valid());
        assert!(!factory.is_draw_context_created());

        let a = factory.draw_context().unwrap().id();
        let b = factory.draw_context().unwrap().id();
        assert_eq!(a, b);
        // Draw forces upload into existence.
        assert!(factory.is_upload_context_created());
        assert_eq!(
            factory.resources_upload_context().unwrap().id(),
            factory.upload().unwrap().id()
        );
    }

    #[test]
    fn draw_shares_with_upload() {
        let factory = factory(64, 64);
        let draw = factory.draw().unwrap();
        let upload = factory.upload().unwrap();
        assert_eq!(draw.native().namespace(), upload.native().namespace());
        assert_eq!(draw.native().shared_with(), Some(upload.native().id()));
        assert_eq!(draw.role(), ContextRole::Draw);
        assert_eq!(upload.role(), ContextRole::Upload);
    }

    #[test]
    fn concurrent_first_calls_agree() {
        let factory = Arc::new(factory(32, 32));
        let ids: Vec<_> = (0..8)
            .map(|_| {
                let f = factory.clone();
                std::thread::spawn(move || f.draw_context().unwrap().id())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap())
            .collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn invalid_factory_returns_no_contexts() {
        let options = AllocatorOptions {
            max_texture_dimension: 100,
            ..Default::default()
        };
        let factory = ContextFactory::<HeadlessAllocator>::new(&options, size(200, 200));
        assert!(!factory.is_valid());
        assert!(factory.draw_context().is_none());
        assert!(factory.resources_upload_context().is_none());
        assert!(factory.export_current().is_none());
    }

    #[test]
    fn resize_same_size_is_noop() {
        let factory = factory(800, 600);
        let generation = factory.target_generation();
        assert!(factory.resize(size(800, 600)));
        assert_eq!(factory.target_generation(), generation);
    }

    #[test]
    fn resize_rebinds_draw_and_releases_previous() {
        let factory = factory(800, 600);
        let draw = factory.draw().unwrap();
        let before = factory.target_generation().unwrap();

        assert!(factory.resize(size(1024, 768)));
        assert!(factory.target_generation().unwrap() > before);
        assert_eq!(draw.surface().unwrap().size(), size(1024, 768));
        assert_eq!(factory.inspect_allocator(|a| a.live_targets()), Some(1));
    }

    #[test]
    fn failed_resize_keeps_previous_target() {
        let options = AllocatorOptions {
            max_texture_dimension: 1000,
            ..Default::default()
        };
        let factory = ContextFactory::<HeadlessAllocator>::new(&options, size(800, 600));
        let draw = factory.draw().unwrap();
        assert!(!factory.resize(size(2000, 600)));
        assert!(!factory.is_valid());
        assert_eq!(factory.target_size(), Some(size(800, 600)));
        assert_eq!(draw.surface().unwrap().size(), size(800, 600));
    }

    #[test]
    fn export_reports_current_target() {
        let factory = factory(800, 600);
        let d = factory.export_current().unwrap();
        assert_eq!((d.width(), d.height()), (800, 600));
        assert_eq!(Some(d.generation()), factory.target_generation());
        assert_eq!(factory.inspect_allocator(|a| a.outstanding_exports()), Some(1));
        d.release();
        assert_eq!(factory.inspect_allocator(|a| a.outstanding_exports()), Some(0));
    }

    #[test]
    fn teardown_releases_everything_and_is_idempotent() {
        let factory = factory(128, 128);
        let draw = factory.draw().unwrap();
        draw.make_current();
        factory.teardown();
        factory.teardown();

        assert!(factory.is_torn_down());
        assert!(!factory.is_valid());
        assert!(!draw.is_present_available());
        assert!(!draw.has_surface());
        assert!(!draw.native().is_current());
        assert!(factory.export_current().is_none());
        assert_eq!(factory.inspect_allocator(|a| a.live_targets()), Some(0));
        assert!(!factory.resize(size(64, 64)));
    }

    #[test]
    fn rendezvous_through_factory() {
        let factory = Arc::new(factory(16, 16));
        let (tx, rx) = bounded(2);
        let threads: Vec<_> = [ContextRole::Draw, ContextRole::Upload]
            .into_iter()
            .map(|role| {
                let f = factory.clone();
                let tx = tx.clone();
                std::thread::spawn(move || {
                    let ctx = match role {
                        ContextRole::Draw => f.draw_context().unwrap(),
                        ContextRole::Upload => f.resources_upload_context().unwrap(),
                    };
                    ctx.make_current();
                    f.wait_for_initialization(ctx);
                    tx.send(ctx.validate()).unwrap();
                })
            })
            .collect();

        let first_valid = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second_valid = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        for t in threads {
            t.join().unwrap();
        }
        assert!(factory.is_initialized());
        // Both contexts validate while bound on their own threads.
        assert!(first_valid && second_valid);
    }

    #[test]
    fn present_racing_teardown_stops_at_teardown() {
        let factory = Arc::new(factory(32, 32));
        let surface = factory.draw().unwrap().surface().unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let presenter = {
            let f = factory.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let ctx = f.draw_context().unwrap();
                ctx.make_current();
                let mut presents = 0u64;
                while !stop.load(Ordering::Acquire) {
                    ctx.present();
                    presents += 1;
                }
                presents
            })
        };

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while surface.finish_count() == 0 {
            assert!(std::time::Instant::now() < deadline, "presenter never ran");
            std::thread::sleep(Duration::from_millis(1));
        }

        factory.set_present_available(false);
        factory.teardown();
        let finished = surface.finish_count();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(surface.finish_count(), finished);

        let draw = factory.draw().unwrap();
        assert!(!draw.is_present_available());
        assert!(!draw.has_surface());
        draw.present();
        assert_eq!(surface.finish_count(), finished);

        stop.store(true, Ordering::Release);
        assert!(presenter.join().unwrap() > 0);
    }
}
