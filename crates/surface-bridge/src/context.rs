//! Graphics contexts as seen by the render engine.
//!
//! A [`GraphicsContext`] wraps one platform [`NativeContext`] together with
//! the surface it renders into and a present-available gate. The engine only
//! ever talks to it through the object-safe [`RenderContext`] trait.

use std::sync::atomic::{AtomicBool, Ordering};

use gpu_interop::{ContextId, NativeContext};
use parking_lot::RwLock;
use tracing::{error, trace, warn};

/// Which half of the context pair a context is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextRole {
    /// Renders into the shared target and presents.
    Draw,
    /// Uploads resources on a worker thread. Never presents.
    Upload,
}

/// Engine-facing view of a rendering context.
pub trait RenderContext: Send + Sync {
    fn role(&self) -> ContextRole;

    fn id(&self) -> ContextId;

    /// Bind this context and its surface to the calling thread. Failures are
    /// logged; the engine keeps running and the next frame retries.
    fn make_current(&self);

    fn done_current(&self);

    /// Make rendering visible to the compositor. A no-op while presenting is
    /// disabled or when no surface is bound.
    fn present(&self);

    fn set_present_available(&self, available: bool);

    fn is_present_available(&self) -> bool;

    /// Whether presenting is enabled and this context is current on the
    /// calling thread.
    fn validate(&self) -> bool;
}

/// One rendering context plus the surface it currently targets.
pub struct GraphicsContext<C: NativeContext> {
    role: ContextRole,
    native: C,
    /// Readers are make-current and present; writers rebind or reset. A reset
    /// therefore waits for an in-flight present to complete.
    surface: RwLock<Option<C::Surface>>,
    present_available: AtomicBool,
}

impl<C: NativeContext> GraphicsContext<C> {
    pub fn new(role: ContextRole, native: C, surface: Option<C::Surface>) -> Self {
        Self {
            role,
            native,
            surface: RwLock::new(surface),
            present_available: AtomicBool::new(true),
        }
    }

    pub fn native(&self) -> &C {
        &self.native
    }

    /// Retarget rendering. Takes effect at the next make-current.
    pub fn set_surface(&self, surface: C::Surface) {
        *self.surface.write() = Some(surface);
    }

    /// Drop the surface reference so the underlying resource can be
    /// released. Blocks until any in-flight present returns.
    pub fn reset_surface(&self) -> Option<C::Surface> {
        if let Err(e) = self.native.done_current() {
            warn!("{:?} context: done_current during reset failed: {e:#}", self.role);
        }
        self.surface.write().take()
    }

    pub fn has_surface(&self) -> bool {
        self.surface.read().is_some()
    }

    pub fn surface(&self) -> Option<C::Surface> {
        self.surface.read().clone()
    }
}

impl<C: NativeContext> RenderContext for GraphicsContext<C> {
    fn role(&self) -> ContextRole {
        self.role
    }

    fn id(&self) -> ContextId {
        self.native.id()
    }

    fn make_current(&self) {
        let surface = self.surface.read();
        let Some(surface) = surface.as_ref() else {
            warn!("{:?} context made current without a surface", self.role);
            return;
        };
        match self.native.make_current(surface) {
            Ok(()) => trace!("{:?} context {} current", self.role, self.native.id().get()),
            Err(e) => error!("{:?} context make_current failed: {e:#}", self.role),
        }
    }

    fn done_current(&self) {
        if let Err(e) = self.native.done_current() {
            error!("{:?} context done_current failed: {e:#}", self.role);
        }
    }

    fn present(&self) {
        if !self.is_present_available() {
            return;
        }
        let surface = self.surface.read();
        let Some(surface) = surface.as_ref() else {
            return;
        };
        if let Err(e) = self.native.finish(surface) {
            error!("{:?} context present failed: {e:#}", self.role);
        }
    }

    fn set_present_available(&self, available: bool) {
        self.present_available.store(available, Ordering::Release);
    }

    fn is_present_available(&self) -> bool {
        self.present_available.load(Ordering::Acquire)
    }

    fn validate(&self) -> bool {
        self.is_present_available() && self.native.is_current()
    }
}

#[cfg(test)]
mod tests {
    use gpu_interop::headless::HeadlessAllocator;
    use gpu_interop::{AllocatorOptions, TargetAllocator};
    use surface_core::SurfaceSize;

    use super::*;

    fn draw_context() -> (
        HeadlessAllocator,
        GraphicsContext<gpu_interop::headless::HeadlessContext>,
    ) {
        let mut alloc = HeadlessAllocator::open(&AllocatorOptions::default()).unwrap();
        let target = alloc.allocate(SurfaceSize::new(16, 16).unwrap()).unwrap();
        let native = alloc.create_context(None).unwrap();
        let ctx = GraphicsContext::new(ContextRole::Draw, native, Some(target.surface));
        (alloc, ctx)
    }

    #[test]
    fn validate_requires_current_and_present_available() {
        let (_alloc, ctx) = draw_context();
        assert!(!ctx.validate());
        ctx.make_current();
        assert!(ctx.validate());
        ctx.set_present_available(false);
        assert!(!ctx.validate());
        ctx.set_present_available(true);
        ctx.done_current();
        assert!(!ctx.validate());
    }

    #[test]
    fn present_is_gated() {
        let (_alloc, ctx) = draw_context();
        let surface = ctx.surface().unwrap();
        ctx.make_current();
        ctx.present();
        assert_eq!(surface.finish_count(), 1);

        ctx.set_present_available(false);
        ctx.present();
        assert_eq!(surface.finish_count(), 1);
    }

    #[test]
    fn reset_surface_unbinds_and_clears() {
        let (_alloc, ctx) = draw_context();
        ctx.make_current();
        assert!(ctx.reset_surface().is_some());
        assert!(!ctx.has_surface());
        assert!(!ctx.native().is_current());
        // Neither call may panic without a surface.
        ctx.make_current();
        ctx.present();
    }

    #[test]
    fn bound_upload_context_validates() {
        let mut alloc = HeadlessAllocator::open(&AllocatorOptions::default()).unwrap();
        let surface = alloc.create_offscreen_surface().unwrap();
        let native = alloc.create_context(None).unwrap();
        let ctx = GraphicsContext::new(ContextRole::Upload, native, Some(surface));
        assert!(ctx.is_present_available());
        assert!(!ctx.validate());
        ctx.make_current();
        assert!(ctx.validate());
        ctx.done_current();
    }
}
