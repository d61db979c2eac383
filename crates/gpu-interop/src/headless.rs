//! CPU-backed render targets.
//!
//! Every target is an RGBA pixel buffer behind an `Arc`; exporting a target
//! hands out a clone of that `Arc`, so an exported buffer outlives the
//! allocator's own reference exactly like a duplicated OS handle would.
//! Contexts track "current" per thread and record which object namespace
//! they belong to, which lets tests observe sharing and binding without a
//! GPU.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use surface_core::{NativeHandle, PixelFormat, SurfaceSize};
use tracing::{debug, trace};

use crate::current::{self, ContextId};
use crate::target::{
    AllocatorOptions, BackendKind, ExportedHandle, NativeContext, RenderPath, SharedTarget,
    TargetAllocator,
};

// ---------------------------------------------------------------------------
// HeadlessSurface
// ---------------------------------------------------------------------------

struct PixelBuffer {
    size: SurfaceSize,
    pixels: Mutex<Vec<u8>>,
    finishes: AtomicU64,
}

/// A CPU pixel buffer standing in for a GPU surface.
#[derive(Clone)]
pub struct HeadlessSurface(Arc<PixelBuffer>);

impl HeadlessSurface {
    fn new(size: SurfaceSize) -> Self {
        Self(Arc::new(PixelBuffer {
            size,
            pixels: Mutex::new(vec![0; size.byte_len(PixelFormat::Rgba8Unorm)]),
            finishes: AtomicU64::new(0),
        }))
    }

    pub fn size(&self) -> SurfaceSize {
        self.0.size
    }

    /// Number of completed `finish` calls against this surface.
    pub fn finish_count(&self) -> u64 {
        self.0.finishes.load(Ordering::Acquire)
    }

    /// Run `f` over the raw RGBA bytes.
    pub fn with_pixels<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.0.pixels.lock())
    }

    /// Whether two handles refer to the same buffer.
    pub fn same_buffer(&self, other: &HeadlessSurface) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl std::fmt::Debug for HeadlessSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HeadlessSurface({}, {:#x})", self.0.size, self.address())
    }
}

// ---------------------------------------------------------------------------
// HeadlessContext
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct HeadlessContext {
    id: ContextId,
    namespace: u64,
    shared_with: Option<ContextId>,
    verbose: bool,
}

impl HeadlessContext {
    /// Object namespace; shared contexts report the same value.
    pub fn namespace(&self) -> u64 {
        self.namespace
    }

    pub fn shared_with(&self) -> Option<ContextId> {
        self.shared_with
    }

    /// Whether binds are logged with the namespace they land in.
    pub fn verbose(&self) -> bool {
        self.verbose
    }
}

impl NativeContext for HeadlessContext {
    type Surface = HeadlessSurface;

    fn id(&self) -> ContextId {
        self.id
    }

    fn make_current(&self, surface: &HeadlessSurface) -> Result<()> {
        trace!("headless context {} current on {:?}", self.id.get(), surface);
        current::bind(self.id);
        if self.verbose {
            debug!(
                "Context {} bound in namespace {} on {:?}",
                self.id.get(),
                self.namespace,
                surface
            );
        }
        Ok(())
    }

    fn done_current(&self) -> Result<()> {
        current::unbind(self.id);
        Ok(())
    }

    fn is_current(&self) -> bool {
        current::is_current(self.id)
    }

    fn finish(&self, surface: &HeadlessSurface) -> Result<()> {
        surface.0.finishes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HeadlessAllocator
// ---------------------------------------------------------------------------

pub struct HeadlessAllocator {
    options: AllocatorOptions,
    next_generation: u64,
    next_namespace: u64,
    live_targets: usize,
    outstanding_exports: Arc<AtomicUsize>,
}

impl HeadlessAllocator {
    /// Targets allocated and not yet released.
    pub fn live_targets(&self) -> usize {
        self.live_targets
    }

    /// Exported handles the consumer has not released yet.
    pub fn outstanding_exports(&self) -> usize {
        self.outstanding_exports.load(Ordering::Acquire)
    }
}

impl TargetAllocator for HeadlessAllocator {
    type Surface = HeadlessSurface;
    type Context = HeadlessContext;

    fn open(options: &AllocatorOptions) -> Result<Self> {
        debug!("Opening headless allocator");
        Ok(Self {
            options: options.clone(),
            next_generation: 1,
            next_namespace: 1,
            live_targets: 0,
            outstanding_exports: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Headless
    }

    fn allocate(&mut self, size: SurfaceSize) -> Result<SharedTarget<HeadlessSurface>> {
        self.options.check_size(size)?;
        let generation = self.next_generation;
        self.next_generation += 1;
        self.live_targets += 1;
        debug!("Allocated headless target {size} (generation {generation})");
        Ok(SharedTarget {
            surface: HeadlessSurface::new(size),
            size,
            format: PixelFormat::Rgba8Unorm,
            generation,
            path: RenderPath::ZeroCopy,
        })
    }

    fn create_offscreen_surface(&mut self) -> Result<HeadlessSurface> {
        let size = SurfaceSize::new(1, 1)?;
        Ok(HeadlessSurface::new(size))
    }

    fn create_context(&mut self, share_with: Option<&HeadlessContext>) -> Result<HeadlessContext> {
        let namespace = match share_with {
            Some(parent) => parent.namespace,
            None => {
                let ns = self.next_namespace;
                self.next_namespace += 1;
                ns
            }
        };
        Ok(HeadlessContext {
            id: ContextId::next(),
            namespace,
            shared_with: share_with.map(|c| c.id),
            verbose: self.options.verbose,
        })
    }

    fn export(&self, target: &SharedTarget<HeadlessSurface>) -> Result<Option<ExportedHandle>> {
        if target.size.byte_len(target.format) == 0 {
            bail!("cannot export an empty target");
        }
        let keep_alive = target.surface.clone();
        let outstanding = self.outstanding_exports.clone();
        outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(Some(ExportedHandle::new(
            NativeHandle(keep_alive.address()),
            move || {
                drop(keep_alive);
                outstanding.fetch_sub(1, Ordering::AcqRel);
            },
        )))
    }

    fn release_target(&mut self, target: SharedTarget<HeadlessSurface>) {
        debug!(
            "Releasing headless target {} (generation {})",
            target.size, target.generation
        );
        self.live_targets = self.live_targets.saturating_sub(1);
    }

    fn release_surface(&mut self, _surface: HeadlessSurface) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> HeadlessAllocator {
        HeadlessAllocator::open(&AllocatorOptions::default()).unwrap()
    }

    #[test]
    fn generations_increase() {
        let mut alloc = open();
        let a = alloc.allocate(SurfaceSize::new(4, 4).unwrap()).unwrap();
        let b = alloc.allocate(SurfaceSize::new(8, 8).unwrap()).unwrap();
        assert!(b.generation > a.generation);
        assert_eq!(alloc.live_targets(), 2);
        alloc.release_target(a);
        assert_eq!(alloc.live_targets(), 1);
    }

    #[test]
    fn shared_contexts_share_a_namespace() {
        let mut alloc = open();
        let upload = alloc.create_context(None).unwrap();
        let draw = alloc.create_context(Some(&upload)).unwrap();
        let unrelated = alloc.create_context(None).unwrap();
        assert_eq!(draw.namespace(), upload.namespace());
        assert_eq!(draw.shared_with(), Some(upload.id()));
        assert_ne!(unrelated.namespace(), upload.namespace());
    }

    #[test]
    fn export_outlives_release() {
        let mut alloc = open();
        let target = alloc.allocate(SurfaceSize::new(2, 2).unwrap()).unwrap();
        let surface = target.surface.clone();
        let exported = alloc.export(&target).unwrap().unwrap();
        alloc.release_target(target);
        assert_eq!(alloc.outstanding_exports(), 1);
        // Only the exported handle and `surface` still hold the buffer.
        assert_eq!(Arc::strong_count(&surface.0), 2);
        exported.release();
        assert_eq!(alloc.outstanding_exports(), 0);
        assert_eq!(Arc::strong_count(&surface.0), 1);
    }

    #[test]
    fn oversized_allocation_fails() {
        let mut alloc = HeadlessAllocator::open(&AllocatorOptions {
            max_texture_dimension: 64,
            ..Default::default()
        })
        .unwrap();
        assert!(alloc.allocate(SurfaceSize::new(65, 1).unwrap()).is_err());
        assert_eq!(alloc.live_targets(), 0);
    }

    #[test]
    fn finish_and_current_tracking() {
        let mut alloc = open();
        let ctx = alloc.create_context(None).unwrap();
        let surface = alloc.create_offscreen_surface().unwrap();
        assert!(!ctx.is_current());
        ctx.make_current(&surface).unwrap();
        assert!(ctx.is_current());
        ctx.finish(&surface).unwrap();
        assert_eq!(surface.finish_count(), 1);
        ctx.done_current().unwrap();
        assert!(!ctx.is_current());
    }

    #[test]
    fn contexts_inherit_verbose_diagnostics() {
        assert!(!open().create_context(None).unwrap().verbose());

        let mut alloc = HeadlessAllocator::open(&AllocatorOptions {
            verbose: true,
            ..Default::default()
        })
        .unwrap();
        let upload = alloc.create_context(None).unwrap();
        let draw = alloc.create_context(Some(&upload)).unwrap();
        assert!(upload.verbose());
        assert!(draw.verbose());

        let surface = alloc.create_offscreen_surface().unwrap();
        draw.make_current(&surface).unwrap();
        assert!(draw.is_current());
        draw.done_current().unwrap();
    }
}
