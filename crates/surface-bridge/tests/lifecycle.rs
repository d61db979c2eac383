//! End-to-end surface lifecycle against the headless backend, driven by a
//! mock engine that runs real draw and upload threads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use gpu_interop::headless::HeadlessAllocator;
use parking_lot::Mutex;
use surface_bridge::{
    ActiveFrameCallback, DrawEngineParams, FactoryHandle, MessageLoopTaskQueue, RenderContext,
    RenderEngine, SurfaceBridge, SurfaceState, TaskQueue,
};
use surface_core::{BridgeConfig, SurfaceError, SurfaceSize};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    FrameCallback(bool),
    CreateDrawEngine(SurfaceSize),
    RenderingEnabled(bool),
    Size(SurfaceSize),
    DestroyDrawEngine,
}

#[derive(Default)]
struct Shared {
    events: Mutex<Vec<Event>>,
    frames: AtomicUsize,
}

struct MockEngine {
    shared: Arc<Shared>,
    frame_callback: Option<ActiveFrameCallback>,
    rendering: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    fail_create: bool,
}

impl MockEngine {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            frame_callback: None,
            rendering: Arc::new(AtomicBool::new(true)),
            stop: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
            fail_create: false,
        }
    }

    fn record(&self, event: Event) {
        self.shared.events.lock().push(event);
    }

    fn stop_threads(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for t in self.threads.drain(..) {
            t.join().unwrap();
        }
    }
}

impl RenderEngine for MockEngine {
    fn set_active_frame_callback(&mut self, callback: Option<ActiveFrameCallback>) {
        self.record(Event::FrameCallback(callback.is_some()));
        self.frame_callback = callback;
    }

    fn create_draw_engine(
        &mut self,
        factory: FactoryHandle,
        params: DrawEngineParams,
    ) -> anyhow::Result<()> {
        self.record(Event::CreateDrawEngine(params.size));
        if self.fail_create {
            anyhow::bail!("engine refused");
        }
        self.stop = Arc::new(AtomicBool::new(false));
        self.rendering.store(true, Ordering::SeqCst);

        // Both threads report back once past the rendezvous, so the engine
        // is fully up when this returns.
        let (ready_tx, ready_rx) = mpsc::channel();

        let upload_factory = factory.clone();
        let upload_ready = ready_tx.clone();
        self.threads.push(std::thread::spawn(move || {
            let Some(f) = upload_factory.upgrade() else { return };
            let Some(ctx) = f.resources_upload_context() else { return };
            ctx.make_current();
            f.wait_for_initialization(ctx);
            ctx.done_current();
            let _ = upload_ready.send(());
        }));

        let stop = self.stop.clone();
        let rendering = self.rendering.clone();
        let shared = self.shared.clone();
        let on_frame = self.frame_callback.clone();
        self.threads.push(std::thread::spawn(move || {
            {
                let Some(f) = factory.upgrade() else { return };
                let Some(ctx) = f.draw_context() else { return };
                ctx.make_current();
                f.wait_for_initialization(ctx);
            }
            let _ = ready_tx.send(());
            while !stop.load(Ordering::SeqCst) {
                if let Some(f) = factory.upgrade() {
                    if let Some(ctx) = f.draw_context() {
                        ctx.make_current();
                        if rendering.load(Ordering::SeqCst) {
                            ctx.present();
                            shared.frames.fetch_add(1, Ordering::SeqCst);
                            if let Some(cb) = &on_frame {
                                cb();
                            }
                        }
                    }
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }));

        for _ in 0..2 {
            ready_rx.recv_timeout(Duration::from_secs(5))?;
        }
        Ok(())
    }

    fn set_rendering_enabled(&mut self, enabled: bool) {
        self.record(Event::RenderingEnabled(enabled));
        self.rendering.store(enabled, Ordering::SeqCst);
    }

    fn on_size(&mut self, size: SurfaceSize) {
        self.record(Event::Size(size));
    }

    fn destroy_draw_engine(&mut self) {
        self.record(Event::DestroyDrawEngine);
        self.stop_threads();
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.stop_threads();
    }
}

fn gui_queue() -> Arc<dyn TaskQueue> {
    Arc::new(MessageLoopTaskQueue::new(Box::new(|| true)))
}

fn bridge_with(config: BridgeConfig) -> (SurfaceBridge<HeadlessAllocator>, Arc<Shared>) {
    let shared = Arc::new(Shared::default());
    let engine = MockEngine::new(shared.clone());
    (SurfaceBridge::new(config, Box::new(engine), gui_queue()), shared)
}

fn bridge() -> (SurfaceBridge<HeadlessAllocator>, Arc<Shared>) {
    bridge_with(BridgeConfig::default())
}

fn size(w: u32, h: u32) -> SurfaceSize {
    SurfaceSize::new(w, h).unwrap()
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("condition not reached within 5s");
}

#[test]
fn create_resize_destroy_scenario() {
    let (mut bridge, shared) = bridge();

    let id = bridge.create_surface(800, 600, 2.0).unwrap();
    assert_eq!(bridge.surface_state(), SurfaceState::Created);
    assert_eq!(bridge.surface_id(), Some(id));
    wait_for(|| shared.frames.load(Ordering::SeqCst) > 0);

    let first = bridge.obtain_current_frame_descriptor(800, 600).unwrap();
    assert_eq!(first.size(), size(800, 600));

    bridge.resize_surface(1024, 768).unwrap();
    let second = bridge.obtain_current_frame_descriptor(1024, 768).unwrap();
    assert_eq!(second.size(), size(1024, 768));
    assert!(second.generation() > first.generation());

    let factory = bridge.factory().unwrap().clone();
    // The first descriptor still pins its buffer after the resize.
    assert_eq!(factory.inspect_allocator(|a| a.outstanding_exports()), Some(2));
    assert_eq!(factory.inspect_allocator(|a| a.live_targets()), Some(1));
    first.release();
    second.release();
    assert_eq!(factory.inspect_allocator(|a| a.outstanding_exports()), Some(0));

    bridge.destroy_surface();
    assert_eq!(bridge.surface_state(), SurfaceState::Destroyed);
    assert!(bridge.obtain_current_frame_descriptor(1024, 768).is_none());
    assert_eq!(factory.inspect_allocator(|a| a.live_targets()), Some(0));
    let draw = factory.draw().unwrap();
    assert!(!draw.is_present_available());
    assert!(!draw.has_surface());

    let events = shared.events.lock().clone();
    assert_eq!(
        events,
        vec![
            Event::FrameCallback(true),
            Event::CreateDrawEngine(size(800, 600)),
            Event::Size(size(1024, 768)),
            Event::RenderingEnabled(false),
            Event::DestroyDrawEngine,
        ]
    );
}

#[test]
fn resize_to_current_size_keeps_target() {
    let (mut bridge, shared) = bridge();
    bridge.create_surface(800, 600, 1.0).unwrap();
    let generation = bridge.factory().unwrap().target_generation();

    bridge.resize_surface(800, 600).unwrap();
    assert_eq!(bridge.factory().unwrap().target_generation(), generation);
    assert!(!shared
        .events
        .lock()
        .iter()
        .any(|e| matches!(e, Event::Size(_))));
}

#[test]
fn repeated_create_is_idempotent() {
    let (mut bridge, shared) = bridge();
    let a = bridge.create_surface(640, 480, 1.0).unwrap();
    let b = bridge.create_surface(640, 480, 1.0).unwrap();
    assert_eq!(a, b);

    let c = bridge.create_surface(800, 600, 1.0).unwrap();
    assert_eq!(a, c);
    assert_eq!(bridge.surface_size(), Some(size(800, 600)));

    let creates = shared
        .events
        .lock()
        .iter()
        .filter(|e| matches!(e, Event::CreateDrawEngine(_)))
        .count();
    assert_eq!(creates, 1);
}

#[test]
fn create_after_destroy_builds_a_new_surface() {
    let (mut bridge, shared) = bridge();
    let first = bridge.create_surface(320, 240, 1.0).unwrap();
    bridge.destroy_surface();
    assert_eq!(bridge.surface_id(), None);

    let second = bridge.create_surface(320, 240, 1.0).unwrap();
    assert_ne!(first, second);
    assert_eq!(bridge.surface_state(), SurfaceState::Created);
    wait_for(|| bridge.obtain_current_frame_descriptor(320, 240).is_some());

    let creates = shared
        .events
        .lock()
        .iter()
        .filter(|e| matches!(e, Event::CreateDrawEngine(_)))
        .count();
    assert_eq!(creates, 2);
}

#[test]
fn invalid_inputs_are_rejected() {
    let (mut bridge, shared) = bridge();

    assert!(matches!(
        bridge.resize_surface(100, 100),
        Err(SurfaceError::NotCreated)
    ));
    assert!(matches!(
        bridge.create_surface(0, 600, 1.0),
        Err(SurfaceError::InvalidDimensions { .. })
    ));
    assert!(matches!(
        bridge.create_surface(-5, 600, 1.0),
        Err(SurfaceError::InvalidDimensions { .. })
    ));
    assert!(bridge.obtain_current_frame_descriptor(1, 1).is_none());
    // Destroy without create does nothing.
    bridge.destroy_surface();
    assert_eq!(bridge.surface_state(), SurfaceState::Uninitialized);
    assert!(shared.events.lock().is_empty());
}

#[test]
fn allocation_failure_reports_invalid_factory() {
    let config = BridgeConfig {
        max_texture_dimension: 1024,
        ..BridgeConfig::default()
    };
    let (mut bridge, shared) = bridge_with(config);

    let err = bridge.create_surface(4096, 4096, 1.0).unwrap_err();
    assert!(matches!(err, SurfaceError::FactoryInvalid));
    assert!(err.code() < 0);
    assert_eq!(bridge.surface_state(), SurfaceState::Uninitialized);
    assert!(shared.events.lock().is_empty());

    bridge.create_surface(800, 600, 1.0).unwrap();
    let err = bridge.resize_surface(2048, 600).unwrap_err();
    assert!(matches!(err, SurfaceError::ResizeFailed { width: 2048, height: 600 }));
    // The previous target is still served.
    let d = bridge.obtain_current_frame_descriptor(800, 600).unwrap();
    assert_eq!(d.size(), size(800, 600));
}

#[test]
fn engine_failure_leaves_surface_uncreated() {
    let shared = Arc::new(Shared::default());
    let mut engine = MockEngine::new(shared.clone());
    engine.fail_create = true;
    let mut bridge: SurfaceBridge<HeadlessAllocator> =
        SurfaceBridge::new(BridgeConfig::default(), Box::new(engine), gui_queue());

    assert!(matches!(
        bridge.create_surface(800, 600, 1.0),
        Err(SurfaceError::Engine(_))
    ));
    assert_eq!(bridge.surface_state(), SurfaceState::Uninitialized);
    assert!(bridge.factory().is_none());
}

#[test]
fn frame_ready_is_rate_limited() {
    let (mut bridge, shared) = bridge();
    let callbacks = Arc::new(AtomicUsize::new(0));
    let c = callbacks.clone();
    bridge.set_frame_ready_callback(Some(Arc::new(move || {
        c.fetch_add(1, Ordering::SeqCst);
    })));

    bridge.create_surface(256, 256, 1.0).unwrap();
    wait_for(|| shared.frames.load(Ordering::SeqCst) >= 1);
    let start_frames = shared.frames.load(Ordering::SeqCst);
    let start_callbacks = callbacks.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(200));
    let frames = shared.frames.load(Ordering::SeqCst) - start_frames;
    let delivered = callbacks.load(Ordering::SeqCst) - start_callbacks;
    bridge.destroy_surface();

    // 60 Hz over 200 ms allows at most 12 deliveries, plus one for the edge.
    assert!(delivered <= 13, "{delivered} deliveries in 200ms");
    assert!(delivered >= 1);
    assert!(frames > delivered, "{frames} frames vs {delivered} deliveries");
}

#[test]
fn gui_tasks_reach_the_host_queue() {
    let queue = Arc::new(MessageLoopTaskQueue::new(Box::new(|| true)));
    let shared = Arc::new(Shared::default());
    let bridge: SurfaceBridge<HeadlessAllocator> = SurfaceBridge::new(
        BridgeConfig::default(),
        Box::new(MockEngine::new(shared)),
        queue.clone(),
    );

    let ran = Arc::new(AtomicBool::new(false));
    let r = ran.clone();
    assert!(bridge.post_gui_task(Box::new(move || r.store(true, Ordering::SeqCst))));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(queue.process_pending(), 1);
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn device_health_is_reported() {
    let (mut bridge, _shared) = bridge();
    assert_eq!(bridge.check_device_health(), gpu_interop::DeviceHealth::Healthy);
    bridge.create_surface(64, 64, 1.0).unwrap();
    assert_eq!(bridge.check_device_health(), gpu_interop::DeviceHealth::Healthy);
}
