//! Cross-platform bridge between a render engine and a host compositor.
//!
//! The engine renders on its own draw and upload threads into a GPU-resident
//! target; the compositor samples that target through a duplicated native
//! handle. This crate owns the platform-independent half: the paired
//! contexts and their factory, the initialization rendezvous, rate-limited
//! frame notifications, and the surface lifecycle. Platform allocators live
//! in `gpu-interop`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use surface_bridge::{SurfaceBridge, ThreadTaskQueue};
//! use surface_core::BridgeConfig;
//! # fn engine() -> Box<dyn surface_bridge::RenderEngine> { unimplemented!() }
//!
//! let config = BridgeConfig::from_env();
//! surface_core::logging::init_logging(&config);
//! let gui = Arc::new(ThreadTaskQueue::spawn("gui").unwrap());
//! let mut bridge: SurfaceBridge = SurfaceBridge::new(config, engine(), gui);
//! let id = bridge.create_surface(800, 600, 1.0).unwrap();
//! bridge.set_frame_ready_callback(Some(Arc::new(|| { /* schedule composite */ })));
//! if let Some(frame) = bridge.obtain_current_frame_descriptor(800, 600) {
//!     // hand frame.into_raw() to the compositor
//! #   drop(frame);
//! }
//! bridge.resize_surface(1024, 768).unwrap();
//! bridge.destroy_surface();
//! # let _ = id;
//! ```

pub mod bridge;
pub mod context;
pub mod descriptor;
pub mod engine;
pub mod factory;
pub mod lifecycle;
pub mod notifier;
pub mod rendezvous;
pub mod task_queue;

pub use bridge::SurfaceBridge;
pub use context::{ContextRole, GraphicsContext, RenderContext};
pub use descriptor::FrameDescriptor;
pub use engine::{ActiveFrameCallback, DrawEngineParams, FactoryHandle, RenderEngine};
pub use factory::{ContextFactory, GraphicsContextFactory};
pub use lifecycle::{SurfaceController, SurfaceState};
pub use notifier::{FrameNotifier, FrameReadyCallback};
pub use rendezvous::InitRendezvous;
pub use task_queue::{MessageLoopTaskQueue, Task, TaskQueue, ThreadTaskQueue};
