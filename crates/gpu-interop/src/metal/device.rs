//! Metal device wrapper.

use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2_metal::{MTLCommandQueue, MTLCreateSystemDefaultDevice, MTLDevice};
use tracing::{debug, error};

/// The system default Metal device.
///
/// Every context gets its own command queue from [`MetalDevice::new_queue`];
/// resources created on the device are visible to all of them.
pub struct MetalDevice {
    device: Retained<ProtocolObject<dyn MTLDevice>>,
}

// SAFETY: MTLDevice is documented as thread-safe.
unsafe impl Send for MetalDevice {}
unsafe impl Sync for MetalDevice {}

impl MetalDevice {
    /// Returns `None` if Metal is unavailable.
    pub fn new() -> Option<Self> {
        let device = MTLCreateSystemDefaultDevice()?;
        debug!("Metal device: {}", device.name());
        Some(Self { device })
    }

    /// Borrow the underlying `MTLDevice`.
    pub fn device(&self) -> &ProtocolObject<dyn MTLDevice> {
        &self.device
    }

    pub fn new_queue(&self) -> Option<Retained<ProtocolObject<dyn MTLCommandQueue>>> {
        let queue = self.device.newCommandQueue();
        if queue.is_none() {
            error!("Failed to create Metal command queue");
        }
        queue
    }
}
