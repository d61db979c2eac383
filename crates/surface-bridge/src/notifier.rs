//! Rate-limited, single-flight frame-ready notifications.
//!
//! The engine calls [`FrameNotifier::notify`] from its render thread after
//! every frame. At most one host callback runs at a time and deliveries are
//! spaced at least the configured interval apart; everything else is
//! dropped, never queued.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{error, trace};

/// Host callback invoked when a new frame is ready to composite.
pub type FrameReadyCallback = Arc<dyn Fn() + Send + Sync>;

const NEVER: u64 = u64::MAX;

pub struct FrameNotifier {
    callback: RwLock<Option<FrameReadyCallback>>,
    min_interval_us: u64,
    epoch: Instant,
    /// Microseconds since `epoch` of the last delivery, or `NEVER`.
    last_delivery_us: AtomicU64,
    in_flight: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Clears the in-flight flag even if the callback unwinds.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FrameNotifier {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            callback: RwLock::new(None),
            min_interval_us: min_interval.as_micros().min(u64::MAX as u128) as u64,
            epoch: Instant::now(),
            last_delivery_us: AtomicU64::new(NEVER),
            in_flight: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Install, replace, or (with `None`) clear the host callback.
    pub fn set_callback(&self, callback: Option<FrameReadyCallback>) {
        *self.callback.write() = callback;
    }

    pub fn has_callback(&self) -> bool {
        self.callback.read().is_some()
    }

    /// Deliver a frame-ready signal if the rate limit and single-flight rule
    /// allow it. Returns whether the callback was invoked.
    pub fn notify(&self) -> bool {
        if self.too_soon() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let _in_flight = InFlight(&self.in_flight);

        // Another thread may have delivered between the check and the claim.
        if self.too_soon() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let Some(callback) = self.callback.read().clone() else {
            return false;
        };
        self.last_delivery_us.store(self.now_us(), Ordering::Release);

        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback())) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!("Frame-ready callback panicked: {message}");
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        trace!("Frame-ready delivered");
        true
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros().min((NEVER - 1) as u128) as u64
    }

    fn too_soon(&self) -> bool {
        let last = self.last_delivery_us.load(Ordering::Acquire);
        last != NEVER && self.now_us().saturating_sub(last) < self.min_interval_us
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    use super::*;

    fn counting(notifier: &FrameNotifier) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        notifier.set_callback(Some(Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })));
        count
    }

    #[test]
    fn rate_limited_within_interval() {
        let notifier = FrameNotifier::new(Duration::from_millis(16));
        let count = counting(&notifier);

        // 10 notifications in well under 16 ms: exactly one delivery.
        let delivered = (0..10).filter(|_| notifier.notify()).count();
        assert_eq!(delivered, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.dropped(), 9);

        std::thread::sleep(Duration::from_millis(20));
        assert!(notifier.notify());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn no_callback_means_no_delivery() {
        let notifier = FrameNotifier::new(Duration::ZERO);
        assert!(!notifier.notify());
        assert_eq!(notifier.delivered(), 0);
    }

    #[test]
    fn cleared_callback_is_not_invoked() {
        let notifier = FrameNotifier::new(Duration::ZERO);
        let count = counting(&notifier);
        assert!(notifier.notify());
        notifier.set_callback(None);
        assert!(!notifier.notify());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_callback_is_contained() {
        let notifier = FrameNotifier::new(Duration::ZERO);
        notifier.set_callback(Some(Arc::new(|| panic!("host exploded"))));
        assert!(notifier.notify());
        // The in-flight flag was released despite the panic.
        let count = counting(&notifier);
        assert!(notifier.notify());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn single_flight_under_contention() {
        let notifier = Arc::new(FrameNotifier::new(Duration::ZERO));
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));
        {
            let running = running.clone();
            let max_running = max_running.clone();
            notifier.set_callback(Some(Arc::new(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_running.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(2));
                running.fetch_sub(1, Ordering::SeqCst);
            })));
        }

        let barrier = Arc::new(Barrier::new(8));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let notifier = notifier.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..20 {
                        notifier.notify();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(max_running.load(Ordering::SeqCst), 1);
        assert!(notifier.delivered() >= 1);
        assert_eq!(notifier.delivered() + notifier.dropped(), 160);
    }
}
