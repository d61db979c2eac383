//! Posting work to the host's GUI thread.
//!
//! The engine schedules small pieces of work (layout callbacks, host
//! notifications) that must run on the thread owning the UI. Two backings
//! exist: a dedicated worker thread fed by a channel, and a forwarder that
//! buffers tasks and asks the host's message loop to drain them.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait TaskQueue: Send + Sync {
    /// Queue `task`. Returns `false` if the queue no longer accepts work;
    /// the task is dropped unexecuted in that case.
    fn push(&self, task: Task) -> bool;
}

fn run_task(task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        error!("GUI task panicked");
    }
}

// ---------------------------------------------------------------------------
// ThreadTaskQueue
// ---------------------------------------------------------------------------

/// Runs tasks in FIFO order on a dedicated thread.
pub struct ThreadTaskQueue {
    sender: Mutex<Option<Sender<Task>>>,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadTaskQueue {
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<Task>();
        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // Drains whatever is queued once every sender is gone.
                for task in receiver {
                    run_task(task);
                }
                debug!("Task queue worker exiting");
            })?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            running: AtomicBool::new(true),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop accepting tasks, run the ones already queued, and join the
    /// worker. Idempotent.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() == std::thread::current().id() {
                // Called from a task; the loop ends on its own.
                return;
            }
            if worker.join().is_err() {
                error!("Task queue worker panicked");
            }
        }
    }
}

impl TaskQueue for ThreadTaskQueue {
    fn push(&self, task: Task) -> bool {
        if !self.is_running() {
            return false;
        }
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(task).is_ok(),
            None => false,
        }
    }
}

impl Drop for ThreadTaskQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// MessageLoopTaskQueue
// ---------------------------------------------------------------------------

/// Asks the host to schedule a drain on its UI thread. Returns `false` if
/// the host could not post the request. Must only post: calling
/// `process_pending` from inside the hook deadlocks.
pub type WakeFn = Box<dyn Fn() -> bool + Send + Sync>;

/// Buffers tasks until the host's message loop calls
/// [`process_pending`](Self::process_pending).
pub struct MessageLoopTaskQueue {
    pending: Mutex<VecDeque<Task>>,
    wake: WakeFn,
}

impl MessageLoopTaskQueue {
    pub fn new(wake: WakeFn) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            wake,
        }
    }

    /// Run every task queued so far. Call from the host's UI thread.
    /// Returns the number of tasks run.
    pub fn process_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Pop under the lock, run outside it so tasks may push.
            let Some(task) = self.pending.lock().pop_front() else {
                break;
            };
            run_task(task);
            ran += 1;
        }
        ran
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

impl TaskQueue for MessageLoopTaskQueue {
    fn push(&self, task: Task) -> bool {
        let mut pending = self.pending.lock();
        pending.push_back(task);
        if !(self.wake)() {
            warn!("Host refused to schedule GUI tasks");
            pending.pop_back();
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    use crossbeam_channel::bounded;

    use super::*;

    #[test]
    fn thread_queue_runs_in_order_on_worker() {
        let queue = ThreadTaskQueue::spawn("gui-test").unwrap();
        let (tx, rx) = bounded(3);
        for i in 0..3 {
            let tx = tx.clone();
            assert!(queue.push(Box::new(move || {
                let name = std::thread::current().name().map(str::to_string);
                tx.send((i, name)).unwrap();
            })));
        }
        for expected in 0..3 {
            let (i, name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(i, expected);
            assert_eq!(name.as_deref(), Some("gui-test"));
        }
    }

    #[test]
    fn thread_queue_drains_then_rejects_after_shutdown() {
        let queue = ThreadTaskQueue::spawn("gui-drain").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let c = count.clone();
            queue.push(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        queue.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert!(!queue.push(Box::new(|| {})));
        queue.shutdown();
    }

    #[test]
    fn thread_queue_survives_panicking_task() {
        let queue = ThreadTaskQueue::spawn("gui-panic").unwrap();
        let (tx, rx) = bounded(1);
        queue.push(Box::new(|| panic!("task failure")));
        queue.push(Box::new(move || tx.send(()).unwrap()));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn message_loop_queue_wakes_and_drains() {
        let wakes = Arc::new(AtomicUsize::new(0));
        let w = wakes.clone();
        let queue = MessageLoopTaskQueue::new(Box::new(move || {
            w.fetch_add(1, Ordering::SeqCst);
            true
        }));
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = count.clone();
            assert!(queue.push(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })));
        }
        assert_eq!(wakes.load(Ordering::SeqCst), 3);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(queue.process_pending(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn message_loop_queue_reports_refused_wake() {
        let queue = MessageLoopTaskQueue::new(Box::new(|| false));
        assert!(!queue.push(Box::new(|| {})));
        assert_eq!(queue.pending(), 0);
    }
}
