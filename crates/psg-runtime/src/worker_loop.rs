//! One OS thread running a single-threaded tick loop that owns a
//! [`LoopBinder`]: drain the callback queue, let the caller poll whatever
//! else needs polling (the deadline heap), then idle-sleep if there was no
//! work: `loop { drain; route; if !did_work { sleep } }`.

use crate::binder::{GroupLiveness, LoopBinder};
use crate::notify::Notifier;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

thread_local! {
    static CURRENT_WORKER_ID: Cell<Option<u32>> = const { Cell::new(None) };
}

/// The id of the worker loop running on the calling thread, if any.
pub fn current_worker_id() -> Option<u32> {
    CURRENT_WORKER_ID.with(|c| c.get())
}

const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// One worker thread: a `LoopBinder` plus the tick that drives it.
pub struct LoopWorker {
    id: u32,
    binder: Arc<LoopBinder>,
    notifier: Arc<Notifier>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LoopWorker {
    /// Spawn the worker thread. `on_tick` runs once per loop iteration
    /// after the callback queue has drained — the dispatcher uses it to
    /// poll the deadline heap for this worker's expired timers.
    pub fn spawn<F>(id: u32, liveness: Arc<dyn GroupLiveness>, on_tick: F) -> Self
    where
        F: Fn(&LoopBinder) + Send + 'static,
    {
        let notifier = Arc::new(Notifier::new());
        let binder = Arc::new(LoopBinder::new(id, liveness, Arc::clone(&notifier)));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_binder = Arc::clone(&binder);
        let thread_notifier = Arc::clone(&notifier);
        let thread_shutdown = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name(format!("psg-worker-{}", id))
            .spawn(move || {
                CURRENT_WORKER_ID.with(|c| c.set(Some(id)));
                loop {
                    if thread_shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    let ran = thread_binder.run_once();
                    on_tick(&thread_binder);
                    if ran == 0 {
                        thread_notifier.wait_timeout(IDLE_SLEEP);
                    }
                }
                // Drain whatever was queued between the last check and exit.
                thread_binder.run_once();
            })
            .expect("failed to spawn psg worker thread");

        LoopWorker {
            id,
            binder,
            notifier,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn binder(&self) -> &Arc<LoopBinder> {
        &self.binder
    }

    /// Wake the worker immediately instead of waiting out its idle sleep.
    pub fn wake(&self) {
        self.notifier.notify();
    }

    pub fn shutdown(&mut self) {
        self.binder.unregister();
        self.shutdown.store(true, Ordering::Release);
        self.notifier.notify();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LoopWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psg_core::ids::RequestId;
    use std::sync::atomic::AtomicUsize;

    struct AlwaysAlive;
    impl GroupLiveness for AlwaysAlive {
        fn is_alive(&self, _: RequestId) -> bool {
            true
        }
    }

    #[test]
    fn runs_postponed_callback_on_worker_thread() {
        let mut worker = LoopWorker::spawn(0, Arc::new(AlwaysAlive), |_| {});
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        worker.binder().postpone_invoke(move || {
            assert_eq!(current_worker_id(), Some(0));
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        worker.wake();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while ran.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        worker.shutdown();
    }
}
