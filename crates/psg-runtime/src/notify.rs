//! Minimal wakeup primitive standing in for the event loop's own wakeup
//! handle (an eventfd/async-handle in the original). A worker blocks on
//! `wait_timeout` between ticks; anything that enqueues work calls `notify`.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub struct Notifier {
    ready: Mutex<bool>,
    cv: Condvar,
}

impl Notifier {
    pub fn new() -> Self {
        Notifier {
            ready: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub fn notify(&self) {
        let mut ready = self.ready.lock().unwrap();
        *ready = true;
        self.cv.notify_one();
    }

    /// Block until notified or `timeout` elapses, whichever first.
    pub fn wait_timeout(&self, timeout: Duration) {
        let ready = self.ready.lock().unwrap();
        let (mut ready, _) = self.cv.wait_timeout_while(ready, timeout, |r| !*r).unwrap();
        *ready = false;
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
