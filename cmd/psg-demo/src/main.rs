//! Dispatcher demo: two backends race to answer a request, a deadline-
//! expiry run against a backend that never reports back, and a dropped
//! client connection.
//!
//! No real transport or worker-loop thread is wired up here — `process()`
//! stands in for the backend I/O with a sleeping OS thread, and the main
//! thread drives `poll_timers()` itself instead of a `LoopWorker`.

use psg::prelude::*;
use psg::{set_log_level, LogLevel};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, OnceLock, Weak};
use std::time::Instant;

struct DemoRequest {
    request_id: RequestId,
}
impl Request for DemoRequest {
    fn request_id(&self) -> RequestId {
        self.request_id
    }
}

struct DemoReply {
    name: &'static str,
    last_activity: Mutex<Instant>,
    http_code: AtomicU16,
}
impl DemoReply {
    fn new(name: &'static str) -> Self {
        DemoReply {
            name,
            last_activity: Mutex::new(Instant::now()),
            http_code: AtomicU16::new(0),
        }
    }
}
impl Reply for DemoReply {
    fn is_output_ready(&self) -> bool {
        true
    }
    fn is_finished(&self) -> bool {
        self.http_code.load(Ordering::Relaxed) != 0
    }
    fn is_completed(&self) -> bool {
        self.is_finished()
    }
    fn flush(&self, mode: FlushMode) {
        if mode == FlushMode::Final {
            println!("  [{}] flushed, http {}", self.name, self.http_code.load(Ordering::Relaxed));
        }
    }
    fn prepare_reply_completion(&self, http_code: u16, _start_ts_mks: u64) {
        self.http_code.store(http_code, Ordering::Relaxed);
    }
    fn prepare_request_timeout_message(&self, text: &str) {
        println!("  [{}] timeout: {}", self.name, text);
    }
    fn prepare_reply_message(&self, text: &str, http_code: u16, _code: i32, severity: &str) {
        println!("  [{}] {} ({}): {}", self.name, severity, http_code, text);
    }
    fn get_timespan_from_last_activity_mks(&self) -> u64 {
        self.last_activity.lock().unwrap().elapsed().as_micros() as u64
    }
    fn send_trace(&self, text: &str, _start_ts_mks: u64, _update_last_activity: bool) {
        println!("  [{}] trace: {}", self.name, text);
    }
    fn get_item_id(&self) -> u64 {
        0
    }
}

/// A toy backend: `process()` sleeps `work` on its own thread to stand in
/// for network I/O, then races for the win and self-reports `finish_as` —
/// unless `never_finish`, which models a backend that hangs forever and
/// relies entirely on the deadline timer plus the cooperative `cancel()`.
struct DemoProcessor {
    name: &'static str,
    request_id: RequestId,
    dispatcher: Weak<Dispatcher>,
    status: Mutex<ProcessorStatus>,
    work: Duration,
    finish_as: ProcessorStatus,
    never_finish: bool,
    self_ref: Weak<DemoProcessor>,
}

impl DemoProcessor {
    fn new(
        name: &'static str,
        request_id: RequestId,
        dispatcher: Weak<Dispatcher>,
        work: Duration,
        finish_as: ProcessorStatus,
        never_finish: bool,
    ) -> Arc<DemoProcessor> {
        Arc::new_cyclic(|weak| DemoProcessor {
            name,
            request_id,
            dispatcher,
            status: Mutex::new(ProcessorStatus::InProgress),
            work,
            finish_as,
            never_finish,
            self_ref: weak.clone(),
        })
    }
}

impl Processor for DemoProcessor {
    fn request_id(&self) -> RequestId {
        self.request_id
    }

    fn process(&self) {
        let this = match self.self_ref.upgrade() {
            Some(this) => this,
            None => return,
        };
        std::thread::spawn(move || {
            std::thread::sleep(this.work);
            let dispatcher = match this.dispatcher.upgrade() {
                Some(d) => d,
                None => return,
            };
            let handle: Arc<dyn Processor> = this.clone();
            if dispatcher.signal_start_processing(&handle) == StartProcessingResult::Cancel {
                return;
            }
            if this.never_finish {
                println!("  [{}] backend is stuck, never reporting back", this.name);
                return;
            }
            *this.status.lock().unwrap() = this.finish_as;
            dispatcher.signal_finish_processing(&handle, SignalSource::Processor);
        });
    }

    fn cancel(&self) {
        let mut status = self.status.lock().unwrap();
        if *status != ProcessorStatus::InProgress {
            return;
        }
        *status = ProcessorStatus::Canceled;
        drop(status);

        // A real backend would notice cancellation on its own; here the
        // demo self-reports immediately, the way scenario 4 expects.
        if let (Some(dispatcher), Some(this)) = (self.dispatcher.upgrade(), self.self_ref.upgrade()) {
            let handle: Arc<dyn Processor> = this;
            dispatcher.signal_finish_processing(&handle, SignalSource::Processor);
        }
    }

    fn get_status(&self) -> ProcessorStatus {
        *self.status.lock().unwrap()
    }
    fn get_name(&self) -> &str {
        self.name
    }
    fn get_group_name(&self) -> &str {
        "demo"
    }
    fn get_priority(&self) -> i32 {
        0
    }
}

struct DemoFactory {
    name: &'static str,
    work: Duration,
    finish_as: ProcessorStatus,
    never_finish: bool,
    dispatcher: OnceLock<Weak<Dispatcher>>,
}

impl DemoFactory {
    fn new(name: &'static str, work: Duration, finish_as: ProcessorStatus, never_finish: bool) -> Arc<Self> {
        Arc::new(DemoFactory {
            name,
            work,
            finish_as,
            never_finish,
            dispatcher: OnceLock::new(),
        })
    }

    fn attach(&self, dispatcher: &Arc<Dispatcher>) {
        let _ = self.dispatcher.set(Arc::downgrade(dispatcher));
    }
}

impl ProcessorFactory for DemoFactory {
    fn class_name(&self) -> &str {
        self.name
    }

    fn try_create(&self, request: &dyn Request, _reply: Arc<dyn Reply>, _priority: i32) -> Option<Arc<dyn Processor>> {
        let dispatcher = self.dispatcher.get().expect("factory not attached to a dispatcher").clone();
        Some(DemoProcessor::new(self.name, request.request_id(), dispatcher, self.work, self.finish_as, self.never_finish))
    }
}

fn wait_for_retirement(dispatcher: &Arc<Dispatcher>, timeout: Duration) {
    let start = Instant::now();
    while dispatcher.snapshot().groups_live > 0 {
        if start.elapsed() > timeout {
            println!("  (timed out waiting for retirement)");
            return;
        }
        dispatcher.poll_timers();
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn race_demo() {
    println!("-- race: cassandra (80ms) vs lmdb (20ms) --");
    let cassandra = DemoFactory::new("cassandra", Duration::from_millis(80), ProcessorStatus::Done, false);
    let lmdb = DemoFactory::new("lmdb", Duration::from_millis(20), ProcessorStatus::Done, false);

    let mut builder = ConcurrencyRegistry::builder();
    builder.register("cassandra", 10, Arc::clone(&cassandra) as Arc<dyn ProcessorFactory>).unwrap();
    builder.register("lmdb", 10, Arc::clone(&lmdb) as Arc<dyn ProcessorFactory>).unwrap();
    let dispatcher = Dispatcher::new(builder.build(), Duration::from_secs(5));
    cassandra.attach(&dispatcher);
    lmdb.attach(&dispatcher);

    let request = DemoRequest { request_id: RequestId::next() };
    let reply: Arc<DemoReply> = Arc::new(DemoReply::new("race"));
    let processors = dispatcher.dispatch_request(&request, Arc::clone(&reply) as Arc<dyn Reply>, 0);
    println!("dispatched to {} processor(s)", processors.len());
    for p in &processors {
        p.process();
    }

    wait_for_retirement(&dispatcher, Duration::from_secs(2));
    let snap = dispatcher.snapshot();
    println!("groups_live={} groups_retired={}", snap.groups_live, snap.groups_retired);
}

fn deadline_demo() {
    println!("-- deadline: a stuck backend, timeout=150ms --");
    let stuck = DemoFactory::new("stuck-backend", Duration::from_millis(10), ProcessorStatus::Done, true);
    let mut builder = ConcurrencyRegistry::builder();
    builder.register("stuck-backend", 10, Arc::clone(&stuck) as Arc<dyn ProcessorFactory>).unwrap();
    let dispatcher = Dispatcher::new(builder.build(), Duration::from_millis(150));
    stuck.attach(&dispatcher);

    let request = DemoRequest { request_id: RequestId::next() };
    let reply: Arc<DemoReply> = Arc::new(DemoReply::new("deadline"));
    let processors = dispatcher.dispatch_request(&request, Arc::clone(&reply) as Arc<dyn Reply>, 0);
    for p in &processors {
        p.process();
    }

    wait_for_retirement(&dispatcher, Duration::from_secs(2));
    let snap = dispatcher.snapshot();
    println!("groups_live={} groups_retired={}", snap.groups_live, snap.groups_retired);
}

fn dropped_connection_demo() {
    println!("-- client connection dies before the backend finishes --");
    let slow = DemoFactory::new("slow-backend", Duration::from_millis(200), ProcessorStatus::Done, false);
    let mut builder = ConcurrencyRegistry::builder();
    builder.register("slow-backend", 10, Arc::clone(&slow) as Arc<dyn ProcessorFactory>).unwrap();
    let dispatcher = Dispatcher::new(builder.build(), Duration::from_secs(5));
    slow.attach(&dispatcher);

    let request_id = RequestId::next();
    let request = DemoRequest { request_id };
    let reply: Arc<DemoReply> = Arc::new(DemoReply::new("dropped-connection"));
    let processors = dispatcher.dispatch_request(&request, Arc::clone(&reply) as Arc<dyn Reply>, 0);
    for p in &processors {
        p.process();
    }

    std::thread::sleep(Duration::from_millis(20));
    println!("  client connection dropped, notifying dispatcher");
    dispatcher.notify_request_finished(request_id);

    wait_for_retirement(&dispatcher, Duration::from_secs(2));
    println!("  reply was ever flushed: {}", reply.is_finished());
}

fn main() {
    set_log_level(LogLevel::Info);
    println!("=== psg dispatcher demo ===\n");

    race_demo();
    println!();
    deadline_demo();
    println!();
    dropped_connection_demo();

    println!("\n=== demo complete ===");
}
