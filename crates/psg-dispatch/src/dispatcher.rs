//! The Dispatcher (spec §4.4): registers processor factories, builds
//! Processor Groups for new requests, routes finish signals, performs the
//! cancellation fan-out, enforces the deadline, and retires groups.
//!
//! This is a direct translation of `CPSGS_Dispatcher` from
//! `psgs_dispatcher.cpp`: the same bucketed locking, the same three-way
//! finish protocol, the same "cancel outside the lock" discipline.

use crate::counters::{self, DispatcherCounters, DispatcherSnapshot};
use crate::group::{ProcessorGroup, ProcessorSlot};
use crate::registry::ConcurrencyRegistry;
use psg_core::ids::RequestId;
use psg_core::status::{DispatchStatus, ProcessorStatus, SignalSource, StartProcessingResult};
use psg_core::traits::{FlushMode, Processor, Request};
use psg_core::{dlog_trace, dlog_warn, PROC_BUCKETS};
use psg_runtime::binder::{GroupLiveness, LoopBinder};
use psg_runtime::timer::DeadlineHeap;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use psg_core::SpinLock;

pub struct Dispatcher {
    registry: ConcurrencyRegistry,
    buckets: Vec<SpinLock<HashMap<u64, ProcessorGroup>>>,
    timers: DeadlineHeap,
    binders: SpinLock<HashMap<u32, Arc<LoopBinder>>>,
    request_timeout: Duration,
    counters: DispatcherCounters,
    self_ref: Weak<Dispatcher>,
}

impl Dispatcher {
    pub fn new(registry: ConcurrencyRegistry, request_timeout: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak| Dispatcher {
            registry,
            buckets: (0..PROC_BUCKETS).map(|_| SpinLock::new(HashMap::new())).collect(),
            timers: DeadlineHeap::new(),
            binders: SpinLock::new(HashMap::new()),
            request_timeout,
            counters: DispatcherCounters::new(),
            self_ref: weak.clone(),
        })
    }

    fn arc_self(&self) -> Arc<Dispatcher> {
        self.self_ref
            .upgrade()
            .expect("Dispatcher method called after the last Arc<Dispatcher> was dropped")
    }

    /// Record the `LoopBinder` of a worker, so groups created on that
    /// worker can have their retirement posted back to it.
    pub fn attach_worker(&self, worker_id: u32, binder: Arc<LoopBinder>) {
        self.binders.lock().insert(worker_id, binder);
    }

    pub fn registry(&self) -> &ConcurrencyRegistry {
        &self.registry
    }

    fn bucket(&self, request_id: RequestId) -> &SpinLock<HashMap<u64, ProcessorGroup>> {
        &self.buckets[request_id.bucket(PROC_BUCKETS)]
    }

    /// §4.4.1. Consults the registry in descending-priority order, builds a
    /// group from whichever factories produce a processor, arms the
    /// deadline timer, and installs the group in its bucket.
    pub fn dispatch_request(
        &self,
        request: &dyn Request,
        reply: Arc<dyn psg_core::traits::Reply>,
        worker_id: u32,
    ) -> Vec<Arc<dyn Processor>> {
        let request_id = request.request_id();
        let mut slots = Vec::new();
        let mut live = Vec::new();

        for class_index in 0..self.registry.len() {
            if !self.registry.try_acquire(class_index) {
                dlog_trace!(
                    "dispatch_request: class '{}' at cap, skipping for request {}",
                    self.registry.class_name(class_index),
                    request_id
                );
                continue;
            }
            let priority = self.registry.priority_of(class_index);
            let factory = Arc::clone(self.registry.factory(class_index));
            match factory.try_create(request, Arc::clone(&reply), priority) {
                Some(processor) => {
                    live.push(Arc::clone(&processor));
                    slots.push(ProcessorSlot::new(processor, class_index));
                }
                None => self.registry.release(class_index),
            }
        }

        if slots.is_empty() {
            reply.prepare_reply_message("no matching processor", 404, 404, "error");
            reply.prepare_reply_completion(404, 0);
            reply.flush(FlushMode::Final);
            self.counters.rejections.fetch_add(1, Ordering::Relaxed);
            dlog_trace!("dispatch_request: no processor produced for request {}, stopped", request_id);
            return Vec::new();
        }

        let mut group = ProcessorGroup::new(request_id, reply, worker_id);
        group.processors = slots;
        let timer_handle = self.timers.arm(request_id, self.request_timeout);
        group.timer_handle = Some(timer_handle);
        group.timer_active = true;

        self.bucket(request_id).lock().insert(request_id.as_u64(), group);
        self.counters.groups_live.fetch_add(1, Ordering::Relaxed);

        live
    }

    /// §4.4.2. First-to-call wins: whoever wins the bucket lock is the
    /// definitive winner, and every other `Up` slot is cancelled outside
    /// the lock.
    pub fn signal_start_processing(&self, processor: &Arc<dyn Processor>) -> StartProcessingResult {
        let request_id = processor.request_id();
        let bucket = self.bucket(request_id);
        let mut map = bucket.lock();

        let group = match map.get_mut(&request_id.as_u64()) {
            Some(g) => g,
            None => return StartProcessingResult::Cancel,
        };

        let already_canceled = match group.find_slot_mut(processor) {
            Some(slot) => slot.dispatch_status == DispatchStatus::Canceled,
            None => return StartProcessingResult::Cancel,
        };
        if already_canceled {
            return StartProcessingResult::Cancel;
        }

        group.started_processor = Some(Arc::clone(processor));
        let losers: Vec<Arc<dyn Processor>> = group
            .processors
            .iter_mut()
            .filter(|s| s.dispatch_status == DispatchStatus::Up && !Arc::ptr_eq(&s.processor, processor))
            .map(|s| {
                s.dispatch_status = DispatchStatus::Canceled;
                Arc::clone(&s.processor)
            })
            .collect();

        drop(map);
        for loser in losers {
            loser.cancel();
        }
        StartProcessingResult::Proceed
    }

    /// §4.4.3. The heart of the protocol.
    pub fn signal_finish_processing(&self, processor: &Arc<dyn Processor>, source: SignalSource) {
        let request_id = processor.request_id();
        let reported_status = processor.get_status();

        if reported_status == ProcessorStatus::InProgress {
            dlog_trace!(
                "signal_finish_processing: reported status is InProgress for request {}, ignoring (bug upstream)",
                request_id
            );
            return;
        }

        let bucket = self.bucket(request_id);
        let mut map = bucket.lock();
        let group = match map.get_mut(&request_id.as_u64()) {
            Some(g) => g,
            None => {
                dlog_trace!("signal_finish_processing: request {} already retired", request_id);
                return;
            }
        };

        {
            let slot = match group.find_slot_mut(processor) {
                Some(s) => s,
                None => {
                    dlog_warn!("signal_finish_processing: unknown processor for request {}", request_id);
                    return;
                }
            };

            match source {
                SignalSource::Processor => {
                    if slot.dispatch_status == DispatchStatus::Finished {
                        dlog_trace!("signal_finish_processing: second self-report for request {}, tolerated", request_id);
                    } else {
                        slot.dispatch_status = DispatchStatus::Finished;
                        slot.finish_status = reported_status;
                        slot.done_status_registered = true;
                        if matches!(reported_status, ProcessorStatus::Error | ProcessorStatus::Timeout) {
                            dlog_warn!(
                                "processor '{}' on request {} finished with {}",
                                slot.processor.get_name(),
                                request_id,
                                reported_status
                            );
                        }
                    }
                }
                SignalSource::Framework => {
                    // Tolerate a stale observation without mutating
                    // dispatch_status; the processor is still expected to
                    // self-report (spec §9 open question).
                    slot.last_reported_trace_status = Some(reported_status);
                    dlog_trace!(
                        "signal_finish_processing: framework observed {} for request {}, awaiting self-report",
                        reported_status,
                        request_id
                    );
                }
            }
        }

        group.recompute_all_finished();

        let finished = group.finished_count();
        let finishing = group.finishing_count();
        let total = group.total_count();

        if finished + finishing == total && !group.flushed_and_finished && group.reply.is_output_ready() {
            if let Some(best) = group.best_finish_status() {
                let http_code = best.http_code();
                group.reply.prepare_reply_completion(http_code, 0);
                group.reply.flush(FlushMode::Final);
                group.flushed_and_finished = true;
                group.stop_printed = true;
                dlog_trace!("request {} flushed, http {}", request_id, http_code);
            }
        }

        let should_retire = finished == total;
        let worker_id = group.worker_id;
        drop(map);

        if should_retire {
            self.schedule_erase(request_id, worker_id);
        }
    }

    /// §4.4.4. Fires on the owning loop. Rolling: if the reply has seen
    /// activity within the window, re-arm for the remainder; otherwise
    /// cancel every live processor.
    pub fn on_request_timer(&self, request_id: RequestId) {
        self.counters.deadline_firings.fetch_add(1, Ordering::Relaxed);

        let bucket = self.bucket(request_id);
        let mut map = bucket.lock();
        let group = match map.get_mut(&request_id.as_u64()) {
            Some(g) => g,
            None => return,
        };

        let since_last_activity = Duration::from_micros(group.reply.get_timespan_from_last_activity_mks());
        if since_last_activity < self.request_timeout {
            let remainder = self.request_timeout - since_last_activity;
            group.timer_handle = Some(self.timers.arm(request_id, remainder));
            dlog_trace!(
                "request {} timer rolled forward, {:?} remaining",
                request_id,
                remainder
            );
            return;
        }

        group.reply.prepare_request_timeout_message("timed out due to prolonged backend inactivity");
        let losers: Vec<Arc<dyn Processor>> = group
            .processors
            .iter_mut()
            .filter(|s| s.dispatch_status == DispatchStatus::Up)
            .map(|s| {
                s.dispatch_status = DispatchStatus::Canceled;
                Arc::clone(&s.processor)
            })
            .collect();
        drop(map);
        for loser in losers {
            loser.cancel();
        }
    }

    /// §4.4.5, first half: connection-level cancellation. Does not flush
    /// or retire; processors must still self-report.
    pub fn signal_connection_canceled(&self, request_id: RequestId) {
        let bucket = self.bucket(request_id);
        let mut map = bucket.lock();
        let group = match map.get_mut(&request_id.as_u64()) {
            Some(g) => g,
            None => return,
        };
        let losers: Vec<Arc<dyn Processor>> = group
            .processors
            .iter_mut()
            .filter(|s| s.dispatch_status == DispatchStatus::Up)
            .map(|s| {
                s.dispatch_status = DispatchStatus::Canceled;
                Arc::clone(&s.processor)
            })
            .collect();
        drop(map);
        for loser in losers {
            loser.cancel();
        }
    }

    /// §4.4.5, second half: the transport layer saw the client connection
    /// die. No reply can be sent; the group waits only for self-reports.
    pub fn notify_request_finished(&self, request_id: RequestId) {
        let worker_id;
        let mut to_cancel = Vec::new();
        let should_check_retire;
        {
            let bucket = self.bucket(request_id);
            let mut map = bucket.lock();
            let group = match map.get_mut(&request_id.as_u64()) {
                Some(g) => g,
                None => return,
            };
            if group.flushed_and_finished {
                return;
            }
            group.low_level_close = true;
            worker_id = group.worker_id;
            for slot in group.processors.iter_mut() {
                if slot.processor.get_status() == ProcessorStatus::InProgress {
                    if slot.dispatch_status == DispatchStatus::Up {
                        slot.dispatch_status = DispatchStatus::Canceled;
                    }
                    to_cancel.push(Arc::clone(&slot.processor));
                }
            }
            group.recompute_all_finished();
            should_check_retire = group.all_processors_finished;
        }
        for p in to_cancel {
            p.cancel();
        }
        if should_check_retire {
            self.schedule_erase(request_id, worker_id);
        }
    }

    /// Administrative shutdown: cancel every `Up` slot across all groups.
    pub fn cancel_all(&self) {
        for bucket in &self.buckets {
            let losers: Vec<Arc<dyn Processor>> = {
                let mut map = bucket.lock();
                map.values_mut()
                    .flat_map(|group| {
                        group.processors.iter_mut().filter_map(|slot| {
                            if slot.dispatch_status == DispatchStatus::Up {
                                slot.dispatch_status = DispatchStatus::Canceled;
                                Some(Arc::clone(&slot.processor))
                            } else {
                                None
                            }
                        })
                    })
                    .collect()
            };
            for loser in losers {
                loser.cancel();
            }
        }
    }

    /// Poll the shared deadline heap for anything due and fire
    /// `on_request_timer` for it. Any worker's tick may call this; the
    /// heap itself guarantees each timer fires at most once.
    pub fn poll_timers(&self) {
        for (_, request_id) in self.timers.poll_expired(Instant::now()) {
            self.on_request_timer(request_id);
        }
    }

    fn schedule_erase(&self, request_id: RequestId, worker_id: u32) {
        {
            let bucket = self.bucket(request_id);
            let mut map = bucket.lock();
            if let Some(group) = map.get_mut(&request_id.as_u64()) {
                if group.timer_active {
                    if let Some(handle) = group.timer_handle {
                        self.timers.cancel(handle);
                    }
                    group.timer_active = false;
                }
            }
        }

        let binder = self.binders.lock().get(&worker_id).cloned();
        match binder {
            Some(binder) => {
                let this = self.arc_self();
                binder.postpone_invoke(move || this.erase_processor_group(request_id));
            }
            None => self.erase_processor_group(request_id),
        }
    }

    /// Posted through the Loop Binder so it cannot race with the
    /// still-on-stack processor frame that triggered it (spec §4.4.3).
    /// Marks the timer closed (standing in for the original's
    /// close-callback) and removes the group once safe-to-delete holds.
    pub fn erase_processor_group(&self, request_id: RequestId) {
        let bucket = self.bucket(request_id);
        let mut map = bucket.lock();
        let safe = match map.get_mut(&request_id.as_u64()) {
            Some(group) => {
                group.timer_closed = true;
                group.safe_to_delete()
            }
            None => return,
        };
        if safe {
            let group = map.remove(&request_id.as_u64()).expect("just matched above");
            drop(map);
            for slot in &group.processors {
                self.registry.release(slot.class_index);
            }
            self.counters.groups_live.fetch_sub(1, Ordering::Relaxed);
            self.counters.groups_retired.fetch_add(1, Ordering::Relaxed);
        } else {
            dlog_trace!("erase_processor_group: request {} not yet safe to delete", request_id);
        }
    }

    pub fn snapshot(&self) -> DispatcherSnapshot {
        let classes = self.registry.snapshot();
        let drops = self.binders.lock().values().map(|b| b.dropped_stale_callbacks()).sum();
        counters::load(&self.counters, classes, drops)
    }
}

impl GroupLiveness for Dispatcher {
    fn is_alive(&self, request_id: RequestId) -> bool {
        self.bucket(request_id).lock().contains_key(&request_id.as_u64())
    }
}

impl psg_core::traits::DispatcherCallback for Dispatcher {
    fn signal_start_processing(&self, processor: &Arc<dyn Processor>) -> StartProcessingResult {
        Dispatcher::signal_start_processing(self, processor)
    }

    fn signal_finish_processing(&self, processor: &Arc<dyn Processor>, source: SignalSource) {
        Dispatcher::signal_finish_processing(self, processor, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psg_core::traits::{ProcessorFactory, Reply};
    use std::sync::atomic::{AtomicBool, AtomicU8};
    use std::sync::Mutex;

    struct FakeRequest {
        request_id: RequestId,
    }
    impl Request for FakeRequest {
        fn request_id(&self) -> RequestId {
            self.request_id
        }
    }

    #[derive(Default)]
    struct FakeReply {
        chunks: Mutex<Vec<String>>,
        completion_code: AtomicU8,
        completed: AtomicBool,
    }
    impl Reply for FakeReply {
        fn is_output_ready(&self) -> bool {
            true
        }
        fn is_finished(&self) -> bool {
            true
        }
        fn is_completed(&self) -> bool {
            self.completed.load(Ordering::Relaxed)
        }
        fn flush(&self, _mode: FlushMode) {
            self.completed.store(true, Ordering::Relaxed);
        }
        fn prepare_reply_completion(&self, http_code: u16, _start_ts_mks: u64) {
            self.completion_code.store((http_code / 100) as u8, Ordering::Relaxed);
        }
        fn prepare_request_timeout_message(&self, text: &str) {
            self.chunks.lock().unwrap().push(text.to_string());
        }
        fn prepare_reply_message(&self, text: &str, _http_code: u16, _code: i32, _severity: &str) {
            self.chunks.lock().unwrap().push(text.to_string());
        }
        fn get_timespan_from_last_activity_mks(&self) -> u64 {
            0
        }
        fn send_trace(&self, _text: &str, _start_ts_mks: u64, _update_last_activity: bool) {}
        fn get_item_id(&self) -> u64 {
            0
        }
    }

    /// A processor whose terminal status is driven directly (`finish`) from
    /// the test, the way a real backend would set it after finishing I/O,
    /// kept alongside the `Arc<dyn Processor>` handed to the dispatcher so
    /// tests can reach both the trait-object view and the concrete one.
    struct FakeProcessor {
        request_id: RequestId,
        name: &'static str,
        status: Mutex<ProcessorStatus>,
        canceled: AtomicBool,
    }
    impl Processor for FakeProcessor {
        fn request_id(&self) -> RequestId {
            self.request_id
        }
        fn process(&self) {}
        fn cancel(&self) {
            self.canceled.store(true, Ordering::Relaxed);
            *self.status.lock().unwrap() = ProcessorStatus::Canceled;
        }
        fn get_status(&self) -> ProcessorStatus {
            *self.status.lock().unwrap()
        }
        fn get_name(&self) -> &str {
            self.name
        }
        fn get_group_name(&self) -> &str {
            "fake-group"
        }
        fn get_priority(&self) -> i32 {
            0
        }
    }

    impl FakeProcessor {
        fn finish(&self, status: ProcessorStatus) {
            *self.status.lock().unwrap() = status;
        }
    }

    /// Hands out processors and remembers every one it created (by concrete
    /// `Arc<FakeProcessor>`) so a test can drive `finish()` on them after
    /// `dispatch_request` has already erased the concrete type.
    #[derive(Default)]
    struct AlwaysAcceptFactory {
        name: &'static str,
        created: Mutex<Vec<Arc<FakeProcessor>>>,
    }
    impl AlwaysAcceptFactory {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(AlwaysAcceptFactory {
                name,
                created: Mutex::new(Vec::new()),
            })
        }
    }
    impl ProcessorFactory for AlwaysAcceptFactory {
        fn class_name(&self) -> &str {
            self.name
        }
        fn try_create(&self, request: &dyn Request, _reply: Arc<dyn Reply>, _priority: i32) -> Option<Arc<dyn Processor>> {
            let concrete = Arc::new(FakeProcessor {
                request_id: request.request_id(),
                name: self.name,
                status: Mutex::new(ProcessorStatus::InProgress),
                canceled: AtomicBool::new(false),
            });
            self.created.lock().unwrap().push(Arc::clone(&concrete));
            Some(concrete)
        }
    }

    fn single_class_dispatcher(name: &'static str, limit: usize) -> (Arc<Dispatcher>, Arc<AlwaysAcceptFactory>) {
        let factory = AlwaysAcceptFactory::new(name);
        let mut builder = ConcurrencyRegistry::builder();
        builder.register(name, limit, Arc::clone(&factory) as Arc<dyn ProcessorFactory>).unwrap();
        (Dispatcher::new(builder.build(), Duration::from_secs(60)), factory)
    }

    #[test]
    fn single_processor_runs_to_completion() {
        let (dispatcher, factory) = single_class_dispatcher("cassandra", 10);
        let request = FakeRequest { request_id: RequestId::from_raw(1000) };
        let reply: Arc<FakeReply> = Arc::new(FakeReply::default());
        let produced = dispatcher.dispatch_request(&request, Arc::clone(&reply) as Arc<dyn Reply>, 0);
        assert_eq!(produced.len(), 1);

        let proc = &produced[0];
        assert_eq!(dispatcher.signal_start_processing(proc), StartProcessingResult::Proceed);

        let concrete = Arc::clone(&factory.created.lock().unwrap()[0]);
        concrete.finish(ProcessorStatus::Done);
        dispatcher.signal_finish_processing(proc, SignalSource::Processor);

        assert!(reply.completed.load(Ordering::Relaxed));
        assert_eq!(reply.completion_code.load(Ordering::Relaxed), 2);
        assert_eq!(dispatcher.snapshot().groups_live, 0);
        assert_eq!(dispatcher.snapshot().groups_retired, 1);
    }

    #[test]
    fn two_processors_race_loser_is_canceled() {
        let cassandra = AlwaysAcceptFactory::new("cassandra");
        let lmdb = AlwaysAcceptFactory::new("lmdb");
        let mut builder = ConcurrencyRegistry::builder();
        builder.register("cassandra", 10, Arc::clone(&cassandra) as Arc<dyn ProcessorFactory>).unwrap();
        builder.register("lmdb", 10, Arc::clone(&lmdb) as Arc<dyn ProcessorFactory>).unwrap();
        let dispatcher = Dispatcher::new(builder.build(), Duration::from_secs(60));

        let request = FakeRequest { request_id: RequestId::from_raw(2000) };
        let reply: Arc<FakeReply> = Arc::new(FakeReply::default());
        let produced = dispatcher.dispatch_request(&request, Arc::clone(&reply) as Arc<dyn Reply>, 0);
        assert_eq!(produced.len(), 2);

        let winner = &produced[0];
        let loser = &produced[1];
        assert_eq!(dispatcher.signal_start_processing(winner), StartProcessingResult::Proceed);
        assert_eq!(dispatcher.signal_start_processing(loser), StartProcessingResult::Cancel);
        assert_eq!(loser.get_status(), ProcessorStatus::Canceled);
    }

    #[test]
    fn concurrency_cap_rejects_when_class_is_full() {
        let (dispatcher, _factory) = single_class_dispatcher("cassandra", 1);
        let first_request = FakeRequest { request_id: RequestId::from_raw(3000) };
        let reply1: Arc<FakeReply> = Arc::new(FakeReply::default());
        let produced1 = dispatcher.dispatch_request(&first_request, Arc::clone(&reply1) as Arc<dyn Reply>, 0);
        assert_eq!(produced1.len(), 1);

        let second_request = FakeRequest { request_id: RequestId::from_raw(3001) };
        let reply2: Arc<FakeReply> = Arc::new(FakeReply::default());
        let produced2 = dispatcher.dispatch_request(&second_request, Arc::clone(&reply2) as Arc<dyn Reply>, 0);
        assert!(produced2.is_empty());
        assert_eq!(dispatcher.snapshot().rejections, 1);
    }
}
