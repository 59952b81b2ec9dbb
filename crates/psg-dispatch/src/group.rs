//! Processor Group and Processor Slot (spec §3).

use psg_core::ids::RequestId;
use psg_core::status::{DispatchStatus, ProcessorStatus};
use psg_core::traits::{Processor, Reply};
use psg_runtime::timer::TimerHandle;
use std::sync::Arc;

/// One processor instance within a group, plus the dispatcher's own view of
/// its lifecycle.
pub struct ProcessorSlot {
    pub processor: Arc<dyn Processor>,
    pub class_index: usize,
    pub dispatch_status: DispatchStatus,
    pub finish_status: ProcessorStatus,
    pub done_status_registered: bool,
    pub performance_registered: bool,
    pub last_reported_trace_status: Option<ProcessorStatus>,
}

impl ProcessorSlot {
    pub fn new(processor: Arc<dyn Processor>, class_index: usize) -> Self {
        ProcessorSlot {
            processor,
            class_index,
            dispatch_status: DispatchStatus::Up,
            finish_status: ProcessorStatus::InProgress,
            done_status_registered: false,
            performance_registered: false,
            last_reported_trace_status: None,
        }
    }

    /// A slot counts toward `finishing` once it is `Canceled`, or once its
    /// processor already reports a terminal status but hasn't self-reported
    /// yet (spec §4.4.3).
    pub fn is_finishing(&self) -> bool {
        if self.dispatch_status == DispatchStatus::Finished {
            return false;
        }
        self.dispatch_status == DispatchStatus::Canceled || self.processor.get_status().is_terminal()
    }
}

/// Per-request container of live processor instances plus the request's
/// deadline timer (spec §3).
pub struct ProcessorGroup {
    pub request_id: RequestId,
    pub reply: Arc<dyn Reply>,
    pub worker_id: u32,
    pub processors: Vec<ProcessorSlot>,
    pub timer_handle: Option<TimerHandle>,
    pub timer_active: bool,
    pub timer_closed: bool,
    pub flushed_and_finished: bool,
    pub all_processors_finished: bool,
    pub low_level_close: bool,
    pub stop_printed: bool,
    pub started_processor: Option<Arc<dyn Processor>>,
}

impl ProcessorGroup {
    pub fn new(request_id: RequestId, reply: Arc<dyn Reply>, worker_id: u32) -> Self {
        ProcessorGroup {
            request_id,
            reply,
            worker_id,
            processors: Vec::new(),
            timer_handle: None,
            timer_active: false,
            timer_closed: false,
            flushed_and_finished: false,
            all_processors_finished: false,
            low_level_close: false,
            stop_printed: false,
            started_processor: None,
        }
    }

    pub fn find_slot_mut(&mut self, processor: &Arc<dyn Processor>) -> Option<&mut ProcessorSlot> {
        self.processors
            .iter_mut()
            .find(|s| Arc::ptr_eq(&s.processor, processor))
    }

    pub fn recompute_all_finished(&mut self) {
        self.all_processors_finished = self
            .processors
            .iter()
            .all(|s| s.dispatch_status == DispatchStatus::Finished);
    }

    pub fn finished_count(&self) -> usize {
        self.processors
            .iter()
            .filter(|s| s.dispatch_status == DispatchStatus::Finished)
            .count()
    }

    pub fn finishing_count(&self) -> usize {
        self.processors.iter().filter(|s| s.is_finishing()).count()
    }

    pub fn total_count(&self) -> usize {
        self.processors.len()
    }

    /// The minimum (best) finish status across every slot that has
    /// self-reported, per the severity ranking of spec §4.4.6.
    pub fn best_finish_status(&self) -> Option<ProcessorStatus> {
        self.processors
            .iter()
            .filter(|s| s.dispatch_status == DispatchStatus::Finished)
            .map(|s| s.finish_status)
            .reduce(|a, b| a.best_of(b))
    }

    /// Every slot currently `Up`, e.g. for a cancellation fan-out.
    pub fn up_slots(&self) -> Vec<Arc<dyn Processor>> {
        self.processors
            .iter()
            .filter(|s| s.dispatch_status == DispatchStatus::Up)
            .map(|s| Arc::clone(&s.processor))
            .collect()
    }

    /// Safe-to-delete predicate (spec §3). `reply.is_completed()` stands in
    /// for the original's `libh2o_finished` — whether the underlying
    /// transport has fully drained the stream on the wire.
    pub fn safe_to_delete(&self) -> bool {
        if !self.timer_closed {
            return false;
        }
        let normal_path = self.flushed_and_finished && self.all_processors_finished && self.reply.is_completed();
        let dead_connection_path = self.low_level_close && self.all_processors_finished;
        normal_path || dead_connection_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psg_core::traits::FlushMode;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeProcessor {
        request_id: RequestId,
        status: ProcessorStatus,
    }

    impl Processor for FakeProcessor {
        fn request_id(&self) -> RequestId {
            self.request_id
        }
        fn process(&self) {}
        fn cancel(&self) {}
        fn get_status(&self) -> ProcessorStatus {
            self.status
        }
        fn get_name(&self) -> &str {
            "fake"
        }
        fn get_group_name(&self) -> &str {
            "fake-group"
        }
        fn get_priority(&self) -> i32 {
            0
        }
    }

    #[derive(Default)]
    struct FakeReply {
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
        fn flush(&self, _mode: FlushMode) {}
        fn prepare_reply_completion(&self, _http_code: u16, _start_ts_mks: u64) {}
        fn prepare_request_timeout_message(&self, _text: &str) {}
        fn prepare_reply_message(&self, _text: &str, _http_code: u16, _code: i32, _severity: &str) {}
        fn get_timespan_from_last_activity_mks(&self) -> u64 {
            0
        }
        fn send_trace(&self, _text: &str, _start_ts_mks: u64, _update_last_activity: bool) {}
        fn get_item_id(&self) -> u64 {
            0
        }
    }

    fn processor(request_id: RequestId, status: ProcessorStatus) -> Arc<dyn Processor> {
        Arc::new(FakeProcessor { request_id, status })
    }

    #[test]
    fn best_finish_status_picks_lowest_severity() {
        let request_id = RequestId::from_raw(1);
        let mut group = ProcessorGroup::new(request_id, Arc::new(FakeReply::default()), 0);
        group.processors.push(ProcessorSlot {
            dispatch_status: DispatchStatus::Finished,
            finish_status: ProcessorStatus::Canceled,
            ..ProcessorSlot::new(processor(request_id, ProcessorStatus::Canceled), 0)
        });
        group.processors.push(ProcessorSlot {
            dispatch_status: DispatchStatus::Finished,
            finish_status: ProcessorStatus::Done,
            ..ProcessorSlot::new(processor(request_id, ProcessorStatus::Done), 1)
        });
        assert_eq!(group.best_finish_status(), Some(ProcessorStatus::Done));
    }

    #[test]
    fn safe_to_delete_requires_timer_closed_and_finished_and_completed() {
        let request_id = RequestId::from_raw(2);
        let mut group = ProcessorGroup::new(request_id, Arc::new(FakeReply::default()), 0);
        assert!(!group.safe_to_delete());

        group.timer_closed = true;
        assert!(!group.safe_to_delete());

        group.flushed_and_finished = true;
        group.all_processors_finished = true;
        assert!(!group.safe_to_delete());
    }

    #[test]
    fn safe_to_delete_dead_connection_path_ignores_completion() {
        let request_id = RequestId::from_raw(3);
        let mut group = ProcessorGroup::new(request_id, Arc::new(FakeReply::default()), 0);
        group.timer_closed = true;
        group.low_level_close = true;
        group.all_processors_finished = true;
        assert!(group.safe_to_delete());
    }

    #[test]
    fn is_finishing_counts_canceled_and_terminal_unreported() {
        let request_id = RequestId::from_raw(4);
        let canceled = ProcessorSlot {
            dispatch_status: DispatchStatus::Canceled,
            ..ProcessorSlot::new(processor(request_id, ProcessorStatus::InProgress), 0)
        };
        assert!(canceled.is_finishing());

        let terminal_unreported = ProcessorSlot::new(processor(request_id, ProcessorStatus::Done), 0);
        assert!(terminal_unreported.is_finishing());

        let finished = ProcessorSlot {
            dispatch_status: DispatchStatus::Finished,
            ..ProcessorSlot::new(processor(request_id, ProcessorStatus::Done), 0)
        };
        assert!(!finished.is_finishing());
    }
}
