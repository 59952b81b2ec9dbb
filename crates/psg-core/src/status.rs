//! Status vocabulary shared between the dispatcher and processors.

use core::cmp::Ordering;
use core::fmt;

/// A processor's self-reported (or observed) status.
///
/// `InProgress` is the only non-terminal value; every other variant is a
/// terminal outcome a processor can report exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorStatus {
    InProgress,
    Done,
    NotFound,
    Canceled,
    Error,
    Timeout,
    Unauthorized,
}

impl ProcessorStatus {
    /// True for every variant other than `InProgress`.
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProcessorStatus::InProgress)
    }

    /// Ascending severity rank used to pick the "best" status across a
    /// group: `Done < NotFound < Canceled < Error/Timeout/anything else`.
    /// `InProgress` has no meaningful rank and is given the highest one so
    /// it never accidentally wins a `min()` comparison.
    fn severity(self) -> u8 {
        match self {
            ProcessorStatus::Done => 0,
            ProcessorStatus::NotFound => 1,
            ProcessorStatus::Canceled => 2,
            ProcessorStatus::Error | ProcessorStatus::Timeout | ProcessorStatus::Unauthorized => 3,
            ProcessorStatus::InProgress => 4,
        }
    }

    /// The HTTP status code this finish status maps to (spec §4.4.6).
    pub fn http_code(self) -> u16 {
        match self {
            ProcessorStatus::Done => 200,
            ProcessorStatus::NotFound | ProcessorStatus::Canceled => 404,
            _ => 500,
        }
    }

    /// Return whichever of `self`/`other` is less severe, i.e. "better".
    /// Ties keep `self`.
    pub fn best_of(self, other: ProcessorStatus) -> ProcessorStatus {
        if other.severity() < self.severity() {
            other
        } else {
            self
        }
    }
}

impl PartialOrd for ProcessorStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProcessorStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.severity().cmp(&other.severity())
    }
}

impl fmt::Display for ProcessorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessorStatus::InProgress => "in-progress",
            ProcessorStatus::Done => "done",
            ProcessorStatus::NotFound => "not-found",
            ProcessorStatus::Canceled => "canceled",
            ProcessorStatus::Error => "error",
            ProcessorStatus::Timeout => "timeout",
            ProcessorStatus::Unauthorized => "unauthorized",
        };
        f.write_str(s)
    }
}

/// The dispatcher's own view of a processor slot. Never transitions back
/// once `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    Up,
    Canceled,
    Finished,
}

/// Who is reporting a finish: the processor itself, or a higher layer that
/// merely observed `get_status()` returning something terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    Processor,
    Framework,
}

/// Outcome of `signal_start_processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartProcessingResult {
    Proceed,
    Cancel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_matches_spec() {
        assert!(ProcessorStatus::Done < ProcessorStatus::NotFound);
        assert!(ProcessorStatus::NotFound < ProcessorStatus::Canceled);
        assert!(ProcessorStatus::Canceled < ProcessorStatus::Error);
        assert!(ProcessorStatus::Canceled < ProcessorStatus::Timeout);
    }

    #[test]
    fn best_of_picks_lower_severity() {
        let best = ProcessorStatus::Done.best_of(ProcessorStatus::Canceled);
        assert_eq!(best, ProcessorStatus::Done);
        let best = ProcessorStatus::Error.best_of(ProcessorStatus::Done);
        assert_eq!(best, ProcessorStatus::Done);
    }

    #[test]
    fn http_mapping() {
        assert_eq!(ProcessorStatus::Done.http_code(), 200);
        assert_eq!(ProcessorStatus::NotFound.http_code(), 404);
        assert_eq!(ProcessorStatus::Canceled.http_code(), 404);
        assert_eq!(ProcessorStatus::Error.http_code(), 500);
        assert_eq!(ProcessorStatus::Timeout.http_code(), 500);
        assert_eq!(ProcessorStatus::Unauthorized.http_code(), 500);
    }
}
