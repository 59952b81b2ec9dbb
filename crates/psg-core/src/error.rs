//! Error type for the core's own fatal conditions.
//!
//! These are the startup-time configuration errors of spec §7; everything a
//! processor reports flows through [`crate::status::ProcessorStatus`]
//! instead, never through this type.

use std::fmt;

#[derive(Debug)]
pub enum DispatchError {
    /// More classes were registered than `MAX_PROCESSOR_CLASSES` allows.
    TooManyProcessorClasses { limit: usize },
    /// A class name (case-insensitive) was registered twice.
    DuplicateProcessorClass { name: String },
    /// `request_timeout` could not be turned into a sane millisecond value.
    InvalidTimeout { seconds: f64 },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyProcessorClasses { limit } => {
                write!(f, "too many registered processor classes (limit {})", limit)
            }
            Self::DuplicateProcessorClass { name } => {
                write!(f, "duplicate processor class: {}", name)
            }
            Self::InvalidTimeout { seconds } => {
                write!(f, "invalid request_timeout: {}", seconds)
            }
        }
    }
}

impl std::error::Error for DispatchError {}

pub type Result<T> = std::result::Result<T, DispatchError>;
