//! The one configuration value the core reads for itself (spec §6): the
//! request deadline, expressed the way the original config file did —
//! a fractional-seconds setting turned into whole milliseconds.

use crate::error::DispatchError;
use std::time::Duration;

/// `request_timeout` as read from configuration, in (possibly fractional)
/// seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestTimeoutSeconds(pub f64);

impl RequestTimeoutSeconds {
    /// Multiply by 1000 and round to the nearest millisecond, matching the
    /// original's conversion. Rejects non-finite or non-positive values.
    pub fn to_duration(self) -> Result<Duration, DispatchError> {
        if !self.0.is_finite() || self.0 <= 0.0 {
            return Err(DispatchError::InvalidTimeout { seconds: self.0 });
        }
        let millis = (self.0 * 1000.0).round() as u64;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_nearest_millisecond() {
        let d = RequestTimeoutSeconds(1.2345).to_duration().unwrap();
        assert_eq!(d.as_millis(), 1235);
    }

    #[test]
    fn rejects_non_positive() {
        assert!(RequestTimeoutSeconds(0.0).to_duration().is_err());
        assert!(RequestTimeoutSeconds(-1.0).to_duration().is_err());
        assert!(RequestTimeoutSeconds(f64::NAN).to_duration().is_err());
    }
}
