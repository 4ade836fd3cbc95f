//! Health aggregation (component C5): a pure function over outbox status counts, so it can
//! be unit tested without standing up an HTTP endpoint or a database.

use serde::Serialize;

/// Aggregate health state of the outbox, derived from `pending` and `failed` counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    /// `pending` and `failed` are both below their warning threshold.
    Up,
    /// `pending` or `failed` has reached the warning threshold but neither exceeds the
    /// error threshold.
    Degraded,
    /// `pending` exceeds the error threshold: the backlog is growing faster than the
    /// processor can drain it.
    OutOfService,
    /// `failed` exceeds the error threshold: a large share of attempts are failing.
    Down,
}

/// Point-in-time snapshot of `count_by_status` across all five statuses, used as the input
/// to [`evaluate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub published: i64,
    pub failed: i64,
    pub dead: i64,
}

/// Evaluate the aggregate health from a status snapshot and the configured thresholds.
///
/// Keyed strictly on `pending` and `failed`, checked in order:
/// 1. `pending > error_threshold`: OUT_OF_SERVICE.
/// 2. `failed > error_threshold`: DOWN.
/// 3. `pending >= warning_threshold || failed >= warning_threshold`: DEGRADED.
/// 4. Otherwise: UP.
pub fn evaluate(counts: StatusCounts, warning_threshold: i64, error_threshold: i64) -> Health {
    if counts.pending > error_threshold {
        return Health::OutOfService;
    }

    if counts.failed > error_threshold {
        return Health::Down;
    }

    if counts.pending >= warning_threshold || counts.failed >= warning_threshold {
        return Health::Degraded;
    }

    Health::Up
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_outbox_is_up() {
        let counts = StatusCounts::default();
        assert_eq!(evaluate(counts, 100, 500), Health::Up);
    }

    #[test]
    fn pending_and_failed_under_warning_is_up() {
        let counts = StatusCounts {
            pending: 5,
            processing: 1,
            published: 1000,
            failed: 1,
            dead: 0,
        };
        assert_eq!(evaluate(counts, 100, 500), Health::Up);
    }

    #[test]
    fn pending_at_warning_threshold_is_degraded() {
        let counts = StatusCounts {
            pending: 100,
            processing: 0,
            published: 10,
            failed: 0,
            dead: 0,
        };
        assert_eq!(evaluate(counts, 100, 500), Health::Degraded);
    }

    #[test]
    fn failed_at_warning_threshold_is_degraded() {
        let counts = StatusCounts {
            pending: 0,
            processing: 0,
            published: 10,
            failed: 100,
            dead: 0,
        };
        assert_eq!(evaluate(counts, 100, 500), Health::Degraded);
    }

    #[test]
    fn pending_above_error_threshold_is_out_of_service() {
        let counts = StatusCounts {
            pending: 501,
            processing: 0,
            published: 10,
            failed: 0,
            dead: 0,
        };
        assert_eq!(evaluate(counts, 100, 500), Health::OutOfService);
    }

    #[test]
    fn failed_above_error_threshold_is_down() {
        let counts = StatusCounts {
            pending: 0,
            processing: 0,
            published: 10,
            failed: 600,
            dead: 0,
        };
        assert_eq!(evaluate(counts, 100, 500), Health::Down);
    }

    #[test]
    fn dead_letters_never_affect_health() {
        let counts = StatusCounts {
            pending: 0,
            processing: 0,
            published: 10,
            failed: 0,
            dead: 600,
        };
        assert_eq!(evaluate(counts, 100, 500), Health::Up);
    }

    #[test]
    fn pending_takes_priority_over_failed_when_both_exceed_error() {
        let counts = StatusCounts {
            pending: 501,
            processing: 0,
            published: 0,
            failed: 600,
            dead: 0,
        };
        assert_eq!(evaluate(counts, 100, 500), Health::OutOfService);
    }
}
