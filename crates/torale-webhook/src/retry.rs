//! The fixed webhook retry schedule (spec.md §4.7): six attempts spaced by
//! increasing delays, after which delivery is marked permanently failed.

use chrono::{DateTime, Duration, Utc};

pub const MAX_ATTEMPTS: i32 = 6;

const RETRY_DELAYS_SECS: [i64; 5] = [60, 300, 1800, 7200, 43200];

/// Delay before the attempt numbered `next_attempt_number` (1-indexed, the
/// attempt about to be made). Returns `None` once `next_attempt_number`
/// exceeds [`MAX_ATTEMPTS`] — the caller should mark the delivery
/// permanently failed instead of scheduling another retry.
pub fn delay_for_attempt(next_attempt_number: i32) -> Option<Duration> {
    if next_attempt_number < 1 || next_attempt_number > MAX_ATTEMPTS {
        return None;
    }
    if next_attempt_number == 1 {
        return Some(Duration::zero());
    }
    let idx = (next_attempt_number - 2) as usize;
    RETRY_DELAYS_SECS.get(idx).map(|secs| Duration::seconds(*secs))
}

/// Compute `next_retry_at` for the attempt numbered `next_attempt_number`,
/// relative to `now`.
pub fn next_retry_at(next_attempt_number: i32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    delay_for_attempt(next_attempt_number).map(|d| now + d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_has_no_delay() {
        assert_eq!(delay_for_attempt(1), Some(Duration::zero()));
    }

    #[test]
    fn delays_follow_the_fixed_schedule() {
        assert_eq!(delay_for_attempt(2), Some(Duration::seconds(60)));
        assert_eq!(delay_for_attempt(3), Some(Duration::seconds(300)));
        assert_eq!(delay_for_attempt(4), Some(Duration::seconds(1800)));
        assert_eq!(delay_for_attempt(5), Some(Duration::seconds(7200)));
        assert_eq!(delay_for_attempt(6), Some(Duration::seconds(43200)));
    }

    #[test]
    fn exhausted_attempts_return_none() {
        assert_eq!(delay_for_attempt(7), None);
        assert_eq!(delay_for_attempt(0), None);
    }
}
