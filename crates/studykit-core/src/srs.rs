//! SM-2 spaced-repetition scheduling.
//!
//! [`review`] is a pure function of `(prior state, grade, now)` — it reads
//! no clock and touches no storage, so schedule transitions can be tested
//! exhaustively without a database. Persistence and conflict handling
//! live behind the store seam.
//!
//! # Algorithm
//!
//! Grades are ordinal quality ratings from 0 ("complete blackout") to 5
//! ("perfect response"); out-of-range input is clamped.
//!
//! - `grade < 3` — failed recall. Repetition count resets to 0 and the
//!   interval restarts at 1 day.
//! - `grade >= 3` — successful recall. The repetition count increments
//!   and the interval becomes 1 day (first success), 6 days (second), or
//!   `round(previous × ease)` days thereafter, never below 1.
//!
//! The ease factor is updated for every review by
//! `ease + (0.1 − (5 − g)(0.08 + (5 − g)·0.02))` and clamped to a floor
//! of 1.3, which prevents runaway shrinking intervals.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Ease factor floor. Intervals stop shrinking once a card reaches it.
pub const MIN_EASE_FACTOR: f64 = 1.3;
/// Ease factor assigned to brand-new cards.
pub const INITIAL_EASE_FACTOR: f64 = 2.5;

/// Per-card scheduling state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewState {
    /// Multiplier controlling interval growth; always `>= 1.3`.
    pub ease_factor: f64,
    /// Current interval in days; 0 for a card never reviewed.
    pub interval_days: i64,
    /// Count of consecutive successful reviews since the last failure.
    pub repetitions: i64,
    /// When the card next comes due.
    pub due: DateTime<Utc>,
    /// Timestamp of the most recent review, if any.
    pub last_reviewed: Option<DateTime<Utc>>,
}

impl ReviewState {
    /// State for a freshly created card: due immediately, never reviewed.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            ease_factor: INITIAL_EASE_FACTOR,
            interval_days: 0,
            repetitions: 0,
            due: now,
            last_reviewed: None,
        }
    }
}

/// Apply one review with the given quality grade, producing the next
/// schedule state. `now` is the review timestamp; the new due date is
/// `now + interval`.
pub fn review(state: &ReviewState, grade: u8, now: DateTime<Utc>) -> ReviewState {
    let grade = grade.min(5);

    let (repetitions, interval_days) = if grade < 3 {
        (0, 1)
    } else {
        let interval = match state.repetitions {
            0 => 1,
            1 => 6,
            _ => ((state.interval_days as f64 * state.ease_factor).round() as i64).max(1),
        };
        (state.repetitions + 1, interval)
    };

    let q = f64::from(grade);
    let ease_factor =
        (state.ease_factor + (0.1 - (5.0 - q) * (0.08 + (5.0 - q) * 0.02))).max(MIN_EASE_FACTOR);

    ReviewState {
        ease_factor,
        interval_days,
        repetitions,
        due: now + Duration::days(interval_days),
        last_reviewed: Some(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn failed_recall_resets_schedule_regardless_of_prior_state() {
        let mature = ReviewState {
            ease_factor: 2.8,
            interval_days: 120,
            repetitions: 9,
            due: t0(),
            last_reviewed: Some(t0()),
        };
        for grade in 0..3 {
            let next = review(&mature, grade, t0());
            assert_eq!(next.repetitions, 0, "grade {grade}");
            assert_eq!(next.interval_days, 1, "grade {grade}");
            assert_eq!(next.due, t0() + Duration::days(1));
        }
    }

    #[test]
    fn first_and_second_success_are_one_then_six_days() {
        let fresh = ReviewState::new(t0());
        let first = review(&fresh, 5, t0());
        assert_eq!(first.interval_days, 1);
        assert_eq!(first.repetitions, 1);

        let second = review(&first, 5, t0() + Duration::days(1));
        assert_eq!(second.interval_days, 6);
        assert_eq!(second.repetitions, 2);
    }

    #[test]
    fn third_success_multiplies_by_ease() {
        let state = ReviewState {
            ease_factor: 2.5,
            interval_days: 6,
            repetitions: 2,
            due: t0(),
            last_reviewed: Some(t0()),
        };
        let next = review(&state, 4, t0());
        assert_eq!(next.interval_days, 15); // round(6 × 2.5)
        assert_eq!(next.repetitions, 3);
    }

    #[test]
    fn interval_never_drops_below_one_day() {
        let state = ReviewState {
            ease_factor: MIN_EASE_FACTOR,
            interval_days: 0,
            repetitions: 5,
            due: t0(),
            last_reviewed: None,
        };
        let next = review(&state, 3, t0());
        assert!(next.interval_days >= 1);
    }

    #[test]
    fn ease_factor_never_drops_below_floor() {
        let mut state = ReviewState::new(t0());
        let mut now = t0();
        // Hammer the card with failures and barely-passing grades.
        for grade in [0, 1, 0, 2, 3, 0, 1, 1, 0, 3, 0, 0] {
            state = review(&state, grade, now);
            assert!(
                state.ease_factor >= MIN_EASE_FACTOR - 1e-9,
                "ease {} after grade {}",
                state.ease_factor,
                grade
            );
            now += Duration::days(1);
        }
    }

    #[test]
    fn perfect_grade_raises_ease() {
        let state = ReviewState::new(t0());
        let next = review(&state, 5, t0());
        assert!((next.ease_factor - 2.6).abs() < 1e-9);
    }

    #[test]
    fn grade_four_keeps_ease_unchanged() {
        let state = ReviewState::new(t0());
        let next = review(&state, 4, t0());
        assert!((next.ease_factor - 2.5).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_grades_are_clamped() {
        let state = ReviewState::new(t0());
        assert_eq!(review(&state, 9, t0()), review(&state, 5, t0()));
    }

    #[test]
    fn failure_after_success_restarts_progression() {
        let mut state = ReviewState::new(t0());
        let mut now = t0();
        for _ in 0..4 {
            state = review(&state, 5, now);
            now = state.due;
        }
        assert!(state.interval_days > 6);

        state = review(&state, 1, now);
        assert_eq!(state.interval_days, 1);

        // Recovery walks the 1 → 6 ladder again.
        state = review(&state, 4, now + Duration::days(1));
        assert_eq!(state.interval_days, 1);
        state = review(&state, 4, now + Duration::days(2));
        assert_eq!(state.interval_days, 6);
    }

    #[test]
    fn review_is_pure() {
        let state = ReviewState::new(t0());
        let a = review(&state, 3, t0());
        let b = review(&state, 3, t0());
        assert_eq!(a, b);
    }
}
