//! Streak and safety-score derivation. Pure functions, applied inside the
//! submission transaction.

use chrono::{DateTime, Days, Utc};

use crate::utils::time::utc_date;

pub const MIN_SAFETY_SCORE: f64 = 0.0;
pub const MAX_SAFETY_SCORE: f64 = 100.0;

/// Points added to the safety score for a quiz result: 100% gives +5, 0% gives -5.
pub fn score_adjustment(final_score: f64) -> f64 {
    (final_score - 50.0) / 10.0
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn next_safety_score(current: f64, final_score: f64) -> f64 {
    round2((current + score_adjustment(final_score)).clamp(MIN_SAFETY_SCORE, MAX_SAFETY_SCORE))
}

/// Consecutive-day streak after a quiz taken at `now`.
pub fn next_streak(current: u32, last_quiz: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u32 {
    let today = utc_date(now);
    let Some(last_date) = last_quiz.map(utc_date) else {
        return 1;
    };

    if last_date == today {
        current
    } else if today.checked_sub_days(Days::new(1)) == Some(last_date) {
        current.saturating_add(1)
    } else {
        1
    }
}
