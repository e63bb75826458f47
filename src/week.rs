//! Gestational week from a due date.

use chrono::{Local, NaiveDate};

/// Length of a full term, in days.
pub const TERM_DAYS: i64 = 280;
pub const FIRST_WEEK: u8 = 1;
pub const LAST_WEEK: u8 = 40;

/// Current week of pregnancy, clamped into `[1, 40]`.
///
/// `days_pregnant = 280 - (due_date - today)`, `week = ceil(days_pregnant / 7)`.
pub fn current_week(due_date: NaiveDate, today: NaiveDate) -> u8 {
    let days_remaining = (due_date - today).num_days();
    let days_pregnant = TERM_DAYS - days_remaining;
    // ceil division for a positive divisor, correct for negative numerators too
    let week = (days_pregnant + 6).div_euclid(7);
    week.clamp(FIRST_WEEK as i64, LAST_WEEK as i64) as u8
}

/// [`current_week`] against the local calendar date.
pub fn current_week_today(due_date: NaiveDate) -> u8 {
    current_week(due_date, today())
}

pub fn weeks_remaining(week: u8) -> u8 {
    LAST_WEEK.saturating_sub(week)
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn is_valid_week(week: u8) -> bool {
    (FIRST_WEEK..=LAST_WEEK).contains(&week)
}
