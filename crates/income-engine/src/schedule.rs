//! Deterministic payout calendar.
//!
//! Due dates are a pure function of the start instant and the plan frequency, which
//! makes every period addressable by its index. Dates are strictly after the start
//! instant and keep the start's time of day.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

use crate::plans::PayoutFrequency;

fn at_start_time(date: NaiveDate, start: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(start.time()))
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// Payout dates of one month for the given days, clamped and de-duplicated
fn month_dates(year: i32, month: u32, days: &[u32]) -> Vec<NaiveDate> {
    let last = last_day_of_month(year, month);
    let mut dates: Vec<NaiveDate> = days
        .iter()
        .filter_map(|d| NaiveDate::from_ymd_opt(year, month, (*d).min(last)))
        .collect();
    dates.sort();
    dates.dedup();
    dates
}

/// Infinite, strictly increasing sequence of due dates after `start`
pub fn due_dates(
    start: DateTime<Utc>,
    frequency: &PayoutFrequency,
) -> Box<dyn Iterator<Item = DateTime<Utc>> + Send + '_> {
    match frequency {
        PayoutFrequency::Daily => Box::new((1i64..).map(move |k| start + Duration::days(k))),
        PayoutFrequency::Weekly(weekdays) => {
            if weekdays.is_empty() {
                return Box::new(std::iter::empty());
            }
            Box::new(
                std::iter::successors(start.date_naive().succ_opt(), |d| d.succ_opt())
                    .filter(move |d| weekdays.contains(&d.weekday()))
                    .map(move |d| at_start_time(d, start)),
            )
        }
        PayoutFrequency::Monthly(days) => {
            if days.is_empty() {
                return Box::new(std::iter::empty());
            }
            let first = (start.year(), start.month());
            let start_date = start.date_naive();
            Box::new(
                std::iter::successors(Some(first), |(y, m)| {
                    Some(if *m == 12 { (y + 1, 1) } else { (*y, m + 1) })
                })
                .flat_map(move |(y, m)| month_dates(y, m, days))
                .filter(move |d| *d > start_date)
                .map(move |d| at_start_time(d, start)),
            )
        }
    }
}

/// Due date of the period with the given 0-based index
pub fn due_date(start: DateTime<Utc>, frequency: &PayoutFrequency, index: u32) -> Option<DateTime<Utc>> {
    due_dates(start, frequency).nth(index as usize)
}

/// Number of periods due at `now`, never more than `limit`
pub fn due_count(start: DateTime<Utc>, frequency: &PayoutFrequency, now: DateTime<Utc>, limit: u32) -> u32 {
    if now <= start {
        return 0;
    }
    due_dates(start, frequency)
        .take(limit as usize)
        .take_while(|due| *due <= now)
        .count() as u32
}

/// Bounds of period `index`: previous due date (or start) to its own due date
pub fn period_bounds(
    start: DateTime<Utc>,
    frequency: &PayoutFrequency,
    index: u32,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut dates = due_dates(start, frequency);
    let opens = if index == 0 {
        start
    } else {
        dates.nth(index as usize - 1)?
    };
    let closes = dates.next()?;
    Some((opens, closes))
}
