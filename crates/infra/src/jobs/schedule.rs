//! Fixed daily run slots for the scheduled scraper.

use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use thiserror::Error;

use crate::config::ScheduleConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("schedule needs at least one hour")]
    Empty,

    #[error("hour {0} is out of range (0-23)")]
    InvalidHour(u32),
}

/// Whole UTC hours at which a scrape runs every day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSchedule {
    hours: Vec<u32>,
}

impl Default for RunSchedule {
    fn default() -> Self {
        Self {
            hours: vec![9, 14, 21],
        }
    }
}

impl RunSchedule {
    pub fn new(hours: impl IntoIterator<Item = u32>) -> Result<Self, ScheduleError> {
        let mut hours: Vec<u32> = hours.into_iter().collect();
        if let Some(&bad) = hours.iter().find(|h| **h > 23) {
            return Err(ScheduleError::InvalidHour(bad));
        }
        hours.sort_unstable();
        hours.dedup();
        if hours.is_empty() {
            return Err(ScheduleError::Empty);
        }
        Ok(Self { hours })
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self, ScheduleError> {
        Self::new(config.hours.iter().copied())
    }

    pub fn hours(&self) -> &[u32] {
        &self.hours
    }

    /// First slot strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);

        [today, tomorrow]
            .into_iter()
            .flat_map(|day| {
                self.hours.iter().filter_map(move |&hour| {
                    NaiveTime::from_hms_opt(hour, 0, 0).map(|t| Utc.from_utc_datetime(&day.and_time(t)))
                })
            })
            .find(|slot| *slot > now)
            .unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, m, s).unwrap()
    }

    #[test]
    fn picks_the_next_slot_today() {
        let schedule = RunSchedule::default();
        assert_eq!(schedule.next_after(at(0, 0, 0)), at(9, 0, 0));
        assert_eq!(schedule.next_after(at(9, 30, 0)), at(14, 0, 0));
        assert_eq!(schedule.next_after(at(20, 59, 59)), at(21, 0, 0));
    }

    #[test]
    fn a_slot_that_is_now_is_not_next() {
        let schedule = RunSchedule::default();
        assert_eq!(schedule.next_after(at(14, 0, 0)), at(21, 0, 0));
    }

    #[test]
    fn rolls_over_to_tomorrow_after_the_last_slot() {
        let schedule = RunSchedule::default();
        let next = schedule.next_after(at(21, 0, 0));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn hours_are_sorted_and_deduplicated() {
        let schedule = RunSchedule::new([21, 3, 21, 9]).unwrap();
        assert_eq!(schedule.hours(), &[3, 9, 21]);
        assert_eq!(schedule.next_after(at(1, 0, 0)), at(3, 0, 0));
    }

    #[test]
    fn rejects_bad_hours() {
        assert_eq!(RunSchedule::new(Vec::new()), Err(ScheduleError::Empty));
        assert_eq!(RunSchedule::new([9, 24]), Err(ScheduleError::InvalidHour(24)));
    }
}
