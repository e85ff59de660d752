use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::CycleFactory;
use super::coordinator::{CycleOutcome, RunCoordinator};

#[derive(Debug, Error)]
#[error("invalid schedule '{expression}': {source}")]
pub struct ScheduleError {
    expression: String,
    #[source]
    source: cron::error::Error,
}

/// A parsed cron expression.
///
/// Accepts the classic five-field form (minute precision, Sunday = 0 or 7),
/// the six/seven-field form with seconds (Sunday = 1), and `@hourly`-style
/// descriptors.
#[derive(Debug, Clone)]
pub struct CycleSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CycleSchedule {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let expression = expression.trim();
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let normalized = if !expression.starts_with('@') && fields.len() == 5 {
            // Unconvertible fields are passed through for the parser to reject
            let day_of_week =
                convert_day_of_week(fields[4]).unwrap_or_else(|| fields[4].to_string());
            format!("0 {} {day_of_week}", fields[..4].join(" "))
        } else {
            expression.to_string()
        };

        let schedule = cron::Schedule::from_str(&normalized)
            .map_err(|source| ScheduleError { expression: expression.to_string(), source })?;
        Ok(Self { expression: expression.to_string(), schedule })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First firing strictly after `after`
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedule.after(after).next()
    }
}

/// Rewrite a classic day-of-week field (Sunday = 0 or 7) as an explicit list
/// in the Sunday = 1 numbering `cron` expects. Fields using day names are
/// returned unchanged.
fn convert_day_of_week(field: &str) -> Option<String> {
    if field == "*" || field == "?" || field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Some(field.to_string());
    }

    let mut days = BTreeSet::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, step.parse::<usize>().ok().filter(|s| *s > 0)?),
            None => (part, 1),
        };
        let (start, end) = match range.split_once('-') {
            _ if range == "*" => (0, 6),
            Some((start, end)) => (start.parse::<u8>().ok()?, end.parse::<u8>().ok()?),
            // `n/step` runs from n to the end of the week
            None if part.contains('/') => (range.parse::<u8>().ok()?, 6),
            None => {
                let day = range.parse::<u8>().ok()?;
                (day, day)
            }
        };
        if start > end || end > 7 {
            return None;
        }
        days.extend((start..=end).step_by(step).map(|day| day % 7));
    }

    Some(days.iter().map(|day| (day + 1).to_string()).collect::<Vec<_>>().join(","))
}

/// Where to look for the next firing once `fired` has elapsed. A wall clock
/// lagging the timer must not yield `fired` again, and instants missed while
/// suspended are skipped rather than replayed.
fn resume_point<Tz: TimeZone>(fired: DateTime<Tz>, now: DateTime<Tz>) -> DateTime<Tz> {
    fired.max(now)
}

/// Fires a cycle at every scheduled instant.
///
/// Each firing gets its own task, so a cycle that is still running never
/// delays the timer; the new trigger just loses the race for the run lock.
pub struct CycleScheduler<F> {
    coordinator: RunCoordinator<F>,
}

impl<F: CycleFactory> CycleScheduler<F> {
    pub fn new(coordinator: RunCoordinator<F>) -> Self {
        Self { coordinator }
    }

    pub fn start(self, schedule: CycleSchedule) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Scheduling tests with cron expression: {}", schedule.expression());

            let mut after = Local::now();
            loop {
                let Some(next) = schedule.next_after(&after) else {
                    warn!("Schedule '{}' has no upcoming runs, stopping", schedule.expression());
                    return;
                };
                let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
                debug!("Next scheduled run at {} (in {:?})", next.to_rfc3339(), wait);
                tokio::time::sleep(wait).await;
                after = resume_point(next, Local::now());

                let handle = self.coordinator.trigger();
                tokio::spawn(async move {
                    match handle.await {
                        Ok(CycleOutcome::Busy) => debug!("Scheduled run dropped: cycle in progress"),
                        Ok(outcome) => debug!("Scheduled run finished: {:?}", outcome),
                        Err(e) => warn!("Scheduled run aborted: {}", e),
                    }
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike, Utc, Weekday};

    #[test]
    fn five_field_expressions_fire_on_the_minute() {
        let schedule = CycleSchedule::parse("0 */6 * * *").unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 1, 30, 15).unwrap();

        let next = schedule.next_after(&start).unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap());
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn seconds_form_and_descriptors_are_accepted() {
        assert!(CycleSchedule::parse("30 0 * * * *").is_ok());
        assert!(CycleSchedule::parse("@hourly").is_ok());
    }

    #[test]
    fn five_field_weekday_range_means_monday_to_friday() {
        let schedule = CycleSchedule::parse("0 9 * * 1-5").unwrap();
        // Saturday
        let start = Utc.with_ymd_and_hms(2024, 1, 6, 10, 0, 0).unwrap();

        let next = schedule.next_after(&start).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap());
        assert_eq!(next.weekday(), Weekday::Mon);

        let friday = CycleSchedule::parse("0 9 * * 5").unwrap().next_after(&start).unwrap();
        assert_eq!(friday.weekday(), Weekday::Fri);
    }

    #[test]
    fn five_field_sunday_accepts_zero_and_seven() {
        let start = Utc.with_ymd_and_hms(2024, 1, 6, 10, 0, 0).unwrap();

        for expression in ["0 3 * * 0", "0 3 * * 7"] {
            let next = CycleSchedule::parse(expression).unwrap().next_after(&start).unwrap();
            assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 7, 3, 0, 0).unwrap(), "{expression}");
        }
    }

    #[test]
    fn day_of_week_lists_and_steps_are_renumbered() {
        assert_eq!(convert_day_of_week("1-5").as_deref(), Some("2,3,4,5,6"));
        assert_eq!(convert_day_of_week("0,6").as_deref(), Some("1,7"));
        assert_eq!(convert_day_of_week("*/2").as_deref(), Some("1,3,5,7"));
        assert_eq!(convert_day_of_week("5-7").as_deref(), Some("1,6,7"));
        assert_eq!(convert_day_of_week("MON-FRI").as_deref(), Some("MON-FRI"));
        assert_eq!(convert_day_of_week("*").as_deref(), Some("*"));
        assert_eq!(convert_day_of_week("3-1"), None);
        assert!(CycleSchedule::parse("0 9 * * 9").is_err());
    }

    #[test]
    fn lagging_clock_does_not_repeat_a_firing() {
        let schedule = CycleSchedule::parse("0 */6 * * *").unwrap();
        let fired = Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap();
        let lagging_now = fired - chrono::Duration::milliseconds(5);

        let next = schedule.next_after(&resume_point(fired, lagging_now)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());

        let after_suspend = Utc.with_ymd_and_hms(2024, 1, 1, 19, 30, 0).unwrap();
        let next = schedule.next_after(&resume_point(fired, after_suspend)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn rejects_garbage() {
        let err = CycleSchedule::parse("every tuesday").unwrap_err();
        assert!(err.to_string().contains("every tuesday"));
        assert!(CycleSchedule::parse("61 * * * *").is_err());
    }
}
