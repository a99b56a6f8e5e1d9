//! Slot computation.
//!
//! Pure functions over one employee's day: working hours with an optional
//! break, schedule blocks (one-off or recurring weekly), and the intervals
//! already taken by appointments. Nothing here touches the database; the
//! `scheduling` module loads a [`DaySchedule`] and hands it over.
//!
//! All intervals are half-open (`[start, end)`), so an appointment ending at
//! 10:00 does not conflict with one starting at 10:00.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;

use crate::errors::AppError;

const MINUTES_PER_DAY: u32 = 24 * 60;
/// Longest service or slot step the engine can place within one day.
pub const MAX_DURATION_MINUTES: i32 = MINUTES_PER_DAY as i32 - 1;

/// Half-open time interval within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Interval {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, AppError> {
        if start >= end {
            return Err(AppError::BadRequest(format!(
                "Interval start {} must be before end {}",
                start.format("%H:%M"),
                end.format("%H:%M")
            )));
        }
        Ok(Self { start, end })
    }

    fn minutes(&self) -> (u32, u32) {
        (minute_of_day(self.start), minute_of_day(self.end))
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Working hours for one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingDay {
    pub hours: Interval,
    pub break_time: Option<Interval>,
}

/// A block rule as stored: either pinned to a date or repeating on a weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRule {
    pub date: Option<NaiveDate>,
    /// 0 = Sunday .. 6 = Saturday.
    pub weekday: Option<i16>,
    pub interval: Interval,
}

impl BlockRule {
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        match (self.date, self.weekday) {
            (Some(d), _) => d == date,
            (None, Some(w)) => w == weekday_index(date),
            (None, None) => false,
        }
    }
}

/// Everything needed to decide which slots of one employee's day are free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySchedule {
    pub date: NaiveDate,
    pub working: Option<WorkingDay>,
    pub blocked: Vec<Interval>,
    pub busy: Vec<Interval>,
}

impl DaySchedule {
    pub fn new(date: NaiveDate, working: Option<WorkingDay>) -> Self {
        Self {
            date,
            working,
            blocked: Vec::new(),
            busy: Vec::new(),
        }
    }

    /// Adds every rule that applies on this schedule's date.
    pub fn with_blocks<'a>(mut self, rules: impl IntoIterator<Item = &'a BlockRule>) -> Self {
        let date = self.date;
        self.blocked.extend(
            rules
                .into_iter()
                .filter(|r| r.applies_on(date))
                .map(|r| r.interval),
        );
        self
    }

    pub fn with_busy(mut self, busy: impl IntoIterator<Item = Interval>) -> Self {
        self.busy.extend(busy);
        self
    }

    fn unavailable(&self) -> impl Iterator<Item = &Interval> {
        self.working
            .iter()
            .filter_map(|w| w.break_time.as_ref())
            .chain(self.blocked.iter())
            .chain(self.busy.iter())
    }
}

/// A bookable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot {
    #[serde(serialize_with = "serialize_hhmm")]
    pub start: NaiveTime,
    #[serde(serialize_with = "serialize_hhmm")]
    pub end: NaiveTime,
}

fn serialize_hhmm<S: serde::Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&t.format("%H:%M").to_string())
}

/// 0 = Sunday .. 6 = Saturday, matching the `weekday` columns.
pub fn weekday_index(date: NaiveDate) -> i16 {
    date.weekday().num_days_from_sunday() as i16
}

fn minute_of_day(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

fn time_of_minute(minute: u32) -> Option<NaiveTime> {
    if minute >= MINUTES_PER_DAY {
        return None;
    }
    NaiveTime::from_hms_opt(minute / 60, minute % 60, 0)
}

fn validate_minutes(name: &str, value: i32) -> Result<u32, AppError> {
    if value <= 0 || value as u32 >= MINUTES_PER_DAY {
        return Err(AppError::BadRequest(format!(
            "{} must be between 1 and {} minutes",
            name,
            MINUTES_PER_DAY - 1
        )));
    }
    Ok(value as u32)
}

/// End of an appointment starting at `start`, or `None` when it would run
/// past midnight.
pub fn end_of(start: NaiveTime, duration_minutes: i32) -> Option<NaiveTime> {
    if duration_minutes <= 0 {
        return None;
    }
    time_of_minute(minute_of_day(start) + duration_minutes as u32)
}

/// Whether `[start, start + duration)` fits the working hours and collides
/// with no break, block, or existing appointment. Ignores slot alignment and
/// the current time.
pub fn is_slot_free(schedule: &DaySchedule, start: NaiveTime, duration_minutes: i32) -> bool {
    let Some(working) = schedule.working else {
        return false;
    };
    let Some(end) = end_of(start, duration_minutes) else {
        return false;
    };
    let candidate = Interval { start, end };

    if candidate.start < working.hours.start || candidate.end > working.hours.end {
        return false;
    }

    !schedule.unavailable().any(|u| u.overlaps(&candidate))
}

/// Whether `start` falls on the slot grid that begins at the working start.
pub fn is_aligned(schedule: &DaySchedule, start: NaiveTime, step_minutes: i32) -> bool {
    let (Some(working), true) = (schedule.working, step_minutes > 0) else {
        return false;
    };
    let (work_start, _) = working.hours.minutes();
    let minute = minute_of_day(start);
    minute >= work_start && (minute - work_start) % step_minutes as u32 == 0
}

/// Whether a slot on `date` starting at `start` is still in the future
/// relative to the establishment-local `now`.
pub fn is_in_future(date: NaiveDate, start: NaiveTime, now: NaiveDateTime) -> bool {
    date.and_time(start) > now
}

/// Lists the free slots of one employee's day.
///
/// Candidate starts are `work_start + k * step`. A candidate is offered when
/// the whole service duration fits inside working hours, overlaps nothing
/// unavailable, and starts after `now`. Past dates yield no slots.
pub fn compute_slots(
    schedule: &DaySchedule,
    duration_minutes: i32,
    step_minutes: i32,
    now: NaiveDateTime,
) -> Result<Vec<Slot>, AppError> {
    let duration = validate_minutes("Service duration", duration_minutes)?;
    let step = validate_minutes("Slot interval", step_minutes)?;

    let Some(working) = schedule.working else {
        return Ok(Vec::new());
    };
    if schedule.date < now.date() {
        return Ok(Vec::new());
    }

    let (work_start, work_end) = working.hours.minutes();
    let mut unavailable: Vec<(u32, u32)> = schedule.unavailable().map(|i| i.minutes()).collect();
    unavailable.sort_unstable();

    let mut slots = Vec::new();
    let mut start = work_start;
    while start + duration <= work_end {
        let end = start + duration;
        let collides = unavailable
            .iter()
            .take_while(|(u_start, _)| *u_start < end)
            .any(|(_, u_end)| start < *u_end);

        if !collides {
            if let (Some(s), Some(e)) = (time_of_minute(start), time_of_minute(end)) {
                if is_in_future(schedule.date, s, now) {
                    slots.push(Slot { start: s, end: e });
                }
            }
        }
        start += step;
    }

    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn iv(a: (u32, u32), b: (u32, u32)) -> Interval {
        Interval::new(t(a.0, a.1), t(b.0, b.1)).unwrap()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn long_ago() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn nine_to_five() -> DaySchedule {
        DaySchedule::new(
            monday(),
            Some(WorkingDay {
                hours: iv((9, 0), (17, 0)),
                break_time: Some(iv((12, 0), (13, 0))),
            }),
        )
    }

    #[test]
    fn longest_service_duration_is_accepted() {
        let schedule = nine_to_five();
        assert!(compute_slots(&schedule, MAX_DURATION_MINUTES, 30, long_ago())
            .unwrap()
            .is_empty());
        assert!(compute_slots(&schedule, MAX_DURATION_MINUTES + 1, 30, long_ago()).is_err());
    }

    fn starts(slots: &[Slot]) -> Vec<String> {
        slots
            .iter()
            .map(|s| s.start.format("%H:%M").to_string())
            .collect()
    }

    #[test]
    fn full_day_respects_break() {
        let slots = compute_slots(&nine_to_five(), 60, 60, long_ago()).unwrap();
        assert_eq!(
            starts(&slots),
            vec!["09:00", "10:00", "11:00", "13:00", "14:00", "15:00", "16:00"]
        );
    }

    #[test]
    fn slot_must_fit_before_break_and_closing() {
        let slots = compute_slots(&nine_to_five(), 45, 30, long_ago()).unwrap();
        let s = starts(&slots);
        assert!(s.contains(&"11:00".to_string()));
        assert!(!s.contains(&"11:30".to_string()));
        assert!(s.contains(&"16:00".to_string()));
        assert!(!s.contains(&"16:30".to_string()));
    }

    #[test]
    fn appointments_and_blocks_remove_slots() {
        let schedule = nine_to_five()
            .with_busy([iv((10, 0), (10, 30))])
            .with_blocks(&[BlockRule {
                date: Some(monday()),
                weekday: None,
                interval: iv((15, 0), (17, 0)),
            }]);
        let slots = compute_slots(&schedule, 30, 30, long_ago()).unwrap();
        let s = starts(&slots);
        assert!(s.contains(&"09:30".to_string()));
        assert!(!s.contains(&"10:00".to_string()));
        assert!(s.contains(&"10:30".to_string()));
        assert!(s.contains(&"14:30".to_string()));
        assert!(!s.contains(&"15:00".to_string()));
    }

    #[test]
    fn recurring_blocks_apply_only_on_their_weekday() {
        let rule = BlockRule {
            date: None,
            weekday: Some(1),
            interval: iv((9, 0), (10, 0)),
        };
        assert!(rule.applies_on(monday()));
        assert!(!rule.applies_on(monday().succ_opt().unwrap()));

        let schedule = nine_to_five().with_blocks(&[rule]);
        let slots = compute_slots(&schedule, 60, 60, long_ago()).unwrap();
        assert_eq!(starts(&slots).first().map(String::as_str), Some("10:00"));
    }

    #[test]
    fn one_off_blocks_for_other_dates_are_ignored() {
        let rule = BlockRule {
            date: NaiveDate::from_ymd_opt(2024, 3, 5),
            weekday: None,
            interval: iv((9, 0), (17, 0)),
        };
        let schedule = nine_to_five().with_blocks(&[rule]);
        assert_eq!(compute_slots(&schedule, 60, 60, long_ago()).unwrap().len(), 7);
    }

    #[test]
    fn touching_intervals_do_not_conflict() {
        let schedule = nine_to_five().with_busy([iv((9, 0), (10, 0))]);
        assert!(is_slot_free(&schedule, t(10, 0), 60));
        assert!(!is_slot_free(&schedule, t(9, 30), 60));
        assert!(!is_slot_free(&schedule, t(8, 0), 60));
    }

    #[test]
    fn no_working_hours_means_no_slots() {
        let schedule = DaySchedule::new(monday(), None);
        assert!(compute_slots(&schedule, 30, 15, long_ago()).unwrap().is_empty());
        assert!(!is_slot_free(&schedule, t(10, 0), 30));
    }

    #[test]
    fn past_times_are_not_offered() {
        let now = monday().and_hms_opt(14, 10, 0).unwrap();
        let slots = compute_slots(&nine_to_five(), 30, 30, now).unwrap();
        assert_eq!(starts(&slots).first().map(String::as_str), Some("14:30"));

        let tomorrow_now = monday().succ_opt().unwrap().and_hms_opt(8, 0, 0).unwrap();
        assert!(compute_slots(&nine_to_five(), 30, 30, tomorrow_now)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn invalid_duration_is_rejected() {
        assert!(compute_slots(&nine_to_five(), 0, 15, long_ago()).is_err());
        assert!(compute_slots(&nine_to_five(), 30, 0, long_ago()).is_err());
    }

    #[test]
    fn alignment_follows_working_start() {
        let schedule = DaySchedule::new(
            monday(),
            Some(WorkingDay {
                hours: iv((8, 10), (12, 0)),
                break_time: None,
            }),
        );
        assert!(is_aligned(&schedule, t(8, 10), 20));
        assert!(is_aligned(&schedule, t(8, 50), 20));
        assert!(!is_aligned(&schedule, t(9, 0), 20));
        assert!(!is_aligned(&schedule, t(8, 0), 20));
    }

    #[test]
    fn end_of_rejects_midnight_wrap() {
        assert_eq!(end_of(t(23, 0), 30), Some(t(23, 30)));
        assert_eq!(end_of(t(23, 45), 30), None);
        assert_eq!(end_of(t(10, 0), 0), None);
    }

    #[test]
    fn weekday_index_starts_on_sunday() {
        assert_eq!(weekday_index(NaiveDate::from_ymd_opt(2024, 3, 3).unwrap()), 0);
        assert_eq!(weekday_index(monday()), 1);
        assert_eq!(weekday_index(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()), 6);
    }
}
