//! Daily trigger primitives: strict `HH:MM` parsing, timezone resolution and
//! the table of registered daily fires.
//!
//! The table only records what should fire and when. Waiting for the fire
//! time is the scheduler's job.

use crate::types::{DigestError, Result};
use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    /// Parses strict 24-hour `HH:MM`: exactly two digits, a colon, two digits.
    pub fn parse(value: &str) -> Result<Self> {
        let bytes = value.as_bytes();
        let well_formed = bytes.len() == 5
            && bytes[2] == b':'
            && [0, 1, 3, 4].iter().all(|&i| bytes[i].is_ascii_digit());
        if !well_formed {
            return Err(DigestError::InvalidTimeFormat(value.to_string()));
        }

        let digit = |i: usize| u32::from(bytes[i] - b'0');
        let hour = digit(0) * 10 + digit(1);
        let minute = digit(3) * 10 + digit(4);
        if hour > 23 || minute > 59 {
            return Err(DigestError::TimeOutOfRange { hour, minute });
        }

        Ok(Self { hour, minute })
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| DigestError::InvalidTimezone(name.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerId(Uuid);

impl TriggerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Fires once a day at a wall-clock time in a given timezone.
#[derive(Debug, Clone)]
pub struct DailyTrigger {
    pub id: TriggerId,
    pub timezone: Tz,
    pub time_of_day: TimeOfDay,
    last_fired: Option<DateTime<Utc>>,
}

impl DailyTrigger {
    fn new(timezone: Tz, time_of_day: TimeOfDay) -> Self {
        Self {
            id: TriggerId::new(),
            timezone,
            time_of_day,
            last_fired: None,
        }
    }

    /// Cron form of this trigger, e.g. `CRON_TZ=UTC 0 9 * * *`.
    pub fn cron_expression(&self) -> String {
        format!(
            "CRON_TZ={} {} {} * * *",
            self.timezone.name(),
            self.time_of_day.minute,
            self.time_of_day.hour
        )
    }

    /// First fire strictly after both `now` and the last recorded fire.
    ///
    /// Local times skipped by a DST jump fire one hour later; repeated local
    /// times fire at their first occurrence.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let after = match self.last_fired {
            Some(fired) if fired > now => fired,
            _ => now,
        };
        let start = after.with_timezone(&self.timezone).date_naive();

        start
            .iter_days()
            .take(3)
            .filter_map(|date| self.resolve_local(date))
            .find(|candidate| *candidate > after)
    }

    pub fn mark_fired(&mut self, at: DateTime<Utc>) {
        self.last_fired = Some(at);
    }

    pub fn last_fired(&self) -> Option<DateTime<Utc>> {
        self.last_fired
    }

    fn resolve_local(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let naive = date.and_hms_opt(self.time_of_day.hour, self.time_of_day.minute, 0)?;
        let local = match self.timezone.from_local_datetime(&naive) {
            LocalResult::Single(t) => Some(t),
            LocalResult::Ambiguous(first, _) => Some(first),
            LocalResult::None => self
                .timezone
                .from_local_datetime(&(naive + Duration::hours(1)))
                .earliest(),
        };
        local.map(|t| t.with_timezone(&Utc))
    }
}

/// Registered daily triggers keyed by id.
#[derive(Debug, Default)]
pub struct TriggerTable {
    entries: HashMap<TriggerId, DailyTrigger>,
}

impl TriggerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a daily fire and returns the handle used to cancel it.
    pub fn schedule_daily(&mut self, timezone: Tz, time_of_day: TimeOfDay) -> TriggerId {
        let trigger = DailyTrigger::new(timezone, time_of_day);
        let id = trigger.id;
        self.entries.insert(id, trigger);
        id
    }

    pub fn cancel(&mut self, id: TriggerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn get(&self, id: TriggerId) -> Option<&DailyTrigger> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: TriggerId) -> Option<&mut DailyTrigger> {
        self.entries.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn parses_strict_time_of_day() {
        assert_eq!(TimeOfDay::parse("09:00").unwrap(), TimeOfDay { hour: 9, minute: 0 });
        assert_eq!(TimeOfDay::parse("23:59").unwrap(), TimeOfDay { hour: 23, minute: 59 });
        assert_eq!(TimeOfDay::parse("00:00").unwrap().to_string(), "00:00");
    }

    #[test]
    fn rejects_malformed_times() {
        for bad in ["9:00", "09:0", "0900", "09-00", " 09:00", "09:00 ", "ab:cd", "", "09:000", "+9:00"] {
            assert!(
                matches!(TimeOfDay::parse(bad), Err(DigestError::InvalidTimeFormat(_))),
                "{:?} should be a format error",
                bad
            );
        }
    }

    #[test]
    fn rejects_out_of_range_times() {
        assert!(matches!(
            TimeOfDay::parse("25:00"),
            Err(DigestError::TimeOutOfRange { hour: 25, minute: 0 })
        ));
        assert!(matches!(
            TimeOfDay::parse("12:60"),
            Err(DigestError::TimeOutOfRange { .. })
        ));
    }

    #[test]
    fn resolves_known_timezones_only() {
        assert!(parse_timezone("UTC").is_ok());
        assert!(parse_timezone("Europe/Berlin").is_ok());
        assert!(matches!(
            parse_timezone("Not/AZone"),
            Err(DigestError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn next_fire_is_today_or_tomorrow() {
        let mut table = TriggerTable::new();
        let id = table.schedule_daily(Tz::UTC, TimeOfDay::parse("09:00").unwrap());
        let trigger = table.get(id).unwrap();

        assert_eq!(trigger.next_fire_after(utc(2026, 3, 1, 8, 0)), Some(utc(2026, 3, 1, 9, 0)));
        assert_eq!(trigger.next_fire_after(utc(2026, 3, 1, 9, 0)), Some(utc(2026, 3, 2, 9, 0)));
        assert_eq!(trigger.next_fire_after(utc(2026, 3, 1, 22, 0)), Some(utc(2026, 3, 2, 9, 0)));
    }

    #[test]
    fn next_fire_honours_timezone_offset() {
        let trigger = DailyTrigger::new(parse_timezone("America/New_York").unwrap(), TimeOfDay::parse("09:00").unwrap());
        // EST is UTC-5 in January.
        assert_eq!(trigger.next_fire_after(utc(2026, 1, 10, 12, 0)), Some(utc(2026, 1, 10, 14, 0)));
    }

    #[test]
    fn skipped_local_time_fires_an_hour_later() {
        // 02:30 does not exist in Berlin on 2026-03-29.
        let trigger = DailyTrigger::new(parse_timezone("Europe/Berlin").unwrap(), TimeOfDay::parse("02:30").unwrap());
        assert_eq!(trigger.next_fire_after(utc(2026, 3, 28, 23, 0)), Some(utc(2026, 3, 29, 1, 30)));
    }

    #[test]
    fn fired_trigger_does_not_refire_same_day() {
        let mut trigger = DailyTrigger::new(Tz::UTC, TimeOfDay::parse("09:00").unwrap());
        let fire = utc(2026, 3, 1, 9, 0);
        trigger.mark_fired(fire);
        // A timer waking slightly early must not select the same fire again.
        assert_eq!(trigger.next_fire_after(utc(2026, 3, 1, 8, 59)), Some(utc(2026, 3, 2, 9, 0)));
    }

    #[test]
    fn cancel_removes_entry() {
        let mut table = TriggerTable::new();
        let first = table.schedule_daily(Tz::UTC, TimeOfDay::parse("09:00").unwrap());
        let second = table.schedule_daily(Tz::UTC, TimeOfDay::parse("10:00").unwrap());
        assert_eq!(table.len(), 2);
        assert!(table.cancel(first));
        assert!(!table.cancel(first));
        assert_eq!(table.len(), 1);
        assert!(table.get(second).is_some());
        assert_eq!(table.get(second).unwrap().cron_expression(), "CRON_TZ=UTC 0 10 * * *");
    }
}
