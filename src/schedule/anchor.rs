// src/schedule/anchor.rs
//! Trigger-instant arithmetic in a fixed IANA timezone.
//!
//! Everything here works on absolute instants (`DateTime<Utc>`) and projects them into the
//! configured zone through `jiff`'s bundled tz database, so the host's local timezone never
//! participates.
//!
//! DST policy for the nominal time-of-day on a given local date:
//! - the local time occurs twice (fold): the first (earlier) occurrence is used;
//! - the local time does not exist (gap): the instant the clocks jump forward is used, i.e. the
//!   first instant at which the local wall clock is past the nominal time.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use jiff::civil::{Date, Time};
use jiff::tz::{AmbiguousOffset, Offset, TimeZone};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Hour and minute of the daily trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    /// Parse `HH:MM` (24h). Single-digit hours are accepted.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidTriggerTime(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        if m.len() != 2 || h.is_empty() || h.len() > 2 {
            return Err(invalid());
        }
        let hour: u8 = h.parse().map_err(|_| invalid())?;
        let minute: u8 = m.parse().map_err(|_| invalid())?;
        if hour > 23 || minute > 59 {
            return Err(invalid());
        }
        Ok(Self { hour, minute })
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Process-wide trigger configuration. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSpec {
    pub time_of_day: TimeOfDay,
    pub timezone: String,
}

impl TriggerSpec {
    /// Validates both parts; an unknown zone or malformed time is a `ConfigError`.
    pub fn parse(time_of_day: &str, timezone: &str) -> Result<Self, ConfigError> {
        let time_of_day = TimeOfDay::parse(time_of_day)?;
        let timezone = timezone.trim().to_string();
        TimeZone::get(&timezone).map_err(|_| ConfigError::InvalidTimezone(timezone.clone()))?;
        Ok(Self {
            time_of_day,
            timezone,
        })
    }
}

/// Resolves trigger instants for one `TriggerSpec`.
#[derive(Debug, Clone)]
pub struct TimeAnchor {
    spec: TriggerSpec,
    tz: TimeZone,
    time: Time,
}

impl TimeAnchor {
    pub fn new(spec: TriggerSpec) -> Result<Self, ConfigError> {
        let tz = TimeZone::get(&spec.timezone)
            .map_err(|_| ConfigError::InvalidTimezone(spec.timezone.clone()))?;
        let time = Time::new(
            spec.time_of_day.hour as i8,
            spec.time_of_day.minute as i8,
            0,
            0,
        )
        .map_err(|_| ConfigError::InvalidTriggerTime(spec.time_of_day.to_string()))?;
        Ok(Self { spec, tz, time })
    }

    pub fn spec(&self) -> &TriggerSpec {
        &self.spec
    }

    /// Next trigger instant strictly after `reference`.
    pub fn next_trigger(&self, reference: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let ts = to_timestamp(reference)?;
        let mut date = ts.to_zoned(self.tz.clone()).date();
        // A trigger exists on every local date, so two steps always suffice; the extra
        // iterations only cover odd zone histories.
        for _ in 0..4 {
            let candidate = self.trigger_on(date)?;
            if candidate > ts {
                return from_timestamp(candidate);
            }
            date = date.tomorrow().context("advancing local date")?;
        }
        Err(anyhow!("no trigger found after {reference}"))
    }

    /// Latest trigger instant at or before `reference`: the start of the current period.
    pub fn previous_trigger(&self, reference: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let ts = to_timestamp(reference)?;
        let mut date = ts.to_zoned(self.tz.clone()).date();
        for _ in 0..4 {
            let candidate = self.trigger_on(date)?;
            if candidate <= ts {
                return from_timestamp(candidate);
            }
            date = date.yesterday().context("rewinding local date")?;
        }
        Err(anyhow!("no trigger found before {reference}"))
    }

    /// True iff the current period's trigger is due and has not been fired yet.
    ///
    /// The scheduled instant considered is `previous_trigger(now)`, so `now` is always at or
    /// after it; the check reduces to `last_fired` being before that instant. Calling this
    /// repeatedly within one period after recording a fire never yields `true` twice.
    pub fn has_fired(
        &self,
        last_fired: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let scheduled = self.previous_trigger(now)?;
        Ok(match last_fired {
            None => true,
            Some(last) => last < scheduled,
        })
    }

    /// Trigger instant on a given local date in the target zone, with the DST policy applied.
    pub fn trigger_on(&self, date: Date) -> Result<Timestamp> {
        let dt = date.to_datetime(self.time);
        let ambiguous = self.tz.to_ambiguous_timestamp(dt);
        match ambiguous.offset() {
            AmbiguousOffset::Unambiguous { offset } => {
                offset.to_timestamp(dt).context("resolving trigger instant")
            }
            AmbiguousOffset::Fold { before, after } => {
                let a = before.to_timestamp(dt).context("resolving fold")?;
                let b = after.to_timestamp(dt).context("resolving fold")?;
                Ok(a.min(b))
            }
            AmbiguousOffset::Gap { before, after } => self.gap_transition(dt, before, after),
        }
    }

    /// Local calendar date of an instant in the target zone.
    pub fn local_date(&self, instant: DateTime<Utc>) -> Result<Date> {
        Ok(to_timestamp(instant)?.to_zoned(self.tz.clone()).date())
    }

    /// Human-readable wall-clock rendering in the target zone, for logs and status output.
    pub fn local_display(&self, instant: DateTime<Utc>) -> String {
        match to_timestamp(instant) {
            Ok(ts) => ts
                .to_zoned(self.tz.clone())
                .strftime("%Y-%m-%d %H:%M:%S %Z")
                .to_string(),
            Err(_) => instant.to_rfc3339(),
        }
    }

    /// First instant on the far side of a spring-forward transition.
    ///
    /// Interpreting the nominal local time with the offsets on either side of the gap gives one
    /// instant before the transition and one after it; the transition lies in between and is
    /// located by bisection on whole seconds (zone transitions never carry sub-seconds).
    fn gap_transition(
        &self,
        dt: jiff::civil::DateTime,
        before: Offset,
        after: Offset,
    ) -> Result<Timestamp> {
        let a = before.to_timestamp(dt).context("resolving gap")?;
        let b = after.to_timestamp(dt).context("resolving gap")?;
        let mut lo = a.min(b).as_second();
        let mut hi = a.max(b).as_second();
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            let ts = Timestamp::from_second(mid).context("bisecting gap")?;
            if self.tz.to_offset(ts) == after {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        Timestamp::from_second(hi).context("gap transition")
    }
}

pub(crate) fn to_timestamp(dt: DateTime<Utc>) -> Result<Timestamp> {
    Timestamp::new(dt.timestamp(), dt.timestamp_subsec_nanos() as i32)
        .with_context(|| format!("instant out of range: {dt}"))
}

pub(crate) fn from_timestamp(ts: Timestamp) -> Result<DateTime<Utc>> {
    let nanos = i64::try_from(ts.as_nanosecond())
        .map_err(|_| anyhow!("instant out of range: {ts}"))?;
    Ok(DateTime::<Utc>::from_timestamp_nanos(nanos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone as _};

    fn anchor(time: &str, tz: &str) -> TimeAnchor {
        TimeAnchor::new(TriggerSpec::parse(time, tz).unwrap()).unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn rejects_bad_config() {
        assert!(matches!(
            TriggerSpec::parse("07:30", "Mars/Olympus"),
            Err(ConfigError::InvalidTimezone(_))
        ));
        for bad in ["24:00", "7:60", "0730", "", "ab:cd", "07:3"] {
            assert!(
                matches!(
                    TriggerSpec::parse(bad, "Asia/Seoul"),
                    Err(ConfigError::InvalidTriggerTime(_))
                ),
                "{bad} should be rejected"
            );
        }
        assert_eq!(
            TimeOfDay::parse("7:05").unwrap(),
            TimeOfDay { hour: 7, minute: 5 }
        );
    }

    #[test]
    fn next_trigger_same_day_and_rollover() {
        let a = anchor("07:30", "Asia/Seoul");
        // 07:00 KST on Mar 1 -> 07:30 KST the same day
        assert_eq!(
            a.next_trigger(utc(2025, 2, 28, 22, 0, 0)).unwrap(),
            utc(2025, 2, 28, 22, 30, 0)
        );
        // 09:00 KST on Mar 1 -> already passed, roll to Mar 2
        assert_eq!(
            a.next_trigger(utc(2025, 3, 1, 0, 0, 0)).unwrap(),
            utc(2025, 3, 1, 22, 30, 0)
        );
        // exactly at the trigger -> strictly after, so next day
        assert_eq!(
            a.next_trigger(utc(2025, 2, 28, 22, 30, 0)).unwrap(),
            utc(2025, 3, 1, 22, 30, 0)
        );
    }

    #[test]
    fn next_trigger_projects_to_time_of_day() {
        let a = anchor("07:30", "Europe/Berlin");
        let mut reference = utc(2025, 1, 1, 0, 0, 0);
        for _ in 0..400 {
            let next = a.next_trigger(reference).unwrap();
            assert!(next > reference);
            let zoned = to_timestamp(next).unwrap().to_zoned(a.tz.clone());
            assert_eq!((zoned.hour(), zoned.minute()), (7, 30));
            reference = next + Duration::hours(7);
        }
    }

    #[test]
    fn gap_uses_transition_instant() {
        // 2025-03-09: New York jumps from 02:00 EST to 03:00 EDT at 07:00 UTC
        let a = anchor("02:30", "America/New_York");
        let next = a.next_trigger(utc(2025, 3, 9, 5, 0, 0)).unwrap();
        assert_eq!(next, utc(2025, 3, 9, 7, 0, 0));
        // the day after is back to normal (02:30 EDT = 06:30 UTC)
        assert_eq!(a.next_trigger(next).unwrap(), utc(2025, 3, 10, 6, 30, 0));
    }

    #[test]
    fn fold_uses_first_occurrence() {
        // 2025-11-02: 01:30 happens at 05:30 UTC (EDT) and again at 06:30 UTC (EST)
        let a = anchor("01:30", "America/New_York");
        assert_eq!(
            a.next_trigger(utc(2025, 11, 2, 4, 0, 0)).unwrap(),
            utc(2025, 11, 2, 5, 30, 0)
        );
        // during the second pass through 01:xx the first occurrence is behind us
        assert_eq!(
            a.next_trigger(utc(2025, 11, 2, 6, 0, 0)).unwrap(),
            utc(2025, 11, 3, 6, 30, 0)
        );
    }

    #[test]
    fn previous_trigger_is_at_or_before() {
        let a = anchor("07:30", "Asia/Seoul");
        let at = utc(2025, 2, 28, 22, 30, 0);
        assert_eq!(a.previous_trigger(at).unwrap(), at);
        assert_eq!(
            a.previous_trigger(utc(2025, 2, 28, 22, 0, 0)).unwrap(),
            utc(2025, 2, 27, 22, 30, 0)
        );
    }

    #[test]
    fn has_fired_once_per_period() {
        let a = anchor("07:30", "Asia/Seoul");
        let trigger = utc(2025, 2, 28, 22, 30, 0);

        // before the trigger, with yesterday's run recorded
        let yesterday_run = trigger - Duration::days(1) + Duration::seconds(3);
        assert!(!a
            .has_fired(Some(yesterday_run), trigger - Duration::seconds(1))
            .unwrap());

        // at the trigger
        assert!(a.has_fired(Some(yesterday_run), trigger).unwrap());

        // after recording the fire, every later check in the period is false
        let fired_at = trigger + Duration::seconds(4);
        for secs in [4, 5, 9, 3_600, 86_399] {
            assert!(!a
                .has_fired(Some(fired_at), trigger + Duration::seconds(secs))
                .unwrap());
        }

        // next day's instant re-arms it
        assert!(a
            .has_fired(Some(fired_at), trigger + Duration::days(1))
            .unwrap());
    }

    #[test]
    fn has_fired_without_history_is_due() {
        let a = anchor("07:30", "Asia/Seoul");
        assert!(a.has_fired(None, utc(2025, 3, 1, 0, 0, 0)).unwrap());
    }
}
