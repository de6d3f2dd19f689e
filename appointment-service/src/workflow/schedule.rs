//! Temporal booking rules.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc, Weekday};
use service_core::error::AppError;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of "now", swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock.
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(now.timestamp_millis()),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.millis.store(now.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// Business hours, weekdays and booking horizon, evaluated in a fixed UTC
/// offset.
#[derive(Debug, Clone)]
pub struct SchedulePolicy {
    pub open_hour: u32,
    /// Appointments must end at or before this hour.
    pub close_hour: u32,
    pub max_advance_days: i64,
    pub utc_offset: FixedOffset,
    /// Local time of the reminder on the day before.
    pub reminder_hour: u32,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            open_hour: 9,
            close_hour: 18,
            max_advance_days: 90,
            utc_offset: Utc.fix(),
            reminder_hour: 10,
        }
    }
}

impl SchedulePolicy {
    /// Validate a requested start and return the start to store.
    ///
    /// A weekend start moves to the following Monday at the same local time
    /// when `flexible` is set; otherwise it is rejected.
    pub fn validate(
        &self,
        requested: DateTime<Utc>,
        duration_minutes: u32,
        flexible: bool,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, AppError> {
        let mut local = requested.with_timezone(&self.utc_offset);

        let shift = match local.weekday() {
            Weekday::Sat => Some(2),
            Weekday::Sun => Some(1),
            _ => None,
        };
        if let Some(days) = shift {
            if !flexible {
                return Err(AppError::InvalidSchedule(format!(
                    "{} is a {}; appointments are booked Monday to Friday",
                    local.date_naive(),
                    local.weekday()
                )));
            }
            local += Duration::days(days);
            tracing::info!(
                requested = %requested,
                moved_to = %local,
                "Weekend date moved to Monday"
            );
        }

        let start = local.with_timezone(&Utc);
        if start <= now {
            return Err(AppError::InvalidSchedule(
                "Appointment date must be in the future".to_string(),
            ));
        }
        if start > now + Duration::days(self.max_advance_days) {
            return Err(AppError::InvalidSchedule(format!(
                "Appointments can be booked at most {} days ahead",
                self.max_advance_days
            )));
        }

        let opens = self.local_at(local, self.open_hour)?;
        let closes = self.local_at(local, self.close_hour)?;
        let ends = local + Duration::minutes(i64::from(duration_minutes));
        if local < opens || ends > closes {
            return Err(AppError::InvalidSchedule(format!(
                "Appointments must fall between {:02}:00 and {:02}:00 (UTC{})",
                self.open_hour, self.close_hour, self.utc_offset
            )));
        }

        Ok(start)
    }

    /// Reminder time: the day before the appointment at the reminder hour.
    pub fn reminder_at(&self, scheduled_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = scheduled_at.with_timezone(&self.utc_offset) - Duration::days(1);
        self.local_at(local, self.reminder_hour)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn local_at(
        &self,
        day: DateTime<FixedOffset>,
        hour: u32,
    ) -> Result<DateTime<FixedOffset>, AppError> {
        let time = NaiveTime::from_hms_opt(hour.min(23), 0, 0)
            .ok_or_else(|| AppError::ConfigError(anyhow::anyhow!("invalid hour {}", hour)))?;
        let naive = day.date_naive().and_time(time);
        let at = self
            .utc_offset
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(|| AppError::ConfigError(anyhow::anyhow!("ambiguous local time")))?;
        // A close hour of 24 means midnight at the end of the day.
        Ok(if hour >= 24 { at + Duration::hours(1) } else { at })
    }

    pub fn is_business_day(&self, at: DateTime<Utc>) -> bool {
        !matches!(
            at.with_timezone(&self.utc_offset).weekday(),
            Weekday::Sat | Weekday::Sun
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    // 2030-01-07 is a Monday.
    const NOW: &str = "2030-01-02T08:00:00Z";

    #[test]
    fn weekday_inside_hours_is_accepted() {
        let policy = SchedulePolicy::default();
        let start = policy
            .validate(utc("2030-01-07T10:00:00Z"), 60, false, utc(NOW))
            .unwrap();
        assert_eq!(start, utc("2030-01-07T10:00:00Z"));
        assert!(policy.is_business_day(start));
    }

    #[test]
    fn weekend_is_rejected_unless_flexible() {
        let policy = SchedulePolicy::default();
        let saturday = utc("2030-01-05T10:00:00Z");

        let err = policy.validate(saturday, 60, false, utc(NOW)).unwrap_err();
        assert!(matches!(err, AppError::InvalidSchedule(_)));

        let moved = policy.validate(saturday, 60, true, utc(NOW)).unwrap();
        assert_eq!(moved, utc("2030-01-07T10:00:00Z"));

        let sunday = utc("2030-01-06T15:30:00Z");
        let moved = policy.validate(sunday, 30, true, utc(NOW)).unwrap();
        assert_eq!(moved, utc("2030-01-07T15:30:00Z"));
    }

    #[test]
    fn past_and_now_are_rejected() {
        let policy = SchedulePolicy::default();
        let now = utc("2030-01-07T10:00:00Z");
        assert!(policy.validate(now, 60, false, now).is_err());
        assert!(policy
            .validate(utc("2030-01-01T10:00:00Z"), 60, false, now)
            .is_err());
    }

    #[test]
    fn too_far_ahead_is_rejected() {
        let policy = SchedulePolicy::default();
        let err = policy
            .validate(utc("2030-06-03T10:00:00Z"), 60, false, utc(NOW))
            .unwrap_err();
        assert!(err.to_string().contains("90 days"));
    }

    #[test]
    fn appointment_must_end_by_closing() {
        let policy = SchedulePolicy::default();
        assert!(policy
            .validate(utc("2030-01-07T17:00:00Z"), 60, false, utc(NOW))
            .is_ok());
        assert!(policy
            .validate(utc("2030-01-07T17:30:00Z"), 60, false, utc(NOW))
            .is_err());
        assert!(policy
            .validate(utc("2030-01-07T08:30:00Z"), 30, false, utc(NOW))
            .is_err());
    }

    #[test]
    fn offset_applies_to_weekday_and_hours() {
        let policy = SchedulePolicy {
            utc_offset: FixedOffset::east_opt(2 * 3600).unwrap(),
            ..Default::default()
        };
        // 23:30 UTC Friday is 01:30 Saturday local.
        let err = policy
            .validate(utc("2030-01-04T23:30:00Z"), 30, false, utc(NOW))
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidSchedule(_)));

        // 08:00 UTC is 10:00 local.
        assert!(policy
            .validate(utc("2030-01-07T08:00:00Z"), 60, false, utc(NOW))
            .is_ok());
    }

    #[test]
    fn reminder_is_day_before_at_ten() {
        let policy = SchedulePolicy::default();
        assert_eq!(
            policy.reminder_at(utc("2030-01-08T15:00:00Z")),
            Some(utc("2030-01-07T10:00:00Z"))
        );
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(utc(NOW));
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now(), utc("2030-01-02T10:00:00Z"));
    }
}
