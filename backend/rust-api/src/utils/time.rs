use chrono::{DateTime, Days, Duration, NaiveDate, NaiveTime, Utc};

/// Calendar date used for streaks, daily quiz ids and cleanup cut-offs.
pub fn utc_date(dt: DateTime<Utc>) -> NaiveDate {
    dt.date_naive()
}

pub fn daily_quiz_id(date: NaiveDate) -> String {
    format!("daily_{}", date.format("%Y-%m-%d"))
}

/// Next instant strictly after `now` whose UTC wall-clock time is `run_at`.
pub fn next_run_after(now: DateTime<Utc>, run_at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(run_at).and_utc();
    if today > now {
        return today;
    }
    match now.date_naive().checked_add_days(Days::new(1)) {
        Some(tomorrow) => tomorrow.and_time(run_at).and_utc(),
        None => today,
    }
}

/// When the scheduler should next try to produce today's quiz.
///
/// After a failed attempt it comes back after `retry_interval`, but never
/// later than the regular `run_at` slot.
pub fn next_scheduler_wake(
    now: DateTime<Utc>,
    run_at: NaiveTime,
    last_attempt_failed: bool,
    retry_interval: Duration,
) -> DateTime<Utc> {
    let scheduled = next_run_after(now, run_at);
    if !last_attempt_failed {
        return scheduled;
    }
    (now + retry_interval).min(scheduled)
}

/// Parses `HH:MM` (or `HH:MM:SS`).
pub fn parse_run_at(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

/// Stored timestamps are fixed-width RFC 3339 with millisecond precision so
/// that string ordering in the document store matches chronological order.
pub mod rfc3339_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match date {
                Some(date) => super::serialize(date, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| Some(dt.with_timezone(&Utc)))
                    .map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::{Deserialize, Serialize};

    #[test]
    fn test_next_run_later_today() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 1, 30, 0).unwrap();
        let run_at = NaiveTime::from_hms_opt(3, 0, 0).unwrap();
        assert_eq!(
            next_run_after(now, run_at),
            Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_run_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2024, 5, 31, 3, 0, 0).unwrap();
        let run_at = NaiveTime::from_hms_opt(3, 0, 0).unwrap();
        assert_eq!(
            next_run_after(now, run_at),
            Utc.with_ymd_and_hms(2024, 6, 1, 3, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_wake_waits_for_run_at_after_success() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 5, 0).unwrap();
        let run_at = NaiveTime::from_hms_opt(0, 5, 0).unwrap();
        assert_eq!(
            next_scheduler_wake(now, run_at, false, Duration::minutes(5)),
            Utc.with_ymd_and_hms(2024, 5, 2, 0, 5, 0).unwrap()
        );
    }

    #[test]
    fn test_wake_retries_same_day_after_failure() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 5, 10).unwrap();
        let run_at = NaiveTime::from_hms_opt(0, 5, 0).unwrap();
        assert_eq!(
            next_scheduler_wake(now, run_at, true, Duration::minutes(5)),
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 10, 10).unwrap()
        );
    }

    #[test]
    fn test_wake_retry_never_skips_the_next_run() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 23, 58, 0).unwrap();
        let run_at = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        assert_eq!(
            next_scheduler_wake(now, run_at, true, Duration::minutes(5)),
            Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_run_at() {
        assert_eq!(parse_run_at("00:05"), NaiveTime::from_hms_opt(0, 5, 0));
        assert_eq!(parse_run_at("23:59:30"), NaiveTime::from_hms_opt(23, 59, 30));
        assert_eq!(parse_run_at("25:00"), None);
    }

    #[test]
    fn test_daily_quiz_id() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(daily_quiz_id(date), "daily_2024-05-01");
    }

    #[derive(Serialize, Deserialize)]
    struct Stamp {
        #[serde(with = "rfc3339_millis")]
        at: DateTime<Utc>,
    }

    #[test]
    fn test_rfc3339_millis_is_fixed_width() {
        let whole = serde_json::to_value(Stamp {
            at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        })
        .unwrap();
        assert_eq!(whole["at"], "2024-05-01T09:00:00.000Z");

        let parsed: Stamp = serde_json::from_value(whole).unwrap();
        assert_eq!(parsed.at, Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
    }
}
