use serde::{Deserialize, Deserializer};
use time::{Date, Duration, Month};

use crate::error::ToolError;
use crate::models::read::PeriodInfo;

/// Named or explicit date range used to window aggregation queries.
/// `custom` requires an explicit start/end pair. Deserializes from
/// either a bare name string or a {name, start, end} object.
#[derive(Debug, Clone, Default)]
pub struct PeriodSpec {
    pub name: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PeriodSpecRepr {
    Name(String),
    Full {
        #[serde(default, alias = "period")]
        name: Option<String>,
        #[serde(default, alias = "start_date")]
        start: Option<String>,
        #[serde(default, alias = "end_date")]
        end: Option<String>,
    },
}

impl<'de> Deserialize<'de> for PeriodSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match PeriodSpecRepr::deserialize(deserializer)? {
            PeriodSpecRepr::Name(name) => PeriodSpec {
                name: Some(name),
                start: None,
                end: None,
            },
            PeriodSpecRepr::Full { name, start, end } => PeriodSpec { name, start, end },
        })
    }
}

/// Resolved inclusive window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: Date,
    pub end: Date,
}

impl Window {
    pub fn start_str(&self) -> String {
        format_date(self.start)
    }

    pub fn end_str(&self) -> String {
        format_date(self.end)
    }

    /// Inclusive day count; a single-day window counts as 1.
    pub fn day_count(&self) -> i64 {
        (self.end - self.start).whole_days() + 1
    }

    pub fn info(&self) -> PeriodInfo {
        PeriodInfo {
            start: self.start_str(),
            end: self.end_str(),
        }
    }
}

pub fn format_date(d: Date) -> String {
    format!("{:04}-{:02}-{:02}", d.year(), d.month() as u8, d.day())
}

pub fn parse_date(s: &str) -> Result<Date, ToolError> {
    let invalid = || ToolError::Validation(format!("invalid date: {s}"));
    let mut parts = s.trim().splitn(3, '-');
    let year = parts
        .next()
        .and_then(|p| p.parse::<i32>().ok())
        .ok_or_else(invalid)?;
    let month = parts
        .next()
        .and_then(|p| p.parse::<u8>().ok())
        .and_then(|m| Month::try_from(m).ok())
        .ok_or_else(invalid)?;
    let day = parts
        .next()
        .and_then(|p| p.parse::<u8>().ok())
        .ok_or_else(invalid)?;
    Date::from_calendar_date(year, month, day).map_err(|_| invalid())
}

impl PeriodSpec {
    /// Resolve against the invocation's `today` so results stay
    /// deterministic for a fixed clock.
    pub fn resolve(&self, today: Date) -> Result<Window, ToolError> {
        match self.name.as_deref() {
            Some("today") => Ok(Window {
                start: today,
                end: today,
            }),
            Some("this_week") => {
                let back = today.weekday().number_days_from_sunday();
                let start = today
                    .checked_sub(Duration::days(back as i64))
                    .unwrap_or(today);
                Ok(Window { start, end: today })
            }
            Some("this_month") => {
                let start = Date::from_calendar_date(today.year(), today.month(), 1)
                    .expect("first of month is always valid");
                Ok(Window { start, end: today })
            }
            Some("this_year") => {
                let start = Date::from_calendar_date(today.year(), Month::January, 1)
                    .expect("january first is always valid");
                Ok(Window { start, end: today })
            }
            Some("custom") | None => self.explicit(),
            Some(other) => Err(ToolError::unknown("period", other)),
        }
    }

    fn explicit(&self) -> Result<Window, ToolError> {
        let (start, end) = match (&self.start, &self.end) {
            (Some(s), Some(e)) => (parse_date(s)?, parse_date(e)?),
            _ => {
                return Err(ToolError::Validation(
                    "custom period requires a start and end date".to_string(),
                ))
            }
        };
        if end < start {
            return Err(ToolError::Validation(format!(
                "period end {} precedes start {}",
                format_date(end),
                format_date(start)
            )));
        }
        Ok(Window { start, end })
    }
}

/// Current-month window up to `today`, used by related-record lookups.
pub fn month_to_date(today: Date) -> Window {
    let start = Date::from_calendar_date(today.year(), today.month(), 1)
        .expect("first of month is always valid");
    Window { start, end: today }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn named(name: &str) -> PeriodSpec {
        PeriodSpec {
            name: Some(name.to_string()),
            start: None,
            end: None,
        }
    }

    #[test]
    fn test_today_is_single_day() {
        let w = named("today").resolve(date!(2026 - 08 - 28)).unwrap();
        assert_eq!(w.start, w.end);
        assert_eq!(w.day_count(), 1);
    }

    #[test]
    fn test_this_week_starts_on_sunday() {
        // 2026-08-28 is a Friday; the week began Sunday the 23rd.
        let w = named("this_week").resolve(date!(2026 - 08 - 28)).unwrap();
        assert_eq!(w.start, date!(2026 - 08 - 23));
        assert_eq!(w.end, date!(2026 - 08 - 28));
    }

    #[test]
    fn test_this_month_and_year() {
        let today = date!(2026 - 08 - 28);
        let m = named("this_month").resolve(today).unwrap();
        assert_eq!(m.start, date!(2026 - 08 - 01));
        let y = named("this_year").resolve(today).unwrap();
        assert_eq!(y.start, date!(2026 - 01 - 01));
        assert_eq!(y.end, today);
    }

    #[test]
    fn test_custom_requires_range() {
        let err = named("custom").resolve(date!(2026 - 08 - 28));
        assert!(matches!(err, Err(ToolError::Validation(_))));

        let spec = PeriodSpec {
            name: Some("custom".to_string()),
            start: Some("2026-01-01".to_string()),
            end: Some("2026-01-31".to_string()),
        };
        let w = spec.resolve(date!(2026 - 08 - 28)).unwrap();
        assert_eq!(w.day_count(), 31);
    }

    #[test]
    fn test_unknown_period_name() {
        let err = named("last_decade").resolve(date!(2026 - 08 - 28));
        assert!(matches!(err, Err(ToolError::UnknownOperand { .. })));
    }

    #[test]
    fn test_spec_deserializes_from_string_or_object() {
        let s: PeriodSpec = serde_json::from_value(serde_json::json!("this_week")).unwrap();
        assert_eq!(s.name.as_deref(), Some("this_week"));
        assert!(s.start.is_none() && s.end.is_none());

        let o: PeriodSpec = serde_json::from_value(serde_json::json!({
            "period": "custom",
            "start_date": "2026-01-01",
            "end_date": "2026-01-31",
        }))
        .unwrap();
        assert_eq!(o.name.as_deref(), Some("custom"));
        let w = o.resolve(date!(2026 - 08 - 28)).unwrap();
        assert_eq!(w.day_count(), 31);
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert!(parse_date("not-a-date").is_err());
        assert!(parse_date("2026-13-01").is_err());
        assert!(parse_date("2026-02-30").is_err());
    }
}
