//! RetentionPeriod - maximum wall-clock age of a content-valid artifact
//!
//! Parsed from whitespace-separated `<count> <unit>` pairs, e.g. `"6 months"`
//! or `"1 year 2 weeks"`. Calendar units are resolved against a fixed anchor
//! (0001-01-01 00:00:00): months and years are added on the calendar first,
//! then the fixed-length units. `"6 months"` is therefore 181 days.

use chrono::{Months, NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ContractError;

/// Default retention used when none is configured
pub const DEFAULT_RETENTION: &str = "6 months";

/// Time unit accepted in a retention period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Years,
    Months,
    Weeks,
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl Unit {
    fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "years" | "year" => Some(Self::Years),
            "months" | "month" => Some(Self::Months),
            "weeks" | "week" => Some(Self::Weeks),
            "days" | "day" => Some(Self::Days),
            "hours" | "hour" => Some(Self::Hours),
            "minutes" | "minute" => Some(Self::Minutes),
            "seconds" | "second" => Some(Self::Seconds),
            _ => None,
        }
    }
}

/// Parsed retention period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RetentionPeriod {
    label: String,
    span: TimeDelta,
}

impl RetentionPeriod {
    /// Parse a human-readable period such as "6 months, 2 days"
    ///
    /// # Errors
    /// `ContractError::RetentionParse` on odd token count, non-integer count
    /// or unknown unit name.
    pub fn parse(input: &str) -> Result<Self, ContractError> {
        let tokens: Vec<&str> = input.split_whitespace().collect();
        if tokens.len() % 2 != 0 {
            return Err(ContractError::retention_parse(
                input,
                format!(
                    "expected <count> <unit> pairs, got {} tokens",
                    tokens.len()
                ),
            ));
        }

        let mut months: u32 = 0;
        let mut fixed = TimeDelta::zero();

        for pair in tokens.chunks_exact(2) {
            let (count_token, unit_token) = (pair[0], pair[1]);
            let count: u32 = count_token.parse().map_err(|_| {
                ContractError::retention_parse(
                    input,
                    format!("count '{count_token}' is not a non-negative integer"),
                )
            })?;
            let unit = Unit::parse(unit_token).ok_or_else(|| {
                ContractError::retention_parse(
                    input,
                    format!(
                        "unknown unit '{unit_token}' (expected years, months, weeks, days, hours, minutes or seconds)"
                    ),
                )
            })?;

            let count = i64::from(count);
            let delta = match unit {
                Unit::Years | Unit::Months => {
                    let factor = if unit == Unit::Years { 12 } else { 1 };
                    months = (count * factor)
                        .try_into()
                        .ok()
                        .and_then(|m: u32| months.checked_add(m))
                        .ok_or_else(|| too_large(input))?;
                    continue;
                }
                Unit::Weeks => TimeDelta::try_weeks(count),
                Unit::Days => TimeDelta::try_days(count),
                Unit::Hours => TimeDelta::try_hours(count),
                Unit::Minutes => TimeDelta::try_minutes(count),
                Unit::Seconds => TimeDelta::try_seconds(count),
            };
            fixed = delta
                .and_then(|d| fixed.checked_add(&d))
                .ok_or_else(|| too_large(input))?;
        }

        let anchor = anchor();
        let end = anchor
            .checked_add_months(Months::new(months))
            .and_then(|t| t.checked_add_signed(fixed))
            .ok_or_else(|| too_large(input))?;

        Ok(Self {
            label: input.trim().to_string(),
            span: end - anchor,
        })
    }

    /// Build a period from an exact span (label is used for display only)
    pub fn from_span(label: impl Into<String>, span: TimeDelta) -> Self {
        Self {
            label: label.into(),
            span,
        }
    }

    /// Exact length of the period
    pub fn span(&self) -> TimeDelta {
        self.span
    }

    /// A zero period means "always expired"
    pub fn is_zero(&self) -> bool {
        self.span.is_zero()
    }

    /// Whether an artifact of the given age has outlived the period
    pub fn is_exceeded_by(&self, age: TimeDelta) -> bool {
        self.is_zero() || age > self.span
    }

    /// The text the period was parsed from
    pub fn as_str(&self) -> &str {
        &self.label
    }
}

fn anchor() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MIN)
}

fn too_large(input: &str) -> ContractError {
    ContractError::retention_parse(input, "period is too large")
}

impl Default for RetentionPeriod {
    fn default() -> Self {
        // 181 days: 0001-01-01 + 6 calendar months
        Self::parse(DEFAULT_RETENTION)
            .unwrap_or_else(|_| Self::from_span(DEFAULT_RETENTION, TimeDelta::days(181)))
    }
}

impl FromStr for RetentionPeriod {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RetentionPeriod {
    type Error = ContractError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RetentionPeriod> for String {
    fn from(value: RetentionPeriod) -> Self {
        value.label
    }
}

impl fmt::Display for RetentionPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}
