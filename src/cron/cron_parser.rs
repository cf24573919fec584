// src/cron/cron_parser.rs
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ::cron::Schedule;

use crate::error::StoreError;

/// Cron expressions for repeating jobs.
pub struct CronParser;

impl CronParser {
    /// Parse a cron expression and calculate the next fire time strictly after `from`.
    /// Format: "sec min hour day month weekday [year]"; the classic five-field
    /// form ("min hour day month weekday") fires at second zero.
    /// Example: "0 */5 * * * *" = every 5 minutes
    pub fn next_execution(cron_expr: &str, from: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        let schedule = Self::parse(cron_expr)?;
        schedule
            .after(&from)
            .next()
            .ok_or_else(|| StoreError::InvalidSchedule(format!("'{cron_expr}' never fires again")))
    }

    pub fn parse(cron_expr: &str) -> Result<Schedule, StoreError> {
        let fields = cron_expr.split_whitespace().count();
        let normalized = match fields {
            5 => format!("0 {cron_expr}"),
            6 | 7 => cron_expr.to_string(),
            _ => {
                return Err(StoreError::InvalidSchedule(format!(
                    "'{cron_expr}' has {fields} fields, expected 5, 6 or 7"
                )))
            }
        };
        Schedule::from_str(&normalized)
            .map_err(|e| StoreError::InvalidSchedule(format!("'{cron_expr}': {e}")))
    }
}
