//! Cron expression normalisation

use std::time::Duration;

/// A monitor schedule in the form the job scheduler accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronSchedule {
    /// Seconds-first cron expression or descriptor (`@hourly`)
    Cron(String),
    /// Fixed interval from `@every <n><s|m|h>`
    Every(Duration),
}

impl CronSchedule {
    /// Normalise a user-supplied expression.
    ///
    /// Five-field expressions get a leading `0` seconds field. In five and six
    /// field expressions the day-of-week numbers 0-7 (0 and 7 are Sunday) are
    /// rewritten as day names, since the job scheduler counts Sunday as 1.
    /// Seven-field expressions pass through unchanged.
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(ScheduleError::invalid(expr, "empty expression"));
        }

        if let Some(rest) = trimmed.strip_prefix("@every") {
            return parse_interval(rest.trim())
                .map(CronSchedule::Every)
                .ok_or_else(|| ScheduleError::invalid(expr, "expected @every <n><s|m|h>"));
        }

        if trimmed.starts_with('@') {
            return Ok(CronSchedule::Cron(trimmed.to_string()));
        }

        let mut fields: Vec<String> = trimmed.split_whitespace().map(str::to_string).collect();
        match fields.len() {
            5 => fields.insert(0, "0".to_string()),
            6 | 7 => {}
            n => return Err(ScheduleError::invalid(expr, format!("expected 5 to 7 fields, got {}", n))),
        }
        if fields.len() == 6 {
            fields[5] = day_names(&fields[5]).map_err(|reason| ScheduleError::invalid(expr, reason))?;
        }
        Ok(CronSchedule::Cron(fields.join(" ")))
    }
}

const DAY_NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Rewrite numeric day-of-week values as names: `1-5` becomes `MON-FRI`.
fn day_names(field: &str) -> Result<String, String> {
    let mut parts = Vec::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };

        let mapped = match range.split_once('-') {
            Some((start, end)) => {
                let start_name = day_name(start)?;
                // A range ending on Sunday wraps past Saturday
                if step.is_none() && is_sunday(end) && !is_sunday(start) {
                    format!("{}-SAT,SUN", start_name)
                } else if is_sunday(start) && end == "7" {
                    "SUN-SAT".to_string()
                } else {
                    format!("{}-{}", start_name, day_name(end)?)
                }
            }
            None => day_name(range)?,
        };

        parts.push(match step {
            Some(step) => format!("{}/{}", mapped, step),
            None => mapped,
        });
    }
    Ok(parts.join(","))
}

fn day_name(value: &str) -> Result<String, String> {
    match value.parse::<usize>() {
        Ok(n) => DAY_NAMES
            .get(n)
            .map(|name| name.to_string())
            .ok_or_else(|| format!("day of week {} out of range 0-7", n)),
        Err(_) => Ok(value.to_string()),
    }
}

fn is_sunday(value: &str) -> bool {
    matches!(value, "0" | "7") || value.eq_ignore_ascii_case("sun")
}

/// Parse `90s`, `5m`, `1h` or a compound like `1h30m`.
fn parse_interval(text: &str) -> Option<Duration> {
    if text.is_empty() {
        return None;
    }

    let mut total = 0u64;
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: u64 = digits.parse().ok()?;
        digits.clear();
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            _ => return None,
        };
        total = total.checked_add(n.checked_mul(unit)?)?;
    }

    if !digits.is_empty() || total == 0 {
        return None;
    }
    Some(Duration::from_secs(total))
}

/// Scheduling errors
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression {expr:?}: {reason}")]
    Invalid { expr: String, reason: String },

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl ScheduleError {
    fn invalid(expr: &str, reason: impl Into<String>) -> Self {
        ScheduleError::Invalid {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }
}
