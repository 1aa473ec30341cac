//! Five-field cron expression parsing and evaluation (C2).
//!
//! Supports the classic unix field set — minute, hour, day-of-month, month,
//! day-of-week — with `*`, `a-b` ranges, `a,b,c` lists, and `*/n` / `a-b/n`
//! steps. Seconds are not part of the grammar; a cron is considered to
//! match for the whole minute its fields select (`spec.md` §4.2).
//!
//! This is a deliberately narrow, hand-rolled parser rather than a
//! dependency on the `cron` crate: that crate's expressions are six- or
//! seven-field (seconds-first, quartz-style) and AND-combine day-of-month
//! with day-of-week, neither of which matches the OR-combination and
//! strict 5-field grammar this spec requires (`spec.md` §9 Design Notes,
//! §4.2).

use crate::error::CronError;
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// A single cron field's allowed values, represented as a dense bitset
/// sized to the field's valid range.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldSet {
    min: u32,
    allowed: Vec<bool>,
    /// True if the original token was the bare wildcard `*` (not `*/n`),
    /// used to decide whether dom/dow are "restricted" for the OR rule.
    is_wildcard: bool,
}

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        value
            .checked_sub(self.min)
            .and_then(|offset| self.allowed.get(offset as usize))
            .copied()
            .unwrap_or(false)
    }

    fn parse(raw: &str, min: u32, max: u32, field_index: usize) -> Result<Self, CronError> {
        let span = (max - min + 1) as usize;
        let mut allowed = vec![false; span];
        let is_wildcard = raw.trim() == "*";

        for token in raw.split(',') {
            Self::parse_token(token, min, max, field_index, raw, &mut allowed)?;
        }

        if allowed.iter().all(|v| !v) {
            return Err(CronError::InvalidCron {
                expr: raw.to_string(),
                field: Some(field_index),
                reason: "field selects no values".to_string(),
            });
        }

        Ok(Self {
            min,
            allowed,
            is_wildcard,
        })
    }

    fn parse_token(
        token: &str,
        min: u32,
        max: u32,
        field_index: usize,
        whole_field: &str,
        allowed: &mut [bool],
    ) -> Result<(), CronError> {
        let err = |reason: &str| CronError::InvalidCron {
            expr: whole_field.to_string(),
            field: Some(field_index),
            reason: reason.to_string(),
        };

        let (base, step) = match token.split_once('/') {
            Some((base, step_str)) => {
                let step: u32 = step_str
                    .parse()
                    .map_err(|_| err("step must be a positive integer"))?;
                if step == 0 {
                    return Err(err("step must be nonzero"));
                }
                (base, Some(step))
            }
            None => (token, None),
        };

        let (lo, hi) = if base == "*" {
            (min, max)
        } else if let Some((lo_str, hi_str)) = base.split_once('-') {
            let lo: u32 = lo_str.parse().map_err(|_| err("invalid range start"))?;
            let hi: u32 = hi_str.parse().map_err(|_| err("invalid range end"))?;
            if lo > hi {
                return Err(err("range start must not exceed range end"));
            }
            (lo, hi)
        } else {
            let value: u32 = base.parse().map_err(|_| err("invalid value"))?;
            (value, value)
        };

        if lo < min || hi > max {
            return Err(err("value out of range for field"));
        }

        let step = step.unwrap_or(1);
        let mut value = lo;
        while value <= hi {
            allowed[(value - min) as usize] = true;
            value += step;
        }

        Ok(())
    }
}

/// A parsed 5-field cron expression, ready for repeated evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minute: FieldSet,
    hour: FieldSet,
    day_of_month: FieldSet,
    month: FieldSet,
    day_of_week: FieldSet,
}

impl CronExpr {
    /// Parse a 5-field cron expression. Any known extension syntax
    /// (`@yearly`, `?`, a seconds field) is rejected as `InvalidCron` —
    /// this spec defines 5-field-only cron (`spec.md` §9 Open Questions).
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::InvalidCron {
                expr: expr.to_string(),
                field: None,
                reason: format!(
                    "expected exactly 5 space-separated fields, found {}",
                    fields.len()
                ),
            });
        }
        for (index, field) in fields.iter().enumerate() {
            if field.contains('?') {
                return Err(CronError::InvalidCron {
                    expr: expr.to_string(),
                    field: Some(index),
                    reason: "'?' is not supported — use '*'".to_string(),
                });
            }
        }

        Ok(Self {
            source: expr.to_string(),
            minute: FieldSet::parse(fields[0], 0, 59, 0)?,
            hour: FieldSet::parse(fields[1], 0, 23, 1)?,
            day_of_month: FieldSet::parse(fields[2], 1, 31, 2)?,
            month: FieldSet::parse(fields[3], 1, 12, 3)?,
            // 0-6 only: `spec.md` §4.2 defines the classic 5-field grammar
            // and doesn't carry over the `7 == Sunday` alias some cron
            // dialects accept alongside `0`. Treated as out of range here,
            // consistent with the narrow grammar this evaluator implements.
            day_of_week: FieldSet::parse(fields[4], 0, 6, 4)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// True if `instant`, projected into `tz`, matches every field.
    /// Day-of-month and day-of-week are OR-combined when both fields are
    /// restricted (not wildcards) — traditional cron semantics.
    pub fn matches(&self, instant: DateTime<Utc>, tz: Tz) -> bool {
        let local = instant.with_timezone(&tz);

        if !self.minute.contains(local.minute()) {
            return false;
        }
        if !self.hour.contains(local.hour()) {
            return false;
        }
        if !self.month.contains(local.month()) {
            return false;
        }

        let dom_matches = self.day_of_month.contains(local.day());
        let dow_matches = self
            .day_of_week
            .contains(local.weekday().num_days_from_sunday());

        let day_ok = match (self.day_of_month.is_wildcard, self.day_of_week.is_wildcard) {
            (true, true) => true,
            (true, false) => dow_matches,
            (false, true) => dom_matches,
            (false, false) => dom_matches || dow_matches,
        };

        day_ok
    }

    /// The minute-aligned window `[start, start+1min)` containing `instant`
    /// if the expression matches, else `None`. Seconds/nanoseconds of
    /// `instant` are irrelevant to matching, so this simply truncates
    /// `instant` down to its minute boundary (valid across all IANA zones
    /// since UTC offsets are always whole minutes).
    pub fn active_window(
        &self,
        instant: DateTime<Utc>,
        tz: Tz,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        if !self.matches(instant, tz) {
            return None;
        }
        let start = instant
            .date_naive()
            .and_hms_opt(instant.hour(), instant.minute(), 0)
            .expect("valid truncated time");
        let start = Utc.from_utc_datetime(&start);
        Some((start, start + chrono::Duration::minutes(1)))
    }
}

/// Parse an IANA timezone name, defaulting to UTC when absent or empty,
/// as `spec.md` §3/§4.2 specify for `Schedule.timezone`.
pub fn parse_timezone(name: Option<&str>) -> Result<Tz, CronError> {
    match name {
        None => Ok(Tz::UTC),
        Some(name) if name.trim().is_empty() => Ok(Tz::UTC),
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| CronError::UnknownTimezone(name.to_string())),
    }
}
