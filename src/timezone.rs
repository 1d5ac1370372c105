//! Timezone normalization for provider timestamps

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

/// Converts provider UTC timestamps into the configured zone
pub trait TimezoneNormalizer: Send + Sync {
    /// Parse an ISO-8601 UTC timestamp and shift it into the target zone
    fn normalize(&self, utc_timestamp: &str) -> Option<DateTime<FixedOffset>>;

    /// Local calendar date of a unix timestamp in milliseconds
    fn local_date(&self, timestamp_ms: i64) -> Option<NaiveDate>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Zone {
    Fixed(FixedOffset),
    /// IANA zone, offset depends on the instant (DST)
    Named(Tz),
}

/// Normalizer for an IANA zone such as `Asia/Singapore` or a fixed offset
/// such as `+08:00`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneNormalizer {
    zone: Zone,
}

impl ZoneNormalizer {
    pub fn fixed(offset: FixedOffset) -> Self {
        Self {
            zone: Zone::Fixed(offset),
        }
    }

    pub fn named(tz: Tz) -> Self {
        Self {
            zone: Zone::Named(tz),
        }
    }

    pub fn utc() -> Self {
        Self::fixed(Utc.fix())
    }

    /// Accepts `UTC`, `Z`, `+HH:MM`, `-HH:MM`, `+HHMM` or an IANA name
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("utc") || value == "Z" {
            return Ok(Self::utc());
        }

        match value.chars().next() {
            Some('+') => parse_offset(1, &value[1..], value).map(Self::fixed),
            Some('-') => parse_offset(-1, &value[1..], value).map(Self::fixed),
            _ => value
                .parse::<Tz>()
                .map(Self::named)
                .map_err(|_| anyhow!("Unknown timezone: {}", value)),
        }
    }

    fn shift(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        match self.zone {
            Zone::Fixed(offset) => instant.with_timezone(&offset),
            Zone::Named(tz) => {
                let local = instant.with_timezone(&tz);
                local.with_timezone(&local.offset().fix())
            }
        }
    }
}

fn parse_offset(sign: i32, rest: &str, value: &str) -> Result<FixedOffset> {
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        bail!("UTC offset must look like +HH:MM: {}", value);
    }

    let hours: i32 = digits[..2].parse().context("Invalid offset hours")?;
    let minutes: i32 = digits[2..].parse().context("Invalid offset minutes")?;
    if hours > 14 || minutes > 59 {
        bail!("UTC offset out of range: {}", value);
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .with_context(|| format!("UTC offset out of range: {}", value))
}

impl TimezoneNormalizer for ZoneNormalizer {
    fn normalize(&self, utc_timestamp: &str) -> Option<DateTime<FixedOffset>> {
        let raw = utc_timestamp.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(self.shift(dt.with_timezone(&Utc)));
        }

        // Some venues omit the offset entirely; those are UTC.
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
            .ok()
            .map(|naive| self.shift(Utc.from_utc_datetime(&naive)))
    }

    fn local_date(&self, timestamp_ms: i64) -> Option<NaiveDate> {
        Utc.timestamp_millis_opt(timestamp_ms)
            .single()
            .map(|dt| self.shift(dt).date_naive())
    }
}
