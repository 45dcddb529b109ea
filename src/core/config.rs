use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Config key selecting the resolver strategy
pub const TAX_RESOLVER_KEY: &str = "taxResolver";
/// Config key for the rounding precision of emitted amounts
pub const PRECISION_KEY: &str = "taxItem.amount.precision";
/// Config key for the optional taxation time zone
pub const TAXATION_TIME_ZONE_KEY: &str = "taxationTimeZone";

const DEFAULT_PRECISION: u32 = 2;

/// A time zone given either as an IANA name or a fixed offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeZoneSpec {
    Named(Tz),
    Fixed(FixedOffset),
}

impl FromStr for TimeZoneSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(tz) = s.parse::<Tz>() {
            return Ok(TimeZoneSpec::Named(tz));
        }
        if let Ok(offset) = s.parse::<FixedOffset>() {
            return Ok(TimeZoneSpec::Fixed(offset));
        }
        Err(format!("not an IANA zone or fixed offset: {s:?}"))
    }
}

impl TimeZoneSpec {
    pub const UTC: TimeZoneSpec = TimeZoneSpec::Named(Tz::UTC);

    /// Parse an optional zone string, degrading to UTC with a warning.
    pub fn parse_or_utc(zone: Option<&str>, context: &str) -> TimeZoneSpec {
        match zone {
            None => TimeZoneSpec::UTC,
            Some(s) => s.parse().unwrap_or_else(|err| {
                log::warn!("invalid time zone for {context}: {err}, assuming UTC");
                TimeZoneSpec::UTC
            }),
        }
    }

    /// First instant of `date` in this zone.
    ///
    /// Midnight can fall into a DST gap; the earliest valid interpretation
    /// is used, and a fully unmappable local time yields `None`.
    fn start_of_day(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let midnight = date.and_hms_opt(0, 0, 0)?;
        match self {
            TimeZoneSpec::Named(tz) => tz
                .from_local_datetime(&midnight)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc)),
            TimeZoneSpec::Fixed(offset) => offset
                .from_local_datetime(&midnight)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }

    /// Calendar date of `instant` in this zone.
    fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        match self {
            TimeZoneSpec::Named(tz) => instant.with_timezone(tz).date_naive(),
            TimeZoneSpec::Fixed(offset) => instant.with_timezone(offset).date_naive(),
        }
    }

    /// Reinterpret `date` as the first instant of the day in `from` and
    /// return the equivalent calendar date in `self`.
    pub fn convert_date_from(&self, date: NaiveDate, from: &TimeZoneSpec) -> NaiveDate {
        match from.start_of_day(date) {
            Some(instant) => self.date_of(instant),
            None => {
                log::warn!("start of day {date} does not exist in {from:?}, using date as-is");
                date
            }
        }
    }
}

/// Typed view over the scalar options of the flat tenant configuration.
#[derive(Debug, Clone)]
pub struct TaxConfig {
    /// Resolver strategy identifier (default: the null resolver)
    pub resolver: String,
    /// Rounding precision for emitted amounts
    pub precision: u32,
    /// Optional zone in which taxation dates are evaluated
    pub taxation_time_zone: Option<TimeZoneSpec>,
}

impl TaxConfig {
    pub fn from_map(config: &BTreeMap<String, String>) -> TaxConfig {
        let resolver = config
            .get(TAX_RESOLVER_KEY)
            .map_or_else(|| "null".to_string(), |s| s.trim().to_string());

        let precision = match config.get(PRECISION_KEY) {
            None => DEFAULT_PRECISION,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                log::warn!(
                    "invalid {PRECISION_KEY} value {raw:?}, using default {DEFAULT_PRECISION}"
                );
                DEFAULT_PRECISION
            }),
        };

        let taxation_time_zone = config.get(TAXATION_TIME_ZONE_KEY).and_then(|raw| {
            raw.parse::<TimeZoneSpec>()
                .map_err(|err| log::warn!("invalid {TAXATION_TIME_ZONE_KEY}: {err}, ignoring"))
                .ok()
        });

        TaxConfig {
            resolver,
            precision,
            taxation_time_zone,
        }
    }
}
