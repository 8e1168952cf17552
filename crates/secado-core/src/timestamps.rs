use chrono::offset::LocalResult;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone as _, Timelike};
use chrono_tz::Tz;
use tracing::debug;

/// A timestamp as it arrives from a reader or a workbook cell, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTimestamp {
    Text(String),
    Naive(NaiveDateTime),
    Zoned(DateTime<FixedOffset>),
    Missing,
}

impl From<NaiveDateTime> for RawTimestamp {
    fn from(value: NaiveDateTime) -> Self {
        RawTimestamp::Naive(value)
    }
}

impl From<&str> for RawTimestamp {
    fn from(value: &str) -> Self {
        RawTimestamp::Text(value.to_string())
    }
}

impl From<Option<NaiveDateTime>> for RawTimestamp {
    fn from(value: Option<NaiveDateTime>) -> Self {
        value.map_or(RawTimestamp::Missing, RawTimestamp::Naive)
    }
}

const ZONED_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

const ISO_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
];

const DAY_FIRST_FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M:%S%.f",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S%.f",
    "%d-%m-%Y %H:%M",
    "%d/%m/%y %H:%M:%S",
    "%d/%m/%y %H:%M",
];

const MONTH_FIRST_FORMATS: &[&str] = &[
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
    "%m-%d-%Y %H:%M:%S%.f",
    "%m-%d-%Y %H:%M",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%y %H:%M",
];

// Dotted dates come from the variable-log exporter and are always day first.
const DOTTED_FORMATS: &[&str] = &["%d.%m.%Y %H:%M:%S%.f", "%d.%m.%Y %H:%M", "%d.%m.%y %H:%M:%S"];

const ISO_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];
const DAY_FIRST_DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%d/%m/%y"];
const MONTH_FIRST_DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%m-%d-%Y", "%m/%d/%y"];

/// Brings heterogeneous timestamp values onto one naive, plant-local clock.
#[derive(Debug, Clone)]
pub struct TimestampNormalizer {
    timezone: Tz,
    day_first: bool,
}

impl TimestampNormalizer {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            day_first: true,
        }
    }

    pub fn with_day_first(mut self, day_first: bool) -> Self {
        self.day_first = day_first;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Zoned values are converted to local time and stripped of their zone. Naive values are
    /// already local: with `assume_local` they are checked against the zone's calendar (a wall
    /// time skipped by a clock change moves forward past the gap), otherwise they pass through.
    /// Anything unparseable becomes `None`.
    pub fn normalize(&self, raw: &RawTimestamp, assume_local: bool) -> Option<NaiveDateTime> {
        match raw {
            RawTimestamp::Missing => None,
            RawTimestamp::Zoned(value) => Some(self.to_local(value)),
            RawTimestamp::Naive(value) => Some(self.naive(*value, assume_local)),
            RawTimestamp::Text(text) => match self.parse_text(text)? {
                RawTimestamp::Zoned(value) => Some(self.to_local(&value)),
                RawTimestamp::Naive(value) => Some(self.naive(value, assume_local)),
                _ => None,
            },
        }
    }

    /// Normalizes a whole column, returning the values and how many could not be parsed.
    pub fn normalize_column(
        &self,
        values: &[RawTimestamp],
        assume_local: bool,
    ) -> (Vec<Option<NaiveDateTime>>, usize) {
        let mut unparseable = 0;
        let normalized = values
            .iter()
            .map(|raw| {
                let value = self.normalize(raw, assume_local);
                if value.is_none() && !matches!(raw, RawTimestamp::Missing) {
                    unparseable += 1;
                }
                value
            })
            .collect();
        if unparseable > 0 {
            debug!(unparseable, "timestamps could not be parsed");
        }
        (normalized, unparseable)
    }

    /// Parses timestamp text into a zoned or naive value without normalizing it.
    pub fn parse_text(&self, text: &str) -> Option<RawTimestamp> {
        let text = text.trim();
        if text.is_empty() || is_null_marker(text) {
            return None;
        }

        if let Ok(value) = DateTime::parse_from_rfc3339(text) {
            return Some(RawTimestamp::Zoned(value));
        }
        for format in ZONED_FORMATS {
            if let Ok(value) = DateTime::parse_from_str(text, format) {
                return Some(RawTimestamp::Zoned(value));
            }
        }

        let (preferred, fallback, preferred_dates, fallback_dates) = if self.day_first {
            (
                DAY_FIRST_FORMATS,
                MONTH_FIRST_FORMATS,
                DAY_FIRST_DATE_FORMATS,
                MONTH_FIRST_DATE_FORMATS,
            )
        } else {
            (
                MONTH_FIRST_FORMATS,
                DAY_FIRST_FORMATS,
                MONTH_FIRST_DATE_FORMATS,
                DAY_FIRST_DATE_FORMATS,
            )
        };

        let datetime_formats = ISO_FORMATS
            .iter()
            .chain(preferred)
            .chain(DOTTED_FORMATS)
            .chain(fallback);
        for format in datetime_formats {
            if let Ok(value) = NaiveDateTime::parse_from_str(text, format) {
                return Some(RawTimestamp::Naive(value));
            }
        }

        let date_formats = ISO_DATE_FORMATS
            .iter()
            .chain(preferred_dates)
            .chain(fallback_dates);
        for format in date_formats {
            if let Ok(date) = NaiveDate::parse_from_str(text, format) {
                return date.and_hms_opt(0, 0, 0).map(RawTimestamp::Naive);
            }
        }

        None
    }

    fn to_local(&self, value: &DateTime<FixedOffset>) -> NaiveDateTime {
        value.with_timezone(&self.timezone).naive_local()
    }

    fn naive(&self, value: NaiveDateTime, assume_local: bool) -> NaiveDateTime {
        if !assume_local {
            return value;
        }
        match self.timezone.from_local_datetime(&value) {
            LocalResult::Single(_) | LocalResult::Ambiguous(_, _) => value,
            LocalResult::None => self.skip_gap(value),
        }
    }

    fn skip_gap(&self, value: NaiveDateTime) -> NaiveDateTime {
        // Clock changes move by at most two hours; advance in 15 minute steps.
        (1..=8)
            .map(|step| value + chrono::Duration::minutes(15 * step))
            .find(|candidate| {
                !matches!(
                    self.timezone.from_local_datetime(candidate),
                    LocalResult::None
                )
            })
            .unwrap_or(value)
    }
}

fn is_null_marker(text: &str) -> bool {
    matches!(
        text.to_ascii_lowercase().as_str(),
        "nan" | "nat" | "none" | "null" | "-"
    )
}

/// Drops sub-second precision. Lab bounds are recorded to the second.
pub fn floor_to_second(value: NaiveDateTime) -> NaiveDateTime {
    value.with_nanosecond(0).unwrap_or(value)
}

/// Converts a spreadsheet serial day number (1900 date system) to a timestamp.
pub fn from_excel_serial(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    epoch.checked_add_signed(chrono::Duration::milliseconds(millis))
}
