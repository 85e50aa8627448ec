//! Time handling for acquisitions: parsing, solar-day bucketing and ISO keys.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Whole-hour offset of local solar time at `lon`, `floor(lon / 15)`.
pub fn solar_offset_hours(lon: f64) -> i64 {
    (lon / 15.0).floor() as i64
}

/// Acquisition time shifted to approximate local solar time.
///
/// Passes that straddle UTC midnight on the far side of the globe land on
/// the same nominal day as their neighbours.
pub fn solar_time(datetime: DateTime<Utc>, lon: f64) -> DateTime<Utc> {
    datetime + Duration::hours(solar_offset_hours(lon))
}

/// Nominal (solar) acquisition date.
pub fn solar_date(datetime: DateTime<Utc>, lon: f64) -> NaiveDate {
    solar_time(datetime, lon).date_naive()
}

/// ISO-8601 key for an output time step, e.g. `2023-07-01T10:30:21.024`.
///
/// The fractional part is omitted when zero.
pub fn iso_timestamp(t: &NaiveDateTime) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

/// Parse an ISO 8601 timestamp (assumes UTC when no offset is given).
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    Err(TimeParseError::InvalidFormat(s.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        parse_datetime(s).unwrap()
    }

    #[test]
    fn test_solar_offset_floors() {
        assert_eq!(solar_offset_hours(0.0), 0);
        assert_eq!(solar_offset_hours(14.9), 0);
        assert_eq!(solar_offset_hours(15.0), 1);
        assert_eq!(solar_offset_hours(-0.5), -1);
        assert_eq!(solar_offset_hours(-179.0), -12);
        assert_eq!(solar_offset_hours(179.0), 11);
    }

    #[test]
    fn test_solar_date_crosses_midnight() {
        // late evening UTC pass over the western Pacific is the next local morning
        let t = utc("2023-06-01T22:45:00Z");
        assert_eq!(
            solar_date(t, 170.0),
            NaiveDate::from_ymd_opt(2023, 6, 2).unwrap()
        );
        assert_eq!(
            solar_date(t, 10.0),
            NaiveDate::from_ymd_opt(2023, 6, 1).unwrap()
        );
    }

    #[test]
    fn test_iso_timestamp() {
        let t = utc("2023-07-01T10:30:21.024Z").naive_utc();
        assert_eq!(iso_timestamp(&t), "2023-07-01T10:30:21.024");
        let t = utc("2023-07-01T10:30:00Z").naive_utc();
        assert_eq!(iso_timestamp(&t), "2023-07-01T10:30:00");
    }

    #[test]
    fn test_parse_datetime_variants() {
        assert_eq!(
            parse_datetime("2023-07-01").unwrap(),
            utc("2023-07-01T00:00:00Z")
        );
        assert_eq!(
            parse_datetime("2023-07-01T10:00:00").unwrap(),
            utc("2023-07-01T10:00:00+00:00")
        );
        assert!(parse_datetime("yesterday").is_err());
    }
}
