//! Inbound telemetry parsing.
//!
//! The vessel sends GPS fixes as loosely typed JSON text:
//!
//! ```text
//! {"lat": 48.137, "lng": 11.575, "course_deg": 92.5}
//! ```
//!
//! (`course` is accepted as an alias for `course_deg`.) Everything is
//! validated here; nothing unvalidated reaches application state.

use serde::{Deserialize, Serialize};

use crate::error::TelemetryError;

/// Wire shape, before validation.
#[derive(Debug, Deserialize)]
struct RawFix {
    lat: Option<f64>,
    lng: Option<f64>,
    course_deg: Option<f64>,
    course: Option<f64>,
}

/// A validated GPS fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryFix {
    pub lat: f64,
    pub lng: f64,
    /// Course over ground in degrees, normalized to `[0, 360)`.
    pub course: Option<f64>,
}

/// Parse and validate one inbound frame.
pub fn parse_fix(text: &str) -> Result<TelemetryFix, TelemetryError> {
    let raw: RawFix = serde_json::from_str(text)?;

    let lat = raw.lat.ok_or(TelemetryError::MissingField("lat"))?;
    let lng = raw.lng.ok_or(TelemetryError::MissingField("lng"))?;
    check_range("lat", lat, 90.0)?;
    check_range("lng", lng, 180.0)?;

    let course = match raw.course_deg.or(raw.course) {
        Some(c) if c.is_finite() => Some(normalize_course(c)),
        Some(c) => return Err(TelemetryError::OutOfRange { field: "course", value: c }),
        None => None,
    };

    Ok(TelemetryFix { lat, lng, course })
}

fn check_range(field: &'static str, value: f64, limit: f64) -> Result<(), TelemetryError> {
    if value.is_finite() && value.abs() <= limit {
        Ok(())
    } else {
        Err(TelemetryError::OutOfRange { field, value })
    }
}

/// Wrap any finite heading into `[0, 360)`.
pub fn normalize_course(deg: f64) -> f64 {
    let c = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negatives.
    if c >= 360.0 { 0.0 } else { c }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_fix() {
        let fix = parse_fix(r#"{"lat":1,"lng":2,"course_deg":90}"#).unwrap();
        assert_eq!(fix, TelemetryFix { lat: 1.0, lng: 2.0, course: Some(90.0) });
    }

    #[test]
    fn course_alias() {
        let fix = parse_fix(r#"{"lat":1.5,"lng":2.5,"course":45}"#).unwrap();
        assert_eq!(fix.course, Some(45.0));
    }

    #[test]
    fn course_is_optional() {
        let fix = parse_fix(r#"{"lat":1,"lng":2}"#).unwrap();
        assert_eq!(fix.course, None);
    }

    #[test]
    fn zero_coordinates_are_valid() {
        let fix = parse_fix(r#"{"lat":0,"lng":0}"#).unwrap();
        assert_eq!((fix.lat, fix.lng), (0.0, 0.0));
    }

    #[test]
    fn null_or_missing_coordinates_rejected() {
        assert!(matches!(
            parse_fix(r#"{"lat":null,"lng":2}"#),
            Err(TelemetryError::MissingField("lat"))
        ));
        assert!(matches!(
            parse_fix(r#"{"lat":1}"#),
            Err(TelemetryError::MissingField("lng"))
        ));
    }

    #[test]
    fn malformed_rejected() {
        assert!(matches!(parse_fix("not json"), Err(TelemetryError::Malformed(_))));
        assert!(matches!(
            parse_fix(r#"{"lat":"north","lng":2}"#),
            Err(TelemetryError::Malformed(_))
        ));
        assert!(parse_fix("42").is_err());
    }

    #[test]
    fn out_of_range_rejected() {
        assert!(matches!(
            parse_fix(r#"{"lat":91,"lng":2}"#),
            Err(TelemetryError::OutOfRange { field: "lat", .. })
        ));
        assert!(matches!(
            parse_fix(r#"{"lat":1,"lng":-181}"#),
            Err(TelemetryError::OutOfRange { field: "lng", .. })
        ));
    }

    #[test]
    fn course_is_normalized() {
        assert_eq!(normalize_course(360.0), 0.0);
        assert_eq!(normalize_course(-90.0), 270.0);
        assert_eq!(normalize_course(725.0), 5.0);
    }
}
