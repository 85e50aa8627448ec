//! Coordinate Reference System types and utilities.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

/// WGS84 semi-major axis (meters).
pub const WGS84_SEMI_MAJOR_AXIS: f64 = 6_378_137.0;

/// WGS84 inverse flattening.
pub const WGS84_INVERSE_FLATTENING: f64 = 298.257_223_563;

/// GRS80 inverse flattening (ETRS89 based CRSs).
pub const GRS80_INVERSE_FLATTENING: f64 = 298.257_222_101;

/// CRS codes the stacking engine understands.
///
/// The named variants have native projections; any other EPSG code is
/// accepted when the crs-definitions database knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CrsCode {
    /// WGS84 Geographic (lon/lat in degrees)
    Epsg4326,
    /// Web Mercator (meters)
    Epsg3857,
    /// ETRS89 Lambert Azimuthal Equal Area (Europe)
    Epsg3035,
    /// WGS84 / UTM zone, EPSG:326xx (north) or EPSG:327xx (south)
    Utm { zone: u8, north: bool },
    /// Any other EPSG code listed in the crs-definitions database
    Epsg(u32),
}

/// PROJ.4 definition of an EPSG code from the crs-definitions database.
pub fn proj4_definition(code: u32) -> Option<&'static str> {
    u16::try_from(code)
        .ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
}

impl CrsCode {
    /// Build a CRS from its EPSG number.
    pub fn from_epsg(code: u32) -> Result<Self, CrsParseError> {
        match code {
            4326 => Ok(CrsCode::Epsg4326),
            3857 | 900913 => Ok(CrsCode::Epsg3857),
            3035 => Ok(CrsCode::Epsg3035),
            32601..=32660 => Ok(CrsCode::Utm {
                zone: (code - 32600) as u8,
                north: true,
            }),
            32701..=32760 => Ok(CrsCode::Utm {
                zone: (code - 32700) as u8,
                north: false,
            }),
            _ if proj4_definition(code).is_some() => Ok(CrsCode::Epsg(code)),
            _ => Err(CrsParseError::UnsupportedCrs(format!("EPSG:{}", code))),
        }
    }

    /// Parse a CRS identifier.
    ///
    /// Accepts formats like:
    /// - "EPSG:32633", "epsg:4326" or a bare "3035"
    /// - "CRS:84" / "OGC:CRS84" (equivalent to EPSG:4326 with lon/lat axis order)
    /// - "urn:ogc:def:crs:EPSG::32633"
    /// - "http://www.opengis.net/def/crs/EPSG/0/32633"
    pub fn parse(s: &str) -> Result<Self, CrsParseError> {
        let normalized = s.trim().to_uppercase();

        if matches!(
            normalized.as_str(),
            "CRS:84" | "OGC:CRS84" | "URN:OGC:DEF:CRS:OGC:1.3:CRS84" | "WGS84"
        ) {
            return Ok(CrsCode::Epsg4326);
        }

        let code = if let Some(rest) = normalized.strip_prefix("EPSG:") {
            rest
        } else if let Some(rest) = normalized.strip_prefix("URN:OGC:DEF:CRS:EPSG:") {
            // version segment may be empty ("EPSG::4326") or explicit ("EPSG:9.8:4326")
            rest.rsplit(':').next().unwrap_or(rest)
        } else if normalized.starts_with("HTTP://") || normalized.starts_with("HTTPS://") {
            normalized.rsplit('/').next().unwrap_or("")
        } else {
            normalized.as_str()
        };

        let code: u32 = code
            .parse()
            .map_err(|_| CrsParseError::InvalidIdentifier(s.to_string()))?;
        Self::from_epsg(code)
    }

    /// EPSG number of this CRS.
    pub fn epsg(&self) -> u32 {
        match self {
            CrsCode::Epsg4326 => 4326,
            CrsCode::Epsg3857 => 3857,
            CrsCode::Epsg3035 => 3035,
            CrsCode::Utm { zone, north: true } => 32600 + *zone as u32,
            CrsCode::Utm { zone, north: false } => 32700 + *zone as u32,
            CrsCode::Epsg(code) => *code,
        }
    }

    /// PROJ.4 definition, for codes without a native projection.
    pub fn proj4(&self) -> Option<&'static str> {
        match self {
            CrsCode::Epsg(code) => proj4_definition(*code),
            _ => None,
        }
    }

    /// Check if this is a geographic (lat/lon) CRS.
    pub fn is_geographic(&self) -> bool {
        match self {
            CrsCode::Epsg4326 => true,
            CrsCode::Epsg(_) => self.proj4().is_some_and(|def| def.contains("+proj=longlat")),
            _ => false,
        }
    }

    /// Check if this is one of the UTM zones.
    pub fn is_utm(&self) -> bool {
        matches!(self, CrsCode::Utm { .. })
    }

    /// UTM zone containing a geographic point.
    pub fn utm_for_point(lon: f64, lat: f64) -> Self {
        let lon = ((lon + 180.0).rem_euclid(360.0)) - 180.0;
        let zone = (((lon + 180.0) / 6.0).floor() as i32).clamp(0, 59) + 1;
        CrsCode::Utm {
            zone: zone as u8,
            north: lat >= 0.0,
        }
    }

    /// Unit of the projected axes.
    pub fn units(&self) -> &'static str {
        if self.is_geographic() {
            "degrees"
        } else {
            "metre"
        }
    }

    /// Names of the horizontal dimensions, `(x, y)`.
    pub fn dim_names(&self) -> (&'static str, &'static str) {
        if self.is_geographic() {
            ("lon", "lat")
        } else {
            ("x", "y")
        }
    }

    /// CF-convention grid mapping attributes for the `spatial_ref` coordinate.
    pub fn cf_attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        match self {
            CrsCode::Epsg4326 => {
                attrs.insert("grid_mapping_name".into(), json!("latitude_longitude"));
                attrs.insert("semi_major_axis".into(), json!(WGS84_SEMI_MAJOR_AXIS));
                attrs.insert("inverse_flattening".into(), json!(WGS84_INVERSE_FLATTENING));
            }
            CrsCode::Epsg3857 => {
                attrs.insert("grid_mapping_name".into(), json!("mercator"));
                attrs.insert("longitude_of_projection_origin".into(), json!(0.0));
                attrs.insert("standard_parallel".into(), json!(0.0));
                attrs.insert("false_easting".into(), json!(0.0));
                attrs.insert("false_northing".into(), json!(0.0));
                attrs.insert("semi_major_axis".into(), json!(WGS84_SEMI_MAJOR_AXIS));
                attrs.insert("semi_minor_axis".into(), json!(WGS84_SEMI_MAJOR_AXIS));
            }
            CrsCode::Epsg3035 => {
                attrs.insert(
                    "grid_mapping_name".into(),
                    json!("lambert_azimuthal_equal_area"),
                );
                attrs.insert("latitude_of_projection_origin".into(), json!(52.0));
                attrs.insert("longitude_of_projection_origin".into(), json!(10.0));
                attrs.insert("false_easting".into(), json!(4_321_000.0));
                attrs.insert("false_northing".into(), json!(3_210_000.0));
                attrs.insert("semi_major_axis".into(), json!(WGS84_SEMI_MAJOR_AXIS));
                attrs.insert("inverse_flattening".into(), json!(GRS80_INVERSE_FLATTENING));
            }
            CrsCode::Utm { zone, north } => {
                attrs.insert("grid_mapping_name".into(), json!("transverse_mercator"));
                attrs.insert(
                    "longitude_of_central_meridian".into(),
                    json!(utm_central_meridian(*zone)),
                );
                attrs.insert("latitude_of_projection_origin".into(), json!(0.0));
                attrs.insert("scale_factor_at_central_meridian".into(), json!(0.9996));
                attrs.insert("false_easting".into(), json!(500_000.0));
                attrs.insert(
                    "false_northing".into(),
                    json!(if *north { 0.0 } else { 10_000_000.0 }),
                );
                attrs.insert("semi_major_axis".into(), json!(WGS84_SEMI_MAJOR_AXIS));
                attrs.insert("inverse_flattening".into(), json!(WGS84_INVERSE_FLATTENING));
            }
            CrsCode::Epsg(_) => {
                if self.is_geographic() {
                    attrs.insert("grid_mapping_name".into(), json!("latitude_longitude"));
                }
                if let Some(def) = self.proj4() {
                    attrs.insert("proj4_params".into(), json!(def));
                }
            }
        }
        attrs.insert("spatial_ref".into(), json!(self.to_string()));
        attrs.insert("crs_epsg".into(), json!(self.epsg()));
        attrs
    }

    /// Recover a CRS from CF attributes written by [`CrsCode::cf_attributes`].
    pub fn from_cf_attributes(attrs: &Map<String, Value>) -> Result<Self, CrsParseError> {
        if let Some(code) = attrs.get("crs_epsg").and_then(Value::as_u64) {
            return Self::from_epsg(code as u32);
        }
        match attrs.get("spatial_ref").and_then(Value::as_str) {
            Some(s) => Self::parse(s),
            None => Err(CrsParseError::InvalidIdentifier(
                "missing crs_epsg / spatial_ref attribute".to_string(),
            )),
        }
    }
}

/// Central meridian of a UTM zone, in degrees.
pub fn utm_central_meridian(zone: u8) -> f64 {
    zone as f64 * 6.0 - 183.0
}

impl fmt::Display for CrsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for CrsCode {
    type Err = CrsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CrsCode {
    type Error = CrsParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<CrsCode> for String {
    fn from(crs: CrsCode) -> Self {
        crs.to_string()
    }
}

/// Anything that names a CRS: a parsed code, a string identifier or an EPSG number.
pub trait IntoCrs {
    fn into_crs(self) -> Result<CrsCode, CrsParseError>;
}

impl IntoCrs for CrsCode {
    fn into_crs(self) -> Result<CrsCode, CrsParseError> {
        Ok(self)
    }
}

impl IntoCrs for &CrsCode {
    fn into_crs(self) -> Result<CrsCode, CrsParseError> {
        Ok(*self)
    }
}

impl IntoCrs for &str {
    fn into_crs(self) -> Result<CrsCode, CrsParseError> {
        CrsCode::parse(self)
    }
}

impl IntoCrs for String {
    fn into_crs(self) -> Result<CrsCode, CrsParseError> {
        CrsCode::parse(&self)
    }
}

impl IntoCrs for &String {
    fn into_crs(self) -> Result<CrsCode, CrsParseError> {
        CrsCode::parse(self)
    }
}

impl IntoCrs for u32 {
    fn into_crs(self) -> Result<CrsCode, CrsParseError> {
        CrsCode::from_epsg(self)
    }
}

/// Normalize a CRS identifier. Idempotent on already parsed codes.
pub fn normalize_crs(crs: impl IntoCrs) -> Result<CrsCode, CrsParseError> {
    crs.into_crs()
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CrsParseError {
    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    #[error("Invalid CRS identifier: {0}")]
    InvalidIdentifier(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crs() {
        assert_eq!(CrsCode::parse("EPSG:4326").unwrap(), CrsCode::Epsg4326);
        assert_eq!(CrsCode::parse("epsg:3035").unwrap(), CrsCode::Epsg3035);
        assert_eq!(CrsCode::parse("CRS:84").unwrap(), CrsCode::Epsg4326);
        assert_eq!(
            CrsCode::parse("EPSG:32633").unwrap(),
            CrsCode::Utm {
                zone: 33,
                north: true
            }
        );
        assert_eq!(
            CrsCode::parse("urn:ogc:def:crs:EPSG::32734").unwrap(),
            CrsCode::Utm {
                zone: 34,
                north: false
            }
        );
        assert_eq!(
            CrsCode::parse("http://www.opengis.net/def/crs/EPSG/0/3857").unwrap(),
            CrsCode::Epsg3857
        );
    }

    #[test]
    fn test_parse_database_code() {
        // RGF93 / Lambert-93 has no native projection
        let crs = CrsCode::parse("EPSG:2154").unwrap();
        assert_eq!(crs, CrsCode::Epsg(2154));
        assert_eq!(crs.epsg(), 2154);
        assert!(!crs.is_geographic());
        assert!(crs.proj4().unwrap().contains("+proj=lcc"));
        assert_eq!(normalize_crs(2154u32).unwrap(), crs);
        assert!(CrsCode::parse("EPSG:2056").is_ok());

        let attrs = crs.cf_attributes();
        assert!(attrs.contains_key("proj4_params"));
        assert_eq!(CrsCode::from_cf_attributes(&attrs).unwrap(), crs);

        // ETRS89 geographic
        let etrs89 = CrsCode::parse("EPSG:4258").unwrap();
        assert!(etrs89.is_geographic());
        assert_eq!(etrs89.dim_names(), ("lon", "lat"));
    }

    #[test]
    fn test_parse_unsupported() {
        assert!(matches!(
            CrsCode::parse("EPSG:99999"),
            Err(CrsParseError::UnsupportedCrs(_))
        ));
        assert!(matches!(
            CrsCode::parse("not-a-crs"),
            Err(CrsParseError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let crs = normalize_crs("EPSG:32632").unwrap();
        assert_eq!(normalize_crs(crs).unwrap(), crs);
        assert_eq!(normalize_crs(32632u32).unwrap(), crs);
        assert_eq!(normalize_crs(crs.to_string()).unwrap(), crs);
    }

    #[test]
    fn test_utm_for_point() {
        assert_eq!(
            CrsCode::utm_for_point(9.99, 53.5),
            CrsCode::Utm {
                zone: 32,
                north: true
            }
        );
        assert_eq!(
            CrsCode::utm_for_point(-180.0, -10.0),
            CrsCode::Utm {
                zone: 1,
                north: false
            }
        );
        assert_eq!(utm_central_meridian(32), 9.0);
    }

    #[test]
    fn test_cf_attributes_roundtrip() {
        let crs = CrsCode::Utm {
            zone: 31,
            north: false,
        };
        let attrs = crs.cf_attributes();
        assert_eq!(attrs["grid_mapping_name"], "transverse_mercator");
        assert_eq!(attrs["false_northing"], 10_000_000.0);
        assert_eq!(CrsCode::from_cf_attributes(&attrs).unwrap(), crs);
    }

    #[test]
    fn test_serde_as_string() {
        let crs: CrsCode = serde_json::from_str("\"EPSG:32633\"").unwrap();
        assert_eq!(crs.epsg(), 32633);
        assert_eq!(serde_json::to_string(&crs).unwrap(), "\"EPSG:32633\"");
    }
}
