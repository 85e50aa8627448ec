//! Projections without a native implementation, driven through proj4rs.
//!
//! Definitions come from the crs-definitions database by EPSG code.
//! proj4rs works in radians for geographic coordinates.

use std::fmt;
use std::sync::Arc;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use stac_common::crs::proj4_definition;
use stac_common::CrsParseError;

use crate::error::{ProjectionError, Result};

const WGS84: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// A CRS from the crs-definitions database.
#[derive(Clone)]
pub struct Proj4Projection {
    epsg: u32,
    geographic: bool,
    proj: Arc<Proj>,
    wgs84: Arc<Proj>,
}

impl fmt::Debug for Proj4Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proj4Projection")
            .field("epsg", &self.epsg)
            .field("geographic", &self.geographic)
            .finish()
    }
}

impl PartialEq for Proj4Projection {
    fn eq(&self, other: &Self) -> bool {
        self.epsg == other.epsg
    }
}

fn parse(crs: &str, definition: &str) -> Result<Proj> {
    Proj::from_proj_string(definition).map_err(|e| ProjectionError::Definition {
        crs: crs.to_string(),
        reason: format!("{:?}", e),
    })
}

impl Proj4Projection {
    pub fn from_epsg(epsg: u32) -> Result<Self> {
        let name = format!("EPSG:{}", epsg);
        let definition =
            proj4_definition(epsg).ok_or_else(|| CrsParseError::UnsupportedCrs(name.clone()))?;
        Ok(Self {
            epsg,
            geographic: definition.contains("+proj=longlat"),
            proj: Arc::new(parse(&name, definition)?),
            wgs84: Arc::new(parse("EPSG:4326", WGS84)?),
        })
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    fn run(&self, src: &Proj, dst: &Proj, xy: (f64, f64), radians: (bool, bool)) -> Result<(f64, f64)> {
        let (x, y) = xy;
        let mut point = if radians.0 {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        let out_of_domain = || ProjectionError::out_of_domain(x, y, format!("EPSG:{}", self.epsg));
        transform(src, dst, &mut point).map_err(|_| out_of_domain())?;

        let (ox, oy) = if radians.1 {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };
        if ox.is_finite() && oy.is_finite() {
            Ok((ox, oy))
        } else {
            Err(out_of_domain())
        }
    }

    /// lon/lat (degrees, WGS84) to this CRS.
    pub fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        self.run(&self.wgs84, &self.proj, (lon, lat), (true, self.geographic))
    }

    /// This CRS to lon/lat (degrees, WGS84).
    pub fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        self.run(&self.proj, &self.wgs84, (x, y), (self.geographic, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lambert93_origin() {
        let p = Proj4Projection::from_epsg(2154).unwrap();
        let (x, y) = p.forward(3.0, 46.5).unwrap();
        assert!((x - 700_000.0).abs() < 0.01, "x = {}", x);
        assert!((y - 6_600_000.0).abs() < 0.01, "y = {}", y);

        let (lon, lat) = p.inverse(x, y).unwrap();
        assert!((lon - 3.0).abs() < 1e-8);
        assert!((lat - 46.5).abs() < 1e-8);
    }

    #[test]
    fn test_geographic_definition_stays_in_degrees() {
        let p = Proj4Projection::from_epsg(4258).unwrap();
        let (lon, lat) = p.forward(10.0, 53.5).unwrap();
        assert!((lon - 10.0).abs() < 1e-6);
        assert!((lat - 53.5).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_code() {
        assert!(matches!(
            Proj4Projection::from_epsg(99_999),
            Err(ProjectionError::Crs(_))
        ));
    }
}
