//! Spherical Web Mercator (EPSG:3857).

use std::f64::consts::PI;

use crate::error::{ProjectionError, Result};
use crate::geographic::{normalize_angle, Ellipsoid};

/// Latitude limit of the square Web Mercator world (degrees).
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Web Mercator on a sphere of the WGS84 semi-major axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WebMercator {
    radius: f64,
}

impl Default for WebMercator {
    fn default() -> Self {
        Self {
            radius: Ellipsoid::WGS84.a,
        }
    }
}

impl WebMercator {
    /// Project lon/lat (degrees) to x/y (meters).
    pub fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        if !(lon.is_finite() && lat.is_finite()) || lat.abs() >= 90.0 {
            return Err(ProjectionError::out_of_domain(lon, lat, "EPSG:3857"));
        }
        let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let lon = normalize_angle(lon.to_radians());
        let x = self.radius * lon;
        let y = self.radius * (PI / 4.0 + lat / 2.0).tan().ln();
        Ok((x, y))
    }

    /// Unproject x/y (meters) to lon/lat (degrees).
    pub fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if !(x.is_finite() && y.is_finite()) {
            return Err(ProjectionError::NonFinite { x, y });
        }
        let lon = (x / self.radius).to_degrees();
        let lat = (2.0 * (y / self.radius).exp().atan() - PI / 2.0).to_degrees();
        Ok((lon, lat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_web_mercator_known_point() {
        let proj = WebMercator::default();
        let (x, y) = proj.forward(10.0, 50.0).unwrap();
        assert!((x - 1_113_194.907_932_7).abs() < 1e-3, "x = {}", x);
        assert!((y - 6_446_275.841_017_2).abs() < 1e-3, "y = {}", y);
    }

    #[test]
    fn test_web_mercator_roundtrip() {
        let proj = WebMercator::default();
        let (x, y) = proj.forward(-73.98, 40.75).unwrap();
        let (lon, lat) = proj.inverse(x, y).unwrap();
        assert!((lon + 73.98).abs() < 1e-9);
        assert!((lat - 40.75).abs() < 1e-9);
    }

    #[test]
    fn test_web_mercator_pole_rejected() {
        assert!(WebMercator::default().forward(0.0, 90.0).is_err());
    }
}
