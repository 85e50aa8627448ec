//! Lambert Azimuthal Equal Area projection (ellipsoidal).
//!
//! Used by the pan-European ETRS89-LAEA grid (EPSG:3035), a common target
//! CRS for European analysis-ready cubes.
//!
//! Forward formulas follow Snyder (USGS PP 1395) eqs. 3-12, 24-13 to 24-17
//! via the authalic latitude; the inverse uses the authalic-to-geodetic series
//! (eq. 3-18).

use crate::error::{ProjectionError, Result};
use crate::geographic::{is_valid_lonlat, normalize_angle, Ellipsoid};

/// Lambert Azimuthal Equal Area projection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct LambertAzimuthalEqualArea {
    /// Latitude of origin in radians
    pub lat0: f64,
    /// Longitude of origin in radians
    pub lon0: f64,
    /// False easting (meters)
    pub false_easting: f64,
    /// False northing (meters)
    pub false_northing: f64,
    e: f64,
    e2: f64,
    /// q at the pole
    qp: f64,
    /// Radius of the authalic sphere
    rq: f64,
    /// Authalic latitude of origin
    beta0: f64,
    d: f64,
}

impl LambertAzimuthalEqualArea {
    /// Create an oblique projection centered at `(lon0_deg, lat0_deg)`.
    pub fn new(
        lon0_deg: f64,
        lat0_deg: f64,
        false_easting: f64,
        false_northing: f64,
        ellipsoid: Ellipsoid,
    ) -> Self {
        let e2 = ellipsoid.e2();
        let e = e2.sqrt();
        let lat0 = lat0_deg.to_radians();
        let qp = authalic_q(std::f64::consts::FRAC_PI_2, e, e2);
        let rq = ellipsoid.a * (qp / 2.0).sqrt();
        let beta0 = (authalic_q(lat0, e, e2) / qp).asin();
        let m0 = lat0.cos() / (1.0 - e2 * lat0.sin().powi(2)).sqrt();
        let d = ellipsoid.a * m0 / (rq * beta0.cos());

        Self {
            lat0,
            lon0: lon0_deg.to_radians(),
            false_easting,
            false_northing,
            e,
            e2,
            qp,
            rq,
            beta0,
            d,
        }
    }

    /// ETRS89-extended / LAEA Europe (EPSG:3035).
    pub fn etrs89() -> Self {
        Self::new(10.0, 52.0, 4_321_000.0, 3_210_000.0, Ellipsoid::GRS80)
    }

    /// Project lon/lat (degrees) to x/y (meters).
    pub fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        if !is_valid_lonlat(lon, lat) {
            return Err(ProjectionError::out_of_domain(lon, lat, "lambert azimuthal equal area"));
        }
        let dlon = normalize_angle(lon.to_radians() - self.lon0);
        let beta = (authalic_q(lat.to_radians(), self.e, self.e2) / self.qp)
            .clamp(-1.0, 1.0)
            .asin();
        let (sin_b, cos_b) = beta.sin_cos();
        let (sin_b0, cos_b0) = self.beta0.sin_cos();

        let denom = 1.0 + sin_b0 * sin_b + cos_b0 * cos_b * dlon.cos();
        if denom <= 1e-12 {
            // antipode of the origin
            return Err(ProjectionError::out_of_domain(lon, lat, "lambert azimuthal equal area"));
        }
        let b = self.rq * (2.0 / denom).sqrt();
        let x = b * self.d * cos_b * dlon.sin();
        let y = (b / self.d) * (cos_b0 * sin_b - sin_b0 * cos_b * dlon.cos());

        Ok((x + self.false_easting, y + self.false_northing))
    }

    /// Unproject x/y (meters) to lon/lat (degrees).
    pub fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if !(x.is_finite() && y.is_finite()) {
            return Err(ProjectionError::NonFinite { x, y });
        }
        let x = x - self.false_easting;
        let y = y - self.false_northing;

        let rho = ((x / self.d).powi(2) + (self.d * y).powi(2)).sqrt();
        if rho < 1e-9 {
            return Ok((self.lon0.to_degrees(), self.lat0.to_degrees()));
        }
        let ratio = rho / (2.0 * self.rq);
        if ratio > 1.0 {
            return Err(ProjectionError::out_of_domain(x, y, "lambert azimuthal equal area"));
        }
        let ce = 2.0 * ratio.asin();
        let (sin_ce, cos_ce) = ce.sin_cos();
        let (sin_b0, cos_b0) = self.beta0.sin_cos();

        let beta = (cos_ce * sin_b0 + self.d * y * sin_ce * cos_b0 / rho)
            .clamp(-1.0, 1.0)
            .asin();
        let lon = self.lon0
            + (x * sin_ce).atan2(
                self.d * rho * cos_b0 * cos_ce - self.d * self.d * y * sin_b0 * sin_ce,
            );

        let e4 = self.e2 * self.e2;
        let e6 = e4 * self.e2;
        let lat = beta
            + (self.e2 / 3.0 + 31.0 * e4 / 180.0 + 517.0 * e6 / 5040.0) * (2.0 * beta).sin()
            + (23.0 * e4 / 360.0 + 251.0 * e6 / 3780.0) * (4.0 * beta).sin()
            + (761.0 * e6 / 45360.0) * (6.0 * beta).sin();

        Ok((normalize_angle(lon).to_degrees(), lat.to_degrees()))
    }
}

/// Snyder's q function (eq. 3-12).
fn authalic_q(phi: f64, e: f64, e2: f64) -> f64 {
    let s = phi.sin();
    (1.0 - e2) * (s / (1.0 - e2 * s * s) - (1.0 / (2.0 * e)) * ((1.0 - e * s) / (1.0 + e * s)).ln())
}
