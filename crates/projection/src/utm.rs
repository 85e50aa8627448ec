//! Transverse Mercator projection and the UTM zones built on it.
//!
//! Sentinel-2 granules are delivered in the UTM zone of their MGRS tile, so
//! every source tile of a stack is usually in one of these CRSs.
//!
//! Formulas follow the ellipsoidal series of Snyder, "Map Projections: A
//! Working Manual" (USGS PP 1395), eqs. 8-9 to 8-25. They are accurate to
//! well below a millimetre inside a zone and stay usable a few zones away,
//! which is what cross-zone resampling needs.

use crate::error::{ProjectionError, Result};
use crate::geographic::{is_valid_lonlat, normalize_angle, Ellipsoid};

/// Longitude distance from the central meridian beyond which the series is not used (degrees).
const MAX_MERIDIAN_DISTANCE: f64 = 60.0;

/// Transverse Mercator projection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TransverseMercator {
    /// Central meridian in radians
    pub lon0: f64,
    /// Scale factor on the central meridian
    pub k0: f64,
    /// False easting (meters)
    pub false_easting: f64,
    /// False northing (meters)
    pub false_northing: f64,
    ellipsoid: Ellipsoid,
    e2: f64,
    ep2: f64,
    /// Meridional arc coefficients
    m: [f64; 4],
    /// Footpoint latitude coefficients
    fp: [f64; 4],
}

impl TransverseMercator {
    /// Create a Transverse Mercator projection with latitude of origin 0.
    pub fn new(
        lon0_deg: f64,
        k0: f64,
        false_easting: f64,
        false_northing: f64,
        ellipsoid: Ellipsoid,
    ) -> Self {
        let e2 = ellipsoid.e2();
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        let m = [
            1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0,
            3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0,
            15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0,
            35.0 * e6 / 3072.0,
        ];

        let sqrt_1_e2 = (1.0 - e2).sqrt();
        let e1 = (1.0 - sqrt_1_e2) / (1.0 + sqrt_1_e2);
        let e1_2 = e1 * e1;
        let e1_3 = e1_2 * e1;
        let e1_4 = e1_3 * e1;
        let fp = [
            3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0,
            21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0,
            151.0 * e1_3 / 96.0,
            1097.0 * e1_4 / 512.0,
        ];

        Self {
            lon0: lon0_deg.to_radians(),
            k0,
            false_easting,
            false_northing,
            ellipsoid,
            e2,
            ep2: ellipsoid.ep2(),
            m,
            fp,
        }
    }

    /// WGS84 / UTM zone `zone` (1-60), northern or southern hemisphere.
    pub fn utm(zone: u8, north: bool) -> Self {
        let lon0 = zone as f64 * 6.0 - 183.0;
        let false_northing = if north { 0.0 } else { 10_000_000.0 };
        Self::new(lon0, 0.9996, 500_000.0, false_northing, Ellipsoid::WGS84)
    }

    /// Meridional arc length from the equator to `lat` (radians).
    fn meridional_arc(&self, lat: f64) -> f64 {
        let [m0, m2, m4, m6] = self.m;
        self.ellipsoid.a
            * (m0 * lat - m2 * (2.0 * lat).sin() + m4 * (4.0 * lat).sin()
                - m6 * (6.0 * lat).sin())
    }

    /// Project lon/lat (degrees) to easting/northing (meters).
    pub fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        if !is_valid_lonlat(lon, lat) {
            return Err(ProjectionError::out_of_domain(lon, lat, "transverse mercator"));
        }
        let dlon = normalize_angle(lon.to_radians() - self.lon0);
        if dlon.abs().to_degrees() > MAX_MERIDIAN_DISTANCE {
            return Err(ProjectionError::out_of_domain(lon, lat, "transverse mercator"));
        }

        let phi = lat.to_radians();
        let (sin_phi, cos_phi) = phi.sin_cos();
        let tan_phi = phi.tan();

        let n = self.ellipsoid.a / (1.0 - self.e2 * sin_phi * sin_phi).sqrt();
        let t = tan_phi * tan_phi;
        let c = self.ep2 * cos_phi * cos_phi;
        let a = dlon * cos_phi;
        let a2 = a * a;
        let a3 = a2 * a;
        let a4 = a3 * a;
        let a5 = a4 * a;
        let a6 = a5 * a;
        let m = self.meridional_arc(phi);

        let x = self.k0
            * n
            * (a + (1.0 - t + c) * a3 / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * self.ep2) * a5 / 120.0);
        let y = self.k0
            * (m + n
                * tan_phi
                * (a2 / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * self.ep2) * a6 / 720.0));

        Ok((x + self.false_easting, y + self.false_northing))
    }

    /// Unproject easting/northing (meters) to lon/lat (degrees).
    pub fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if !(x.is_finite() && y.is_finite()) {
            return Err(ProjectionError::NonFinite { x, y });
        }
        let x = x - self.false_easting;
        let y = y - self.false_northing;

        let m = y / self.k0;
        let mu = m / (self.ellipsoid.a * self.m[0]);
        let [f2, f4, f6, f8] = self.fp;
        let phi1 = mu
            + f2 * (2.0 * mu).sin()
            + f4 * (4.0 * mu).sin()
            + f6 * (6.0 * mu).sin()
            + f8 * (8.0 * mu).sin();

        let (sin_phi1, cos_phi1) = phi1.sin_cos();
        if cos_phi1.abs() < 1e-12 {
            let lat = if phi1 > 0.0 { 90.0 } else { -90.0 };
            return Ok((self.lon0.to_degrees(), lat));
        }
        let tan_phi1 = phi1.tan();
        let c1 = self.ep2 * cos_phi1 * cos_phi1;
        let t1 = tan_phi1 * tan_phi1;
        let w = 1.0 - self.e2 * sin_phi1 * sin_phi1;
        let n1 = self.ellipsoid.a / w.sqrt();
        let r1 = self.ellipsoid.a * (1.0 - self.e2) / w.powf(1.5);
        let d = x / (n1 * self.k0);
        let d2 = d * d;
        let d3 = d2 * d;
        let d4 = d3 * d;
        let d5 = d4 * d;
        let d6 = d5 * d;

        let phi = phi1
            - (n1 * tan_phi1 / r1)
                * (d2 / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * self.ep2) * d4 / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                        - 252.0 * self.ep2
                        - 3.0 * c1 * c1)
                        * d6
                        / 720.0);
        let lon = self.lon0
            + (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
                + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * self.ep2 + 24.0 * t1 * t1)
                    * d5
                    / 120.0)
                / cos_phi1;

        if !(phi.is_finite() && lon.is_finite()) {
            return Err(ProjectionError::out_of_domain(x, y, "transverse mercator"));
        }
        Ok((normalize_angle(lon).to_degrees(), phi.to_degrees()))
    }
}
