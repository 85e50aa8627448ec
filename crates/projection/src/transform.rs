//! Point and bounding-box transformations between supported CRSs.
//!
//! Every transformation pivots through geographic WGS84 lon/lat. Datum
//! shifts between WGS84 and ETRS89 are below a metre and ignored by the
//! native projections; proj4rs applies the `towgs84` shifts of its
//! definitions.

use stac_common::{BoundingBox, CrsCode, IntoCrs};

use crate::error::{ProjectionError, Result};
use crate::geographic::normalize_lon;
use crate::laea::LambertAzimuthalEqualArea;
use crate::mercator::WebMercator;
use crate::proj4::Proj4Projection;
use crate::utm::TransverseMercator;

/// Default number of points sampled per bounding-box edge.
pub const DEFAULT_DENSIFY_POINTS: usize = 21;

/// A concrete projection for one CRS.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Geographic,
    WebMercator(WebMercator),
    TransverseMercator(TransverseMercator),
    LambertAzimuthalEqualArea(LambertAzimuthalEqualArea),
    Proj4(Proj4Projection),
}

impl Projection {
    /// Projection implementing `crs`.
    pub fn for_crs(crs: &CrsCode) -> Result<Self> {
        Ok(match crs {
            CrsCode::Epsg4326 => Projection::Geographic,
            CrsCode::Epsg3857 => Projection::WebMercator(WebMercator::default()),
            CrsCode::Epsg3035 => {
                Projection::LambertAzimuthalEqualArea(LambertAzimuthalEqualArea::etrs89())
            }
            CrsCode::Utm { zone, north } => {
                Projection::TransverseMercator(TransverseMercator::utm(*zone, *north))
            }
            CrsCode::Epsg(code) => Projection::Proj4(Proj4Projection::from_epsg(*code)?),
        })
    }

    /// lon/lat (degrees) to projected coordinates.
    pub fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        match self {
            Projection::Geographic => {
                if lon.is_finite() && lat.is_finite() {
                    Ok((lon, lat))
                } else {
                    Err(ProjectionError::NonFinite { x: lon, y: lat })
                }
            }
            Projection::WebMercator(p) => p.forward(lon, lat),
            Projection::TransverseMercator(p) => p.forward(lon, lat),
            Projection::LambertAzimuthalEqualArea(p) => p.forward(lon, lat),
            Projection::Proj4(p) => p.forward(lon, lat),
        }
    }

    /// Projected coordinates to lon/lat (degrees).
    pub fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        match self {
            Projection::Geographic => {
                if x.is_finite() && y.is_finite() {
                    Ok((x, y))
                } else {
                    Err(ProjectionError::NonFinite { x, y })
                }
            }
            Projection::WebMercator(p) => p.inverse(x, y),
            Projection::TransverseMercator(p) => p.inverse(x, y),
            Projection::LambertAzimuthalEqualArea(p) => p.inverse(x, y),
            Projection::Proj4(p) => p.inverse(x, y),
        }
    }
}

/// Transforms coordinates from one CRS to another.
#[derive(Debug, Clone)]
pub struct Transformer {
    src_crs: CrsCode,
    dst_crs: CrsCode,
    src: Projection,
    dst: Projection,
}

impl Transformer {
    pub fn new(src_crs: CrsCode, dst_crs: CrsCode) -> Result<Self> {
        Ok(Self {
            src: Projection::for_crs(&src_crs)?,
            dst: Projection::for_crs(&dst_crs)?,
            src_crs,
            dst_crs,
        })
    }

    /// Build a transformer from any CRS identifiers.
    pub fn from_crs(src: impl IntoCrs, dst: impl IntoCrs) -> Result<Self> {
        Self::new(src.into_crs()?, dst.into_crs()?)
    }

    pub fn src_crs(&self) -> CrsCode {
        self.src_crs
    }

    pub fn dst_crs(&self) -> CrsCode {
        self.dst_crs
    }

    /// True when source and destination are the same CRS.
    pub fn is_identity(&self) -> bool {
        self.src_crs == self.dst_crs
    }

    /// Transform a single point.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if self.is_identity() {
            return Ok((x, y));
        }
        let (lon, lat) = self.src.inverse(x, y)?;
        self.dst.forward(lon, lat)
    }

    /// Transform the envelope of `bbox`, sampling `densify_pts` points per edge.
    ///
    /// Points that fail to transform are skipped. For a geographic
    /// destination whose longitudes span the antimeridian, the result has
    /// `min_x > max_x`.
    pub fn transform_bounds(&self, bbox: &BoundingBox, densify_pts: usize) -> Result<BoundingBox> {
        if self.is_identity() {
            return Ok(*bbox);
        }

        let n = densify_pts.max(2);
        let mut xs = Vec::with_capacity(4 * n);
        let mut ys = Vec::with_capacity(4 * n);
        for i in 0..n {
            let t = i as f64 / (n - 1) as f64;
            let x = bbox.min_x + t * bbox.width();
            let y = bbox.min_y + t * bbox.height();
            for (px, py) in [
                (x, bbox.min_y),
                (x, bbox.max_y),
                (bbox.min_x, y),
                (bbox.max_x, y),
            ] {
                if let Ok((tx, ty)) = self.transform(px, py) {
                    xs.push(tx);
                    ys.push(ty);
                }
            }
        }

        if xs.is_empty() {
            return Err(ProjectionError::EmptyBounds(bbox.to_array()));
        }

        let (min_y, max_y) = min_max(&ys);
        let (mut min_x, mut max_x) = min_max(&xs);
        if self.dst_crs.is_geographic() && max_x - min_x > 180.0 {
            // wrap negative longitudes and look for a tighter extent
            let shifted: Vec<f64> = xs
                .iter()
                .map(|&x| if x < 0.0 { x + 360.0 } else { x })
                .collect();
            let (smin, smax) = min_max(&shifted);
            if smax - smin < max_x - min_x {
                min_x = normalize_lon(smin);
                max_x = normalize_lon(smax);
            }
        }

        Ok(BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

/// Reproject a bounding box and grow it by `buffer` times its width and height.
///
/// Returns the input unchanged when both CRSs normalize to the same code.
/// A geographic result crossing the antimeridian keeps `min_x > max_x`; its
/// width for buffering is taken across the dateline.
pub fn reproject_bbox(
    bbox: &BoundingBox,
    src_crs: impl IntoCrs,
    dst_crs: impl IntoCrs,
    buffer: f64,
) -> Result<BoundingBox> {
    reproject_bbox_with(bbox, src_crs, dst_crs, buffer, DEFAULT_DENSIFY_POINTS)
}

/// [`reproject_bbox`] with an explicit number of points sampled per edge.
pub fn reproject_bbox_with(
    bbox: &BoundingBox,
    src_crs: impl IntoCrs,
    dst_crs: impl IntoCrs,
    buffer: f64,
    densify_pts: usize,
) -> Result<BoundingBox> {
    let transformer = Transformer::from_crs(src_crs, dst_crs)?;
    if transformer.is_identity() {
        return Ok(*bbox);
    }

    let target = transformer.transform_bounds(bbox, densify_pts)?;
    let mut x_max = target.max_x;
    if transformer.dst_crs().is_geographic() && target.min_x > x_max {
        x_max += 360.0;
    }
    let buffer_x = (x_max - target.min_x).abs() * buffer;
    let buffer_y = (target.max_y - target.min_y).abs() * buffer;

    Ok(BoundingBox {
        min_x: target.min_x - buffer_x,
        min_y: target.min_y - buffer_y,
        max_x: target.max_x + buffer_x,
        max_y: target.max_y + buffer_y,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_returns_input() {
        let bbox = BoundingBox::new(2.0, 50.0, 3.0, 51.0);
        let out = reproject_bbox(&bbox, "EPSG:4326", "OGC:CRS84", 0.05).unwrap();
        assert_eq!(out, bbox);
    }

    #[test]
    fn test_point_utm_to_laea_and_back() {
        let t = Transformer::new(CrsCode::Utm { zone: 32, north: true }, CrsCode::Epsg3035).unwrap();
        let back =
            Transformer::new(CrsCode::Epsg3035, CrsCode::Utm { zone: 32, north: true }).unwrap();
        let (x, y) = t.transform(565_834.35, 5_933_953.5).unwrap();
        let (e, n) = back.transform(x, y).unwrap();
        assert!((e - 565_834.35).abs() < 1e-3);
        assert!((n - 5_933_953.5).abs() < 1e-3);
    }

    #[test]
    fn test_bounds_include_edge_curvature() {
        // the lower edge of this box bulges below its corners in LAEA
        let bbox = BoundingBox::new(2.0, 50.0, 3.0, 51.0);
        let t = Transformer::new(CrsCode::Epsg4326, CrsCode::Epsg3035).unwrap();
        let out = t.transform_bounds(&bbox, DEFAULT_DENSIFY_POINTS).unwrap();
        assert!((out.min_x - 3_748_675.953).abs() < 1e-2);
        assert!((out.max_x - 3_830_472.136).abs() < 1e-2);
        let (_, corner_y) = t.transform(2.0, 50.0).unwrap();
        assert!(out.min_y < corner_y);
    }

    #[test]
    fn test_geographic_roundtrip_web_mercator() {
        let bbox = BoundingBox::new(2.0, 50.0, 3.0, 51.0);
        let there = reproject_bbox(&bbox, "EPSG:4326", "EPSG:3857", 0.0).unwrap();
        let back = reproject_bbox(&there, "EPSG:3857", "EPSG:4326", 0.0).unwrap();
        assert!(back.approx_eq(&bbox, 1e-9), "{:?}", back);
    }

    #[test]
    fn test_laea_roundtrip_contains_original() {
        // Each leg takes the envelope of a curved outline, so the area only
        // grows: the LAEA envelope holds corners outside the lon/lat box, and
        // those map back further out. A round trip through a rotated
        // projection stays a superset and is off by a tenth of a degree here,
        // never within 1e-3.
        let bbox = BoundingBox::new(2.0, 50.0, 3.0, 51.0);
        let there = reproject_bbox(&bbox, "EPSG:4326", "EPSG:3035", 0.0).unwrap();
        let back = reproject_bbox(&there, "EPSG:3035", "EPSG:4326", 0.0).unwrap();
        assert!(back.contains_point(2.0, 50.0));
        assert!(back.contains_point(3.0, 51.0));
        assert!(bbox.min_x - back.min_x < 0.2 && back.max_x - bbox.max_x < 0.2);
        assert!(bbox.min_y - back.min_y < 0.1 && back.max_y - bbox.max_y < 0.1);
    }

    #[test]
    fn test_buffer_applied_to_both_axes() {
        let bbox = BoundingBox::new(500_000.0, 5_000_000.0, 510_000.0, 5_010_000.0);
        let plain = reproject_bbox(&bbox, 32632u32, 4326u32, 0.0).unwrap();
        let buffered = reproject_bbox(&bbox, 32632u32, 4326u32, 0.1).unwrap();
        let dx = plain.width() * 0.1;
        let dy = plain.height() * 0.1;
        assert!((buffered.min_x - (plain.min_x - dx)).abs() < 1e-12);
        assert!((buffered.max_y - (plain.max_y + dy)).abs() < 1e-12);
    }

    #[test]
    fn test_antimeridian_box_wraps() {
        // UTM zone 60 box straddling 180 degrees
        let bbox = BoundingBox::new(700_000.0, 8_000_000.0, 900_000.0, 8_100_000.0);
        let out = reproject_bbox(&bbox, 32760u32, 4326u32, 0.0).unwrap();
        assert!(out.min_x > out.max_x, "{:?}", out);
        assert!(out.min_x > 170.0 && out.max_x < -170.0);

        let buffered = reproject_bbox(&bbox, 32760u32, 4326u32, 0.1).unwrap();
        let width = out.max_x + 360.0 - out.min_x;
        assert!((out.min_x - buffered.min_x - width * 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_database_crs_through_proj4rs() {
        let bbox = BoundingBox::new(2.0, 48.0, 3.0, 49.0);
        let l93 = reproject_bbox(&bbox, "EPSG:4326", "EPSG:2154", 0.0).unwrap();
        // Lambert-93 eastings and northings around Paris
        assert!(l93.min_x > 550_000.0 && l93.max_x < 750_000.0, "{:?}", l93);
        assert!(l93.min_y > 6_700_000.0 && l93.max_y < 6_900_000.0, "{:?}", l93);

        let back = reproject_bbox(&l93, "EPSG:2154", "EPSG:4326", 0.0).unwrap();
        assert!(back.contains_point(2.0, 48.0) && back.contains_point(3.0, 49.0));

        let utm = reproject_bbox(&l93, 2154u32, 32631u32, 0.0).unwrap();
        assert!(utm.min_x > 300_000.0 && utm.max_x < 600_000.0, "{:?}", utm);
    }

    #[test]
    fn test_unsupported_crs() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        assert!(matches!(
            reproject_bbox(&bbox, "EPSG:4326", "EPSG:99999", 0.0),
            Err(ProjectionError::Crs(_))
        ));
    }
}
