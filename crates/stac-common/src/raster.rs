//! Raster-extension metadata attached to assets.
//!
//! Two layouts exist in the wild:
//! - raster extension v1: `raster:bands[0].{nodata, scale, offset, spatial_resolution}`
//! - raster extension v2: asset level `nodata`, `raster:scale`, `raster:offset`,
//!   `raster:spatial_resolution`
//!
//! Native resolution falls back to the asset's (or item's) `gsd`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bbox::BoundingBox;
use crate::crs::CrsCode;
use crate::item::{crs_from_fields, value_as_f64, Asset, Item};

/// Linear radiometric calibration of one asset: `value * scale + offset`,
/// with `nodata` masked to NaN beforehand.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Radiometry {
    pub nodata: Option<f64>,
    pub scale: f64,
    pub offset: f64,
}

impl Default for Radiometry {
    fn default() -> Self {
        Self {
            nodata: None,
            scale: 1.0,
            offset: 0.0,
        }
    }
}

impl PartialEq for Radiometry {
    fn eq(&self, other: &Self) -> bool {
        let nodata_eq = match (self.nodata, other.nodata) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => false,
        };
        nodata_eq && self.scale == other.scale && self.offset == other.offset
    }
}

impl Radiometry {
    /// Whether `value` is this asset's nodata sentinel.
    pub fn is_nodata(&self, value: f32) -> bool {
        match self.nodata {
            Some(nd) if nd.is_nan() => value.is_nan(),
            Some(nd) => value as f64 == nd,
            None => false,
        }
    }

    /// True when applying this calibration changes no values.
    pub fn is_identity(&self) -> bool {
        self.nodata.is_none() && self.scale == 1.0 && self.offset == 0.0
    }

    /// Calibrate one raw value.
    ///
    /// Nodata becomes NaN unless `mask_nodata` is false (classification bands).
    pub fn apply(&self, value: f32, mask_nodata: bool) -> f32 {
        if self.is_nodata(value) {
            if mask_nodata {
                return f32::NAN;
            }
            return value;
        }
        (value as f64 * self.scale + self.offset) as f32
    }
}

/// Which raster-extension layout an asset uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterExtension {
    V1,
    V2,
    Absent,
}

/// Raster metadata of one asset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RasterInfo {
    pub nodata: Option<f64>,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
    /// Native pixel size in CRS units
    pub spatial_resolution: Option<f64>,
    /// Native CRS
    pub crs: Option<CrsCode>,
    /// Native footprint in `crs`
    pub proj_bbox: Option<BoundingBox>,
    /// Native `(height, width)`
    pub proj_shape: Option<(usize, usize)>,
}

impl RasterInfo {
    /// Read raster metadata for `asset`; `crs_key` names the CRS property
    /// (checked on the asset first, then on the item).
    pub fn from_asset(item: &Item, asset: &Asset, crs_key: &str) -> Self {
        let fields = &asset.extra_fields;
        let band = match Self::extension(asset) {
            RasterExtension::V1 => fields
                .get("raster:bands")
                .and_then(Value::as_array)
                .and_then(|bands| bands.first())
                .and_then(Value::as_object),
            _ => None,
        };

        let lookup = |v1_key: &str, v2_key: &str| -> Option<f64> {
            band.and_then(|b| b.get(v1_key))
                .or_else(|| fields.get(v2_key))
                .and_then(nodata_value)
        };

        let spatial_resolution = lookup("spatial_resolution", "raster:spatial_resolution")
            .or_else(|| fields.get("gsd").and_then(value_as_f64))
            .or_else(|| item.property_f64("gsd"));

        Self {
            nodata: lookup("nodata", "nodata"),
            scale: lookup("scale", "raster:scale"),
            offset: lookup("offset", "raster:offset"),
            spatial_resolution,
            crs: crs_from_fields(fields, crs_key).or_else(|| item.native_crs(crs_key)),
            proj_bbox: fields
                .get("proj:bbox")
                .or_else(|| item.property("proj:bbox"))
                .and_then(bbox_value),
            proj_shape: fields
                .get("proj:shape")
                .or_else(|| item.property("proj:shape"))
                .and_then(shape_value),
        }
    }

    /// Detect the raster-extension layout of an asset.
    pub fn extension(asset: &Asset) -> RasterExtension {
        let fields = &asset.extra_fields;
        if fields.get("raster:bands").and_then(Value::as_array).is_some() {
            RasterExtension::V1
        } else if ["raster:scale", "raster:offset", "nodata", "raster:spatial_resolution"]
            .iter()
            .any(|k| fields.contains_key(*k))
        {
            RasterExtension::V2
        } else {
            RasterExtension::Absent
        }
    }

    /// Radiometric calibration, `None` when the asset declares none of nodata, scale and offset.
    pub fn radiometry(&self) -> Option<Radiometry> {
        if self.nodata.is_none() && self.scale.is_none() && self.offset.is_none() {
            return None;
        }
        Some(Radiometry {
            nodata: self.nodata,
            scale: self.scale.unwrap_or(1.0),
            offset: self.offset.unwrap_or(0.0),
        })
    }
}

fn nodata_value(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) if s.eq_ignore_ascii_case("nan") => Some(f64::NAN),
        other => value_as_f64(other),
    }
}

fn bbox_value(value: &Value) -> Option<BoundingBox> {
    let values: Vec<f64> = value.as_array()?.iter().filter_map(Value::as_f64).collect();
    match values.as_slice() {
        [a, b, c, d] => Some(BoundingBox::new(*a, *b, *c, *d)),
        _ => None,
    }
}

fn shape_value(value: &Value) -> Option<(usize, usize)> {
    let values: Vec<u64> = value.as_array()?.iter().filter_map(Value::as_u64).collect();
    match values.as_slice() {
        [h, w] => Some((*h as usize, *w as usize)),
        _ => None,
    }
}

/// Build raster-extension v1 fields, mostly for fixtures.
pub fn raster_bands_v1(nodata: f64, scale: f64, offset: f64) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(
        "raster:bands".to_string(),
        serde_json::json!([{ "nodata": nodata, "scale": scale, "offset": offset }]),
    );
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn item() -> Item {
        Item::new("item", BoundingBox::new(9.0, 53.0, 10.0, 54.0), Utc::now())
            .with_property("proj:code", json!("EPSG:32632"))
    }

    #[test]
    fn test_raster_v1() {
        let asset = Asset::new("https://host/b04.tif")
            .with_field(
                "raster:bands",
                json!([{ "nodata": 0, "scale": 0.0001, "offset": -0.1, "spatial_resolution": 10 }]),
            )
            .with_field("proj:bbox", json!([499980.0, 5890200.0, 609780.0, 6000000.0]));
        assert_eq!(RasterInfo::extension(&asset), RasterExtension::V1);

        let info = RasterInfo::from_asset(&item(), &asset, "proj:code");
        assert_eq!(info.nodata, Some(0.0));
        assert_eq!(info.scale, Some(0.0001));
        assert_eq!(info.offset, Some(-0.1));
        assert_eq!(info.spatial_resolution, Some(10.0));
        assert_eq!(info.crs.unwrap().epsg(), 32632);
        assert_eq!(info.proj_bbox.unwrap().min_x, 499980.0);
    }

    #[test]
    fn test_raster_v2() {
        let asset = Asset::new("https://host/b05.tif")
            .with_field("nodata", json!("nan"))
            .with_field("raster:scale", json!(2.0))
            .with_field("gsd", json!(20))
            .with_field("proj:code", json!("EPSG:32633"));
        assert_eq!(RasterInfo::extension(&asset), RasterExtension::V2);

        let info = RasterInfo::from_asset(&item(), &asset, "proj:code");
        assert!(info.nodata.unwrap().is_nan());
        assert_eq!(info.spatial_resolution, Some(20.0));
        assert_eq!(info.crs.unwrap().epsg(), 32633);

        let radiometry = info.radiometry().unwrap();
        assert_eq!(radiometry.scale, 2.0);
        assert_eq!(radiometry.offset, 0.0);
    }

    #[test]
    fn test_absent_metadata() {
        let asset = Asset::new("https://host/b.tif");
        let info = RasterInfo::from_asset(&item(), &asset, "proj:code");
        assert_eq!(RasterInfo::extension(&asset), RasterExtension::Absent);
        assert!(info.radiometry().is_none());
    }

    #[test]
    fn test_apply_radiometry() {
        let r = Radiometry {
            nodata: Some(0.0),
            scale: 0.5,
            offset: 1.0,
        };
        assert!(r.apply(0.0, true).is_nan());
        assert_eq!(r.apply(0.0, false), 0.0);
        assert_eq!(r.apply(4.0, true), 3.0);
    }

    #[test]
    fn test_nan_nodata_equality() {
        let a = Radiometry {
            nodata: Some(f64::NAN),
            ..Default::default()
        };
        assert_eq!(a, a);
        assert_ne!(a, Radiometry::default());
    }
}
