//! STAC item fixtures shaped like Sentinel-2 L2A items.
//!
//! Footprints are given in geographic coordinates and converted to the
//! tile's UTM zone, snapped outward to the pixel lattice, the way real
//! Sentinel-2 tiles sit on a 10 m grid.

use chrono::{DateTime, TimeZone, Utc};
use projection::reproject_bbox;
use serde_json::json;
use stac_common::raster::raster_bands_v1;
use stac_common::{Asset, BoundingBox, CrsCode, Item};

/// Common geographic bounding boxes.
pub mod bbox {
    use stac_common::BoundingBox;

    /// Small area in Hamburg, well inside UTM zone 32.
    pub fn hamburg() -> BoundingBox {
        BoundingBox::new(9.95, 53.53, 10.0, 53.56)
    }

    /// Straddles the 12°E boundary between UTM zones 32 and 33.
    pub fn zone_boundary() -> BoundingBox {
        BoundingBox::new(11.95, 53.50, 12.05, 53.52)
    }
}

/// Sentinel-2 L2A radiometry: nodata 0, reflectance = DN / 10000 - 0.1.
pub const S2_NODATA: f64 = 0.0;
pub const S2_SCALE: f64 = 0.0001;
pub const S2_OFFSET: f64 = -0.1;

/// Midday acquisition on a day of June 2024.
pub fn june(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, 10, 30, 0)
        .single()
        .expect("valid fixture date")
}

/// Expand `bbox` outward to multiples of `res`.
pub fn snap_bbox(bbox: &BoundingBox, res: f64) -> BoundingBox {
    BoundingBox::new(
        (bbox.min_x / res).floor() * res,
        (bbox.min_y / res).floor() * res,
        (bbox.max_x / res).ceil() * res,
        (bbox.max_y / res).ceil() * res,
    )
}

/// Builder for one Sentinel-2-like item.
#[derive(Debug, Clone)]
pub struct S2ItemFixture {
    pub id: String,
    pub tile_id: String,
    pub crs: CrsCode,
    /// Footprint in EPSG:4326
    pub footprint: BoundingBox,
    pub datetime: DateTime<Utc>,
    pub collection: String,
    pub processing_version: Option<f64>,
    /// Asset keys with their native pixel size in meters
    pub assets: Vec<(String, f64)>,
    pub nodata: f64,
    pub scale: f64,
    pub offset: f64,
}

impl S2ItemFixture {
    pub fn new(
        id: impl Into<String>,
        tile_id: impl Into<String>,
        zone: u8,
        footprint: BoundingBox,
        datetime: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            tile_id: tile_id.into(),
            crs: CrsCode::Utm { zone, north: true },
            footprint,
            datetime,
            collection: "sentinel-2-l2a".to_string(),
            processing_version: None,
            assets: vec![("B04".to_string(), 10.0)],
            nodata: S2_NODATA,
            scale: S2_SCALE,
            offset: S2_OFFSET,
        }
    }

    pub fn with_version(mut self, version: f64) -> Self {
        self.processing_version = Some(version);
        self
    }

    pub fn with_assets(mut self, assets: &[(&str, f64)]) -> Self {
        self.assets = assets.iter().map(|(k, r)| (k.to_string(), *r)).collect();
        self
    }

    pub fn with_radiometry(mut self, nodata: f64, scale: f64, offset: f64) -> Self {
        self.nodata = nodata;
        self.scale = scale;
        self.offset = offset;
        self
    }

    /// Footprint in the tile's UTM zone, snapped to `res`.
    pub fn proj_bbox(&self, res: f64) -> BoundingBox {
        let native = reproject_bbox(&self.footprint, CrsCode::Epsg4326, self.crs, 0.0)
            .expect("fixture footprint must project to its UTM zone");
        snap_bbox(&native, res)
    }

    pub fn build(&self) -> Item {
        let mut item = Item::new(self.id.clone(), self.footprint, self.datetime)
            .with_collection(self.collection.clone())
            .with_property("proj:code", json!(self.crs.to_string()))
            .with_property("grid:code", json!(format!("MGRS-{}", self.tile_id)));
        if let Some(version) = self.processing_version {
            item = item.with_property("processing:version", json!(format!("{:.2}", version)));
        }

        for (key, res) in &self.assets {
            let proj_bbox = self.proj_bbox(*res);
            let width = (proj_bbox.width() / res).round() as u64;
            let height = (proj_bbox.height() / res).round() as u64;
            let mut asset = Asset::new(format!("s3://eodata/Sentinel-2/{}/{}.tif", self.id, key))
                .with_media_type("image/tiff; application=geotiff")
                .with_field("proj:bbox", json!(proj_bbox.to_array()))
                .with_field("proj:shape", json!([height, width]))
                .with_field("gsd", json!(res));
            asset
                .extra_fields
                .extend(raster_bands_v1(self.nodata, self.scale, self.offset));
            item = item.with_asset(key.clone(), asset);
        }
        item
    }
}

/// One Sentinel-2-like item with a single 10 m `B04` asset.
pub fn sentinel2_item(
    id: &str,
    tile_id: &str,
    zone: u8,
    footprint: BoundingBox,
    datetime: DateTime<Utc>,
) -> Item {
    S2ItemFixture::new(id, tile_id, zone, footprint, datetime).build()
}
