//! Per-mission conventions and the asset-opening seam.
//!
//! Reading raster files is left to the caller: anything implementing
//! [`AssetOpener`] turns an [`AssetAccessParams`] record into a cube on the
//! asset's native grid. A [`StackVariant`] supplies what differs between
//! catalogs: property names, categorical bands, resolution choice and
//! whether a format may be decoded concurrently.
//!
//! # Example
//!
//! ```rust,ignore
//! use cube_stacker::accessor::variant_for_store;
//!
//! let variant = variant_for_store("stac-cdse", Some("sentinel-2-l2a"));
//! assert_eq!(variant.name(), "sentinel-2-cdse");
//! ```

use std::fmt::Debug;

use stac_common::{AssetAccessParams, CrsCode, FormatId, Item};

use crate::grouping::ItemConventions;
use crate::types::RasterCube;

/// Meters per degree, used to compare geographic resolutions with native ones.
pub const DEG_TO_METER: f64 = 111_320.0;

/// Native Sentinel-2 pixel sizes in meters.
pub const SENTINEL2_RESOLUTIONS: [f64; 3] = [10.0, 20.0, 60.0];

/// Sentinel-2 L2A assets opened when none are requested.
pub const SENTINEL2_L2A_BANDS: [&str; 15] = [
    "B01", "B02", "B03", "B04", "B05", "B06", "B07", "B08", "B8A", "B09", "B11", "B12", "AOT",
    "SCL", "WVP",
];

/// Sentinel-2 L1C assets opened when none are requested.
pub const SENTINEL2_L1C_BANDS: [&str; 13] = [
    "B01", "B02", "B03", "B04", "B05", "B06", "B07", "B08", "B8A", "B09", "B10", "B11", "B12",
];

/// Store ids recognised by [`variant_for_store`].
pub const STORE_ID_CDSE: &str = "stac-cdse";
pub const STORE_ID_CDSE_ARDC: &str = "stac-cdse-ardc";
pub const STORE_ID_PC: &str = "stac-pc";
pub const STORE_ID_PC_ARDC: &str = "stac-pc-ardc";

/// How the decoder of one format may be driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Tiles may be opened from several threads at once.
    #[default]
    Parallel,
    /// Tiles must be opened one at a time.
    Serial,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Serial => "serial",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options forwarded to every open call.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOptions {
    /// Chunk size the opened array should use
    pub tile_size: usize,
    /// Whether the decoder may run concurrently
    pub execution_mode: ExecutionMode,
    /// Resolution the stack will use for this asset, in the asset's CRS units
    pub spatial_res: Option<f64>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            tile_size: crate::config::DEFAULT_TILE_SIZE,
            execution_mode: ExecutionMode::Parallel,
            spatial_res: None,
        }
    }
}

/// Opens one asset of one item.
///
/// The returned cube holds a single spatial variable named `params.name`
/// on the asset's native grid, without a time axis.
pub trait AssetOpener: Sync {
    fn open(&self, params: &AssetAccessParams, options: &OpenOptions) -> anyhow::Result<RasterCube>;

    /// Sun and viewing angle grids of `item`, for the given spectral bands.
    ///
    /// Variables are named as in [`crate::angles`]. `Ok(None)` means the item
    /// carries no angles.
    fn open_angles(&self, _item: &Item, _bands: &[String]) -> anyhow::Result<Option<RasterCube>> {
        Ok(None)
    }
}

impl<F> AssetOpener for F
where
    F: Fn(&AssetAccessParams, &OpenOptions) -> anyhow::Result<RasterCube> + Sync,
{
    fn open(&self, params: &AssetAccessParams, options: &OpenOptions) -> anyhow::Result<RasterCube> {
        self(params, options)
    }
}

/// Requested resolution in meters, converting degrees for geographic targets.
pub fn resolution_in_meters(spatial_res: f64, target_crs: CrsCode) -> f64 {
    if target_crs.is_geographic() {
        spatial_res * DEG_TO_METER
    } else {
        spatial_res
    }
}

/// Requested resolution in the units of `zone_crs`.
///
/// Degrees become meters for a projected zone and meters become degrees
/// for a geographic one; matching units pass through.
pub fn resolution_in_zone_units(spatial_res: f64, target_crs: CrsCode, zone_crs: CrsCode) -> f64 {
    match (target_crs.is_geographic(), zone_crs.is_geographic()) {
        (true, false) => spatial_res * DEG_TO_METER,
        (false, true) => spatial_res / DEG_TO_METER,
        _ => spatial_res,
    }
}

/// Smallest of `choices` (ascending) that is at least `requested`, else the coarsest.
fn nearest_coarser(choices: &[f64], requested: f64) -> f64 {
    choices
        .iter()
        .copied()
        .find(|r| *r >= requested)
        .or_else(|| choices.last().copied())
        .unwrap_or(requested)
}

/// Catalog-specific behaviour of the stacking engine.
pub trait StackVariant: Send + Sync + Debug {
    /// Short identifier, used in logs.
    fn name(&self) -> &'static str;

    /// Property names used for grouping.
    fn conventions(&self) -> ItemConventions {
        ItemConventions::default()
    }

    /// Assets holding class codes rather than measurements.
    fn categorical_assets(&self) -> &[&'static str] {
        &[]
    }

    fn is_categorical(&self, asset: &str) -> bool {
        self.categorical_assets().contains(&asset)
    }

    /// Assets stacked when the request names none.
    fn default_asset_names(&self, item: &Item) -> Vec<String> {
        item.assets.keys().cloned().collect()
    }

    /// Asset key in `item` that provides `asset` at roughly `spatial_res`.
    fn asset_key(&self, item: &Item, asset: &str, _spatial_res: f64) -> Option<String> {
        item.assets.contains_key(asset).then(|| asset.to_string())
    }

    /// Canvas resolution for an asset in a zone, in `zone_crs` units.
    ///
    /// `native` is the asset's declared pixel size, if any.
    fn canvas_resolution(
        &self,
        requested: f64,
        target_crs: CrsCode,
        zone_crs: CrsCode,
        native: Option<f64>,
    ) -> f64 {
        native.unwrap_or_else(|| resolution_in_zone_units(requested, target_crs, zone_crs))
    }

    /// How tiles in `format` may be decoded.
    fn execution_mode(&self, _format: FormatId) -> ExecutionMode {
        ExecutionMode::Parallel
    }

    /// Whether items carry Sentinel-2 sun and viewing angles.
    fn supports_angles(&self) -> bool {
        false
    }
}

/// Conventions of any STAC catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericVariant;

impl StackVariant for GenericVariant {
    fn name(&self) -> &'static str {
        "generic"
    }
}

/// Sentinel-2 from the Copernicus Data Space Ecosystem.
///
/// Bands are published once per native resolution with a `_<res>m`
/// suffix, and JP2 decoding must not run concurrently.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sentinel2CdseVariant;

impl StackVariant for Sentinel2CdseVariant {
    fn name(&self) -> &'static str {
        "sentinel-2-cdse"
    }

    fn categorical_assets(&self) -> &[&'static str] {
        &["SCL"]
    }

    fn default_asset_names(&self, item: &Item) -> Vec<String> {
        let bands: &[&str] = if item.collection.as_deref() == Some("sentinel-2-l1c") {
            &SENTINEL2_L1C_BANDS
        } else {
            &SENTINEL2_L2A_BANDS
        };
        bands.iter().map(|b| b.to_string()).collect()
    }

    fn asset_key(&self, item: &Item, asset: &str, spatial_res: f64) -> Option<String> {
        if item.assets.contains_key(asset) {
            return Some(asset.to_string());
        }
        let mut choices = SENTINEL2_RESOLUTIONS.to_vec();
        choices.sort_by(|a, b| (a - spatial_res).abs().total_cmp(&(b - spatial_res).abs()));
        choices
            .into_iter()
            .map(|res| format!("{}_{}m", asset, res as u32))
            .find(|key| item.assets.contains_key(key))
    }

    fn canvas_resolution(
        &self,
        requested: f64,
        target_crs: CrsCode,
        zone_crs: CrsCode,
        _native: Option<f64>,
    ) -> f64 {
        nearest_coarser(
            &SENTINEL2_RESOLUTIONS,
            resolution_in_zone_units(requested, target_crs, zone_crs),
        )
    }

    fn execution_mode(&self, format: FormatId) -> ExecutionMode {
        match format {
            FormatId::Jp2 => ExecutionMode::Serial,
            _ => ExecutionMode::Parallel,
        }
    }

    fn supports_angles(&self) -> bool {
        true
    }
}

/// Sentinel-2 L2A from Microsoft Planetary Computer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sentinel2PlanetaryComputerVariant;

impl StackVariant for Sentinel2PlanetaryComputerVariant {
    fn name(&self) -> &'static str {
        "sentinel-2-planetary-computer"
    }

    fn conventions(&self) -> ItemConventions {
        ItemConventions {
            tile_id_key: "s2:mgrs_tile".to_string(),
            version_keys: vec!["s2:processing_baseline".to_string()],
            crs_key: "proj:code".to_string(),
        }
    }

    fn categorical_assets(&self) -> &[&'static str] {
        &["SCL"]
    }

    fn default_asset_names(&self, _item: &Item) -> Vec<String> {
        SENTINEL2_L2A_BANDS.iter().map(|b| b.to_string()).collect()
    }

    fn canvas_resolution(
        &self,
        requested: f64,
        target_crs: CrsCode,
        zone_crs: CrsCode,
        _native: Option<f64>,
    ) -> f64 {
        nearest_coarser(
            &SENTINEL2_RESOLUTIONS,
            resolution_in_zone_units(requested, target_crs, zone_crs),
        )
    }

    fn supports_angles(&self) -> bool {
        true
    }
}

/// Pick the variant for a store and dataset.
///
/// Data ids match when they contain a known collection name, so
/// `"sentinel-2-l2a-v2"` still resolves. Anything unknown is generic.
pub fn variant_for_store(store_id: &str, data_id: Option<&str>) -> Box<dyn StackVariant> {
    let Some(data_id) = data_id else {
        return Box::new(GenericVariant);
    };
    match store_id {
        STORE_ID_CDSE | STORE_ID_CDSE_ARDC
            if ["sentinel-2-l2a", "sentinel-2-l1c"]
                .iter()
                .any(|key| data_id.contains(key)) =>
        {
            Box::new(Sentinel2CdseVariant)
        }
        STORE_ID_PC | STORE_ID_PC_ARDC if data_id.contains("sentinel-2-l2a") => {
            Box::new(Sentinel2PlanetaryComputerVariant)
        }
        _ => Box::new(GenericVariant),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use stac_common::{Asset, BoundingBox};

    fn item_with_assets(keys: &[&str]) -> Item {
        let mut item = Item::new(
            "S2B_MSIL2A_20240601",
            BoundingBox::new(10.0, 50.0, 11.0, 51.0),
            Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap(),
        )
        .with_collection("sentinel-2-l2a");
        for key in keys {
            item = item.with_asset(*key, Asset::new(format!("s3://eodata/{}.jp2", key)));
        }
        item
    }

    #[test]
    fn test_factory() {
        assert_eq!(variant_for_store("stac-cdse", Some("sentinel-2-l2a")).name(), "sentinel-2-cdse");
        assert_eq!(variant_for_store("stac-cdse-ardc", Some("sentinel-2-l1c")).name(), "sentinel-2-cdse");
        assert_eq!(
            variant_for_store("stac-pc", Some("sentinel-2-l2a")).name(),
            "sentinel-2-planetary-computer"
        );
        assert_eq!(variant_for_store("stac-pc", Some("sentinel-2-l1c")).name(), "generic");
        assert_eq!(variant_for_store("stac", Some("sentinel-2-l2a")).name(), "generic");
        assert_eq!(variant_for_store("stac-cdse", None).name(), "generic");
    }

    #[test]
    fn test_sentinel2_canvas_resolution() {
        let variant = Sentinel2CdseVariant;
        let utm = CrsCode::Utm {
            zone: 32,
            north: true,
        };
        assert_eq!(variant.canvas_resolution(10.0, utm, utm, None), 10.0);
        assert_eq!(variant.canvas_resolution(15.0, utm, utm, None), 20.0);
        assert_eq!(variant.canvas_resolution(100.0, utm, utm, None), 60.0);
        // 0.0001 degrees is about 11 m
        assert_eq!(variant.canvas_resolution(0.0001, CrsCode::Epsg4326, utm, None), 20.0);
    }

    #[test]
    fn test_generic_canvas_resolution_prefers_native() {
        let variant = GenericVariant;
        let laea = CrsCode::Epsg3035;
        assert_eq!(variant.canvas_resolution(10.0, laea, laea, Some(30.0)), 30.0);
        assert_eq!(variant.canvas_resolution(10.0, laea, laea, None), 10.0);
    }

    #[test]
    fn test_generic_canvas_resolution_in_zone_units() {
        let variant = GenericVariant;
        let geo = CrsCode::Epsg4326;
        let utm = CrsCode::Utm {
            zone: 32,
            north: true,
        };
        // geographic items requested in degrees stay in degrees
        assert_eq!(variant.canvas_resolution(0.001, geo, geo, None), 0.001);
        assert!((variant.canvas_resolution(0.001, geo, utm, None) - 111.32).abs() < 1e-9);
        assert!((variant.canvas_resolution(111.32, utm, geo, None) - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_cdse_asset_key_with_resolution_suffix() {
        let variant = Sentinel2CdseVariant;
        let item = item_with_assets(&["B04_10m", "B04_20m", "B04_60m", "B05_20m", "SCL_20m"]);
        assert_eq!(variant.asset_key(&item, "B04", 10.0).as_deref(), Some("B04_10m"));
        assert_eq!(variant.asset_key(&item, "B04", 60.0).as_deref(), Some("B04_60m"));
        assert_eq!(variant.asset_key(&item, "B05", 10.0).as_deref(), Some("B05_20m"));
        assert_eq!(variant.asset_key(&item, "B04_20m", 10.0).as_deref(), Some("B04_20m"));
        assert_eq!(variant.asset_key(&item, "B10", 10.0), None);
    }

    #[test]
    fn test_execution_mode_per_format() {
        assert_eq!(Sentinel2CdseVariant.execution_mode(FormatId::Jp2), ExecutionMode::Serial);
        assert_eq!(
            Sentinel2CdseVariant.execution_mode(FormatId::GeoTiff),
            ExecutionMode::Parallel
        );
        assert_eq!(GenericVariant.execution_mode(FormatId::Jp2), ExecutionMode::Parallel);
    }

    #[test]
    fn test_planetary_computer_conventions() {
        let conventions = Sentinel2PlanetaryComputerVariant.conventions();
        assert_eq!(conventions.tile_id_key, "s2:mgrs_tile");
        assert!(Sentinel2PlanetaryComputerVariant.is_categorical("SCL"));
        assert!(!GenericVariant.is_categorical("SCL"));
    }

    #[test]
    fn test_closure_opener() {
        let opener = |_: &AssetAccessParams, _: &OpenOptions| -> anyhow::Result<RasterCube> {
            anyhow::bail!("offline")
        };
        let item = item_with_assets(&["B04"]);
        let params = AssetAccessParams::from_item(&item, "B04").unwrap();
        let err = opener.open(&params, &OpenOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "offline");
    }
}
