//! End-to-end stacking of STAC items into one data cube.
//!
//! Items are grouped per solar day and tile, split by native CRS (one
//! group per UTM zone), written tile by tile into per-asset canvases, and
//! finally resampled onto the requested grid and merged take-first.

use rayon::prelude::*;
use serde_json::json;
use stac_common::{
    AssetAccessParams, BoundingBox, CrsCode, FormatId, GridMapping, Item, Radiometry, RasterInfo,
};
use tracing::{debug, error, info, warn};

use crate::accessor::{resolution_in_meters, AssetOpener, ExecutionMode, OpenOptions, StackVariant};
use crate::angles::add_angles;
use crate::canvas::{allocate_canvas, Canvas};
use crate::config::{InterpolationMethod, StackConfig};
use crate::error::{Result, StackError};
use crate::grouping::{filter_items, group_by_solar_day_with, GroupedItems, ItemConventions};
use crate::merge::{merge_assets, merge_utm_zones, zone_target_grid};
use crate::mosaic::mosaic_take_first;
use crate::resample::resample_soft;
use crate::scaling::{apply_radiometry, resolve_radiometry};
use crate::types::RasterCube;

/// Dataset attribute listing the contributing item ids per time step.
pub const STAC_ITEM_IDS_ATTR: &str = "stac_item_ids";

/// What to stack and onto which grid.
#[derive(Debug, Clone)]
pub struct StackParams {
    /// Assets to stack; `None` uses the variant's defaults.
    pub asset_names: Option<Vec<String>>,
    /// Requested area in `crs`.
    pub bbox: BoundingBox,
    pub crs: CrsCode,
    /// Output pixel size in `crs` units.
    pub spatial_res: f64,
    pub tile_size: usize,
    /// Convert raw values with the declared nodata/scale/offset.
    pub apply_scaling: bool,
    pub bbox_buffer: f64,
    pub interpolation: InterpolationMethod,
    pub parallel: bool,
    pub max_item_bbox_width: f64,
    pub densify_points: usize,
    /// Attach Sentinel-2 sun and viewing angles.
    pub add_angles: bool,
}

impl StackParams {
    pub fn new(bbox: BoundingBox, crs: CrsCode, spatial_res: f64) -> Self {
        Self::from_config(&StackConfig::default(), bbox, crs, spatial_res)
    }

    pub fn from_config(
        config: &StackConfig,
        bbox: BoundingBox,
        crs: CrsCode,
        spatial_res: f64,
    ) -> Self {
        Self {
            asset_names: None,
            bbox,
            crs,
            spatial_res,
            tile_size: config.tile_size,
            apply_scaling: true,
            bbox_buffer: config.bbox_buffer,
            interpolation: config.interpolation,
            parallel: config.parallel,
            max_item_bbox_width: config.max_item_bbox_width,
            densify_points: config.densify_points,
            add_angles: false,
        }
    }

    pub fn with_asset_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.asset_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_scaling(mut self, apply_scaling: bool) -> Self {
        self.apply_scaling = apply_scaling;
        self
    }

    pub fn with_interpolation(mut self, interpolation: InterpolationMethod) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_angles(mut self, add_angles: bool) -> Self {
        self.add_angles = add_angles;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.bbox.is_valid() {
            return Err(StackError::Config(format!(
                "invalid bbox {:?}",
                self.bbox.to_array()
            )));
        }
        if !(self.spatial_res.is_finite() && self.spatial_res > 0.0) {
            return Err(StackError::Config(format!(
                "spatial_res must be positive, got {}",
                self.spatial_res
            )));
        }
        if self.tile_size == 0 {
            return Err(StackError::Config("tile_size must be > 0".to_string()));
        }
        if !(self.bbox_buffer.is_finite() && self.bbox_buffer >= 0.0) {
            return Err(StackError::Config(
                "bbox_buffer must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-asset decisions shared by every zone.
#[derive(Debug, Clone)]
struct AssetPlan {
    name: String,
    /// Resolution used to pick the asset key.
    key_res: f64,
    /// Declared native pixel size.
    native_res: Option<f64>,
    radiometry: Option<Radiometry>,
    fill_value: f32,
    categorical: bool,
    interpolation: InterpolationMethod,
    execution_mode: ExecutionMode,
}

/// Filter and group `items`, then [`stack`] them.
pub fn stack_items(
    items: Vec<Item>,
    opener: &dyn AssetOpener,
    variant: &dyn StackVariant,
    params: &StackParams,
) -> Result<Option<RasterCube>> {
    let items = filter_items(items, params.max_item_bbox_width);
    let grouped = group_by_solar_day_with(&items, &variant.conventions());
    stack(&grouped, opener, variant, params)
}

/// Build one cube from grouped items.
///
/// Returns `Ok(None)` when there is nothing to stack or no item overlaps
/// the requested area. Tiles that fail to open or resample are logged and
/// left empty; inconsistent radiometry aborts the whole stack.
pub fn stack(
    grouped: &GroupedItems,
    opener: &dyn AssetOpener,
    variant: &dyn StackVariant,
    params: &StackParams,
) -> Result<Option<RasterCube>> {
    params.validate()?;
    if params.add_angles && !variant.supports_angles() {
        return Err(StackError::Config(format!(
            "variant {} does not provide sun and viewing angles",
            variant.name()
        )));
    }
    if grouped.is_empty() {
        warn!("No items to stack");
        return Ok(None);
    }

    let conventions = variant.conventions();
    let plans = plan_assets(grouped, variant, params, &conventions)?;
    if plans.is_empty() {
        return Err(StackError::EmptyInput("no assets to stack".to_string()));
    }

    info!(
        variant = variant.name(),
        items = grouped.len(),
        times = grouped.times().len(),
        tiles = grouped.tile_ids().len(),
        assets = plans.len(),
        "Stacking items"
    );

    let mut zones = Vec::new();
    for (crs, tiles) in split_zones(grouped, &plans, variant, &conventions) {
        let zone = grouped.select_tiles(&tiles);
        debug!(crs = %crs, tiles = tiles.len(), times = zone.times().len(), "Stacking zone");
        match stack_zone(&zone, crs, &plans, opener, variant, params, &conventions)? {
            Some(cube) => zones.push(cube),
            None => warn!(crs = %crs, "Zone does not overlap the requested area; skipping"),
        }
    }
    if zones.is_empty() {
        warn!("No data within the requested area");
        return Ok(None);
    }

    let target = zone_target_grid(
        &zones,
        params.crs,
        &params.bbox,
        params.spatial_res,
        params.tile_size,
    )?;
    let interpolation = if plans.iter().any(|p| p.categorical) {
        InterpolationMethod::Nearest
    } else {
        params.interpolation
    };
    let mut cube = merge_utm_zones(zones, Some(&target), interpolation)?;
    if params.add_angles {
        add_angles(&mut cube, grouped, opener, params.tile_size)?;
    }

    cube.attrs.insert(
        STAC_ITEM_IDS_ATTR.to_string(),
        json!(grouped.item_ids_by_time()),
    );
    cube.set_grid_mapping_attrs();

    let (height, width) = cube.grid.shape();
    info!(
        times = cube.times.len(),
        height = height,
        width = width,
        variables = cube.variables.len(),
        "Stack complete"
    );
    Ok(Some(cube))
}

fn plan_assets(
    grouped: &GroupedItems,
    variant: &dyn StackVariant,
    params: &StackParams,
    conventions: &ItemConventions,
) -> Result<Vec<AssetPlan>> {
    let Some(first) = grouped.items().next() else {
        return Ok(Vec::new());
    };
    let names = match &params.asset_names {
        Some(names) => names.clone(),
        None => variant.default_asset_names(first),
    };
    let requested = resolution_in_meters(params.spatial_res, params.crs);
    let zone_hint = first
        .native_crs(&conventions.crs_key)
        .unwrap_or(params.crs);

    let mut plans = Vec::with_capacity(names.len());
    for name in names {
        let native = variant
            .asset_key(first, &name, requested)
            .and_then(|key| first.assets.get(&key))
            .and_then(|asset| {
                RasterInfo::from_asset(first, asset, &conventions.crs_key).spatial_resolution
            });
        let key_res =
            variant.canvas_resolution(params.spatial_res, params.crs, zone_hint, native);
        let key = variant
            .asset_key(first, &name, key_res)
            .unwrap_or_else(|| name.clone());

        let radiometry = resolve_radiometry(grouped.items(), &key, &conventions.crs_key)?;
        let fill_value = radiometry
            .as_ref()
            .and_then(|r| r.nodata)
            .map(|n| n as f32)
            .unwrap_or(f32::NAN);
        let format = first
            .assets
            .get(&key)
            .map(|a| FormatId::detect(a.media_type.as_deref(), &a.href))
            .unwrap_or(FormatId::Unknown);
        let categorical = variant.is_categorical(&name);

        debug!(asset = %name, key = %key, res = key_res, format = %format, "Planned asset");
        plans.push(AssetPlan {
            key_res,
            native_res: native,
            radiometry,
            fill_value,
            categorical,
            interpolation: if categorical {
                InterpolationMethod::Nearest
            } else {
                params.interpolation
            },
            execution_mode: variant.execution_mode(format),
            name,
        });
    }
    Ok(plans)
}

/// Native CRS of an item, taken from the first planned asset declaring one.
fn native_crs(
    item: &Item,
    plans: &[AssetPlan],
    variant: &dyn StackVariant,
    conventions: &ItemConventions,
) -> Option<CrsCode> {
    plans
        .iter()
        .filter_map(|plan| variant.asset_key(item, &plan.name, plan.key_res))
        .filter_map(|key| item.assets.get(&key))
        .find_map(|asset| RasterInfo::from_asset(item, asset, &conventions.crs_key).crs)
        .or_else(|| item.native_crs(&conventions.crs_key))
}

/// Tile indices per native CRS, in order of first appearance.
fn split_zones(
    grouped: &GroupedItems,
    plans: &[AssetPlan],
    variant: &dyn StackVariant,
    conventions: &ItemConventions,
) -> Vec<(CrsCode, Vec<usize>)> {
    let mut zones: Vec<(CrsCode, Vec<usize>)> = Vec::new();
    for (tile, tile_id) in grouped.tile_ids().iter().enumerate() {
        let Some(item) = grouped.first_item_for_tile(tile) else {
            continue;
        };
        let Some(crs) = native_crs(item, plans, variant, conventions) else {
            error!(tile = %tile_id, item_id = %item.id, "Tile has no native CRS; skipping");
            continue;
        };
        match zones.iter_mut().find(|(c, _)| *c == crs) {
            Some((_, tiles)) => tiles.push(tile),
            None => zones.push((crs, vec![tile])),
        }
    }
    zones
}

fn bbox_in(bbox: &BoundingBox, src: CrsCode, dst: CrsCode) -> Result<BoundingBox> {
    if src == dst {
        return Ok(*bbox);
    }
    Ok(projection::reproject_bbox(bbox, src, dst, 0.0)?)
}

/// Union of the item footprints of `plan`'s asset in `crs`.
fn footprint(
    zone: &GroupedItems,
    plan: &AssetPlan,
    crs: CrsCode,
    variant: &dyn StackVariant,
    conventions: &ItemConventions,
) -> Result<Option<BoundingBox>> {
    let mut boxes = Vec::new();
    for item in zone.items() {
        let declared = variant
            .asset_key(item, &plan.name, plan.key_res)
            .and_then(|key| item.assets.get(&key))
            .map(|asset| RasterInfo::from_asset(item, asset, &conventions.crs_key))
            .filter(|info| info.crs.map_or(true, |c| c == crs))
            .and_then(|info| info.proj_bbox);
        let bbox = match declared {
            Some(bbox) => bbox,
            None => bbox_in(&item.bbox, CrsCode::Epsg4326, crs)?,
        };
        boxes.push(bbox);
    }
    Ok(BoundingBox::union_all(&boxes))
}

#[allow(clippy::too_many_arguments)]
fn stack_zone(
    zone: &GroupedItems,
    crs: CrsCode,
    plans: &[AssetPlan],
    opener: &dyn AssetOpener,
    variant: &dyn StackVariant,
    params: &StackParams,
    conventions: &ItemConventions,
) -> Result<Option<RasterCube>> {
    let target_bbox = projection::reproject_bbox_with(
        &params.bbox,
        params.crs,
        crs,
        params.bbox_buffer,
        params.densify_points,
    )?;

    let mut cubes: Vec<(InterpolationMethod, RasterCube)> = Vec::with_capacity(plans.len());
    for plan in plans {
        let Some(items_bbox) = footprint(zone, plan, crs, variant, conventions)? else {
            continue;
        };
        let spatial_res =
            variant.canvas_resolution(params.spatial_res, params.crs, crs, plan.native_res);
        let canvas = match allocate_canvas(
            &plan.name,
            &items_bbox,
            &target_bbox,
            spatial_res,
            crs,
            zone.times(),
            params.tile_size,
            plan.fill_value,
        ) {
            Ok(canvas) => canvas,
            Err(StackError::Canvas(reason)) => {
                warn!(crs = %crs, asset = %plan.name, reason = %reason, "Skipping asset in zone");
                continue;
            }
            Err(e) => return Err(e),
        };

        fill_canvas(&canvas, zone, plan, opener, variant, params)?;

        let mut cube = canvas.into_cube()?;
        if params.apply_scaling {
            if let (Some(radiometry), Some(var)) =
                (&plan.radiometry, cube.variables.get_mut(&plan.name))
            {
                apply_radiometry(var, radiometry, !plan.categorical);
            }
        }
        cubes.push((plan.interpolation, cube));
    }

    let Some(finest) = cubes
        .iter()
        .map(|(_, c)| &c.grid)
        .min_by(|a, b| a.x_res.total_cmp(&b.x_res))
        .cloned()
    else {
        return Ok(None);
    };

    let cubes = cubes
        .into_iter()
        .map(|(interpolation, cube)| resample_soft(cube, &finest, None, interpolation))
        .collect::<Result<Vec<_>>>()?;
    merge_assets(cubes, Some(&finest), params.interpolation).map(Some)
}

fn fill_canvas(
    canvas: &Canvas,
    zone: &GroupedItems,
    plan: &AssetPlan,
    opener: &dyn AssetOpener,
    variant: &dyn StackVariant,
    params: &StackParams,
) -> Result<()> {
    let options = OpenOptions {
        tile_size: params.tile_size,
        execution_mode: plan.execution_mode,
        spatial_res: Some(canvas.grid().x_res),
    };
    let step = |t: usize| fill_time_step(canvas, zone, t, plan, &options, opener, variant);

    let n_times = zone.times().len();
    if params.parallel && plan.execution_mode == ExecutionMode::Parallel {
        (0..n_times).into_par_iter().try_for_each(step)
    } else {
        (0..n_times).try_for_each(step)
    }
}

#[allow(clippy::too_many_arguments)]
fn fill_time_step(
    canvas: &Canvas,
    zone: &GroupedItems,
    t: usize,
    plan: &AssetPlan,
    options: &OpenOptions,
    opener: &dyn AssetOpener,
    variant: &dyn StackVariant,
) -> Result<()> {
    for (tile, tile_id) in zone.tile_ids().iter().enumerate() {
        let slots = zone.items_at(t, tile);
        if slots.is_empty() {
            continue;
        }
        match stack_tile(canvas, t, &slots, plan, options, opener, variant) {
            Ok(()) => {}
            Err(e) if e.is_tile_local() => {
                error!(tile = %tile_id, asset = %plan.name, error = %e, "Skipping tile");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Open one asset of one item and crop it to the canvas.
fn open_item(
    canvas: &Canvas,
    item: &Item,
    plan: &AssetPlan,
    options: &OpenOptions,
    opener: &dyn AssetOpener,
    variant: &dyn StackVariant,
) -> Result<Option<RasterCube>> {
    let Some(key) = variant.asset_key(item, &plan.name, plan.key_res) else {
        debug!(item_id = %item.id, asset = %plan.name, "Item lacks asset");
        return Ok(None);
    };
    let open_failed = |source: anyhow::Error| StackError::OpenFailed {
        item_id: item.id.clone(),
        asset: key.clone(),
        source,
    };

    let access = AssetAccessParams::from_item(item, &key)
        .map_err(|e| open_failed(e.into()))?
        .renamed(plan.name.clone());
    let cube = opener.open(&access, options).map_err(open_failed)?;
    if cube.variable(&plan.name).is_none() {
        return Err(open_failed(anyhow::anyhow!(
            "opened cube has no variable {}",
            plan.name
        )));
    }

    let clip = bbox_in(&canvas.grid().bbox(), canvas.grid().crs, cube.grid.crs)?;
    cube.clip(&clip)
}

fn stack_tile(
    canvas: &Canvas,
    t: usize,
    slots: &[&Item],
    plan: &AssetPlan,
    options: &OpenOptions,
    opener: &dyn AssetOpener,
    variant: &dyn StackVariant,
) -> Result<()> {
    let mut parts = Vec::with_capacity(slots.len());
    for item in slots {
        match open_item(canvas, item, plan, options, opener, variant) {
            Ok(Some(cube)) => parts.push(cube),
            Ok(None) => {}
            Err(e) if e.is_tile_local() => {
                error!(item_id = %item.id, asset = %plan.name, error = %e, "Failed to open item");
            }
            Err(e) => return Err(e),
        }
    }
    let Some(reference) = parts.first().map(|c| c.grid.clone()) else {
        return Ok(());
    };

    let parts = parts
        .into_iter()
        .map(|part| resample_soft(part, &reference, Some(plan.fill_value), plan.interpolation))
        .collect::<Result<Vec<_>>>()?;
    let tile = mosaic_take_first(parts, Some(plan.fill_value))?;

    place_tile(canvas, t, tile, plan)
}

/// Resample a tile onto its window of the canvas and merge it in.
fn place_tile(canvas: &Canvas, t: usize, tile: RasterCube, plan: &AssetPlan) -> Result<()> {
    let grid: &GridMapping = canvas.grid();
    let tile_bbox = bbox_in(&tile.grid.bbox(), tile.grid.crs, grid.crs)?;
    let Some(window) = grid.window_for(&tile_bbox) else {
        return Ok(());
    };
    let target = grid.subgrid(&window)?;

    let resampled = resample_soft(tile, &target, Some(plan.fill_value), plan.interpolation)?;
    let plane = resampled
        .variable(&plan.name)
        .and_then(|v| v.plane(0))
        .ok_or_else(|| StackError::resampling(format!("tile lost variable {}", plan.name)))?;
    canvas.merge_window(t, &window, plane)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::GenericVariant;
    use crate::grouping::group_by_solar_day;
    use crate::types::Variable;
    use chrono::{TimeZone, Utc};
    use stac_common::raster::raster_bands_v1;
    use stac_common::Asset;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const UTM32: CrsCode = CrsCode::Utm {
        zone: 32,
        north: true,
    };

    fn tile_bbox() -> BoundingBox {
        BoundingBox::new(600_000.0, 4_999_900.0, 600_100.0, 5_000_000.0)
    }

    fn item(id: &str, day: u32) -> Item {
        let mut asset = Asset::new(format!("s3://bucket/{}/B04.tif", id))
            .with_field("proj:bbox", json!(tile_bbox().to_array()));
        asset.extra_fields.extend(raster_bands_v1(0.0, 1.0, 0.0));
        Item::new(
            id,
            BoundingBox::new(10.27, 45.13, 10.29, 45.14),
            Utc.with_ymd_and_hms(2024, 6, day, 10, 0, 0).unwrap(),
        )
        .with_property("proj:code", json!("EPSG:32632"))
        .with_property("grid:code", json!("MGRS-32TNR"))
        .with_asset("B04", asset)
    }

    /// Item "a" is nodata in its top row, every other pixel is `value`.
    fn opener(params: &AssetAccessParams, _options: &OpenOptions) -> anyhow::Result<RasterCube> {
        let grid = GridMapping::new(UTM32, 600_000.0, 5_000_000.0, 10.0, 10, 10, 1024)?;
        let value = match params.item_id.as_str() {
            "a" => 3.0,
            "b" => 7.0,
            other => anyhow::bail!("no data for {}", other),
        };
        let mut data = vec![value; 100];
        if params.item_id == "a" {
            data[..10].fill(0.0);
        }
        let cube = RasterCube::new(grid).with_variable(&params.name, Variable::spatial(10, 10, data)?)?;
        Ok(cube)
    }

    fn params() -> StackParams {
        StackParams::new(tile_bbox(), UTM32, 10.0).with_asset_names(["B04"])
    }

    #[test]
    fn test_empty_grouping_yields_none() {
        let grouped = group_by_solar_day(&[]);
        let out = stack(&grouped, &opener, &GenericVariant, &params()).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_slots_mosaicked_take_first() {
        let grouped = group_by_solar_day(&[item("a", 1), item("b", 1)]);
        let cube = stack(&grouped, &opener, &GenericVariant, &params())
            .unwrap()
            .unwrap();

        assert_eq!(cube.times.len(), 1);
        assert_eq!(cube.grid.shape(), (10, 10));
        let var = cube.variable("B04").unwrap();
        assert_eq!(&var.data[..10], &[7.0; 10]);
        assert!(var.data[10..].iter().all(|v| *v == 3.0));

        let ids = &cube.attrs[STAC_ITEM_IDS_ATTR];
        let ids = ids.as_object().unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids.values().next().unwrap(), &json!(["a", "b"]));
        assert!(cube.attrs.contains_key("spatial_ref"));
    }

    #[test]
    fn test_nodata_masked_when_no_other_slot() {
        let cube = stack_items(vec![item("a", 1)], &opener, &GenericVariant, &params())
            .unwrap()
            .unwrap();
        let var = cube.variable("B04").unwrap();
        assert!(var.data[..10].iter().all(|v| v.is_nan()));

        let raw = stack_items(
            vec![item("a", 1)],
            &opener,
            &GenericVariant,
            &params().with_scaling(false),
        )
        .unwrap()
        .unwrap();
        assert_eq!(&raw.variable("B04").unwrap().data[..10], &[0.0; 10]);
    }

    #[test]
    fn test_failing_item_is_skipped() {
        let calls = AtomicUsize::new(0);
        let flaky = |p: &AssetAccessParams, o: &OpenOptions| {
            calls.fetch_add(1, Ordering::SeqCst);
            if p.item_id == "b" {
                anyhow::bail!("connection reset");
            }
            opener(p, o)
        };
        let grouped = group_by_solar_day(&[item("a", 1), item("b", 2)]);
        let cube = stack(&grouped, &flaky, &GenericVariant, &params().with_parallel(false))
            .unwrap()
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cube.times.len(), 2);
        let var = cube.variable("B04").unwrap();
        let second_day = var.plane(1).unwrap();
        assert!(second_day.iter().all(|v| v.is_nan()));
        assert_eq!(var.plane(0).unwrap()[50], 3.0);
    }

    #[test]
    fn test_disjoint_request_yields_none() {
        let far = BoundingBox::new(700_000.0, 4_000_000.0, 700_100.0, 4_000_100.0);
        let params = StackParams::new(far, UTM32, 10.0).with_asset_names(["B04"]);
        let out = stack_items(vec![item("a", 1)], &opener, &GenericVariant, &params).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let mut params = params();
        params.spatial_res = 0.0;
        let err = stack_items(vec![item("a", 1)], &opener, &GenericVariant, &params).unwrap_err();
        assert!(matches!(err, StackError::Config(_)));
    }
}
