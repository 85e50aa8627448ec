//! Sun and viewing angles of Sentinel-2 granules.
//!
//! Every granule ships its angles on a coarse 5 km grid. Per tile and time
//! step the grids of the contributing items are mosaicked take-first and
//! resampled bilinearly onto a 5 km grid spanning the cube; the tiles are
//! then mosaicked take-first as well. The result is attached as
//! `solar_angle` `(time, angle, angle_y, angle_x)` and `viewing_angle`
//! `(time, angle, band, angle_y, angle_x)`, with `angle` running over
//! zenith and azimuth.

use chrono::NaiveDateTime;
use serde_json::json;
use stac_common::{build_grid, GridMapping, Item, SpatialRes};
use tracing::{debug, error, info, warn};

use crate::accessor::{AssetOpener, DEG_TO_METER, SENTINEL2_L1C_BANDS};
use crate::config::InterpolationMethod;
use crate::error::{Result, StackError};
use crate::grouping::GroupedItems;
use crate::mosaic::mosaic_take_first;
use crate::resample::resample_soft;
use crate::types::{Dim, RasterCube, Variable};

/// Native spacing of Sentinel-2 angle grids.
pub const ANGLE_RES_METERS: f64 = 5000.0;

pub const SOLAR_ANGLE: &str = "solar_angle";
pub const VIEWING_ANGLE: &str = "viewing_angle";
pub const SOLAR_ZENITH: &str = "solar_angle_zenith";
pub const SOLAR_AZIMUTH: &str = "solar_angle_azimuth";

/// Labels of the `angle` dimension.
pub const ANGLE_LABELS: [&str; 2] = ["zenith", "azimuth"];

/// Asset the angle grids are read from.
pub const GRANULE_METADATA: &str = "granule_metadata";

pub fn viewing_zenith(band: &str) -> String {
    format!("viewing_angle_zenith_{}", band)
}

pub fn viewing_azimuth(band: &str) -> String {
    format!("viewing_angle_azimuth_{}", band)
}

/// Spectral bands of `cube` that have viewing angles.
pub fn angle_bands(cube: &RasterCube) -> Vec<String> {
    cube.variables
        .keys()
        .filter(|name| SENTINEL2_L1C_BANDS.contains(&name.as_str()))
        .cloned()
        .collect()
}

/// A 5 km grid over the extent of `grid`, in the same CRS.
///
/// For geographic grids the spacing is converted to degrees at the
/// grid's central latitude.
pub fn angle_target_grid(grid: &GridMapping, tile_size: usize) -> Result<GridMapping> {
    let bbox = grid.bbox();
    let res = if grid.crs.is_geographic() {
        let lat = (bbox.min_y + bbox.max_y) / 2.0;
        SpatialRes::from((
            ANGLE_RES_METERS / (DEG_TO_METER * lat.to_radians().cos()),
            ANGLE_RES_METERS / DEG_TO_METER,
        ))
    } else {
        SpatialRes::from(ANGLE_RES_METERS)
    };
    Ok(build_grid(&bbox, res, grid.crs, tile_size)?)
}

/// Stack the angles of `grouped` and attach them to `cube`.
///
/// Items whose angles cannot be read are logged and skipped. Without any
/// angle grid the cube is left unchanged.
pub fn add_angles(
    cube: &mut RasterCube,
    grouped: &GroupedItems,
    opener: &dyn AssetOpener,
    tile_size: usize,
) -> Result<()> {
    let bands = angle_bands(cube);
    let target = angle_target_grid(&cube.grid, tile_size)?;
    let mut names = vec![SOLAR_ZENITH.to_string(), SOLAR_AZIMUTH.to_string()];
    for band in &bands {
        names.push(viewing_zenith(band));
        names.push(viewing_azimuth(band));
    }

    let mut tiles = Vec::new();
    for (tile, tile_id) in grouped.tile_ids().iter().enumerate() {
        match angle_tile(grouped, tile, &cube.times, &bands, &names, &target, opener) {
            Ok(Some(angles)) => tiles.push(angles),
            Ok(None) => debug!(tile = %tile_id, "No angle grids for tile"),
            Err(e) if e.is_tile_local() => {
                error!(tile = %tile_id, error = %e, "Skipping angles of tile");
            }
            Err(e) => return Err(e),
        }
    }
    if tiles.is_empty() {
        warn!("No angle grids available; angles not added");
        return Ok(());
    }

    let angles = mosaic_take_first(tiles, None)?;
    attach_angles(cube, &angles, &bands)?;

    let (height, width) = target.shape();
    info!(bands = bands.len(), height, width, "Added sun and viewing angles");
    Ok(())
}

fn open_item_angles(
    item: &Item,
    bands: &[String],
    opener: &dyn AssetOpener,
) -> Result<Option<RasterCube>> {
    opener
        .open_angles(item, bands)
        .map_err(|source| StackError::OpenFailed {
            item_id: item.id.clone(),
            asset: GRANULE_METADATA.to_string(),
            source,
        })
}

/// Angles of one tile at every time of `times`, on `target`.
fn angle_tile(
    grouped: &GroupedItems,
    tile: usize,
    times: &[NaiveDateTime],
    bands: &[String],
    names: &[String],
    target: &GridMapping,
    opener: &dyn AssetOpener,
) -> Result<Option<RasterCube>> {
    let plane = target.len();
    let mut series: Vec<Vec<f32>> = vec![Vec::with_capacity(times.len() * plane); names.len()];
    let mut found = false;

    for time in times {
        let slots = grouped
            .times()
            .iter()
            .position(|t| t == time)
            .map(|t| grouped.items_at(t, tile))
            .unwrap_or_default();

        let mut parts = Vec::with_capacity(slots.len());
        for item in slots {
            match open_item_angles(item, bands, opener) {
                Ok(Some(angles)) => parts.push(angles),
                Ok(None) => {}
                Err(e) => error!(item_id = %item.id, error = %e, "Failed to read angles"),
            }
        }

        let step = match parts.first().map(|p| p.grid.clone()) {
            Some(reference) => {
                let parts = parts
                    .into_iter()
                    .map(|p| resample_soft(p, &reference, None, InterpolationMethod::Bilinear))
                    .collect::<Result<Vec<_>>>()?;
                let mosaic = mosaic_take_first(parts, None)?;
                Some(resample_soft(mosaic, target, None, InterpolationMethod::Bilinear)?)
            }
            None => None,
        };
        found |= step.is_some();

        for (name, values) in names.iter().zip(series.iter_mut()) {
            match step.as_ref().and_then(|s| s.variable(name)).and_then(|v| v.plane(0)) {
                Some(data) => values.extend_from_slice(data),
                None => values.extend(std::iter::repeat(f32::NAN).take(plane)),
            }
        }
    }

    if !found {
        return Ok(None);
    }
    let (height, width) = target.shape();
    let mut cube = RasterCube::new(target.clone()).with_times(times.to_vec());
    for (name, values) in names.iter().zip(series) {
        cube.insert_variable(name.clone(), Variable::cube(times.len(), height, width, values)?)?;
    }
    Ok(Some(cube))
}

fn push_plane(out: &mut Vec<f32>, angles: &RasterCube, name: &str, t: usize) {
    let plane = angles.grid.len();
    match angles.variable(name).and_then(|v| v.plane(t)) {
        Some(data) => out.extend_from_slice(data),
        None => out.extend(std::iter::repeat(f32::NAN).take(plane)),
    }
}

/// Add `solar_angle` and `viewing_angle` built from the flat angle variables.
fn attach_angles(cube: &mut RasterCube, angles: &RasterCube, bands: &[String]) -> Result<()> {
    let n_times = cube.times.len();
    let (height, width) = angles.grid.shape();
    let grid_attrs = |var: Variable| {
        var.with_attr("angle", json!(ANGLE_LABELS))
            .with_attr("angle_x", json!(angles.grid.x_coords()))
            .with_attr("angle_y", json!(angles.grid.y_coords()))
            .with_attr("crs", json!(angles.grid.crs.to_string()))
            .with_attr("units", json!("degrees"))
    };

    let mut solar = Vec::with_capacity(n_times * 2 * angles.grid.len());
    for t in 0..n_times {
        push_plane(&mut solar, angles, SOLAR_ZENITH, t);
        push_plane(&mut solar, angles, SOLAR_AZIMUTH, t);
    }
    let solar = Variable::new(
        vec![
            Dim::Time,
            Dim::Named("angle".to_string()),
            Dim::Named("angle_y".to_string()),
            Dim::Named("angle_x".to_string()),
        ],
        vec![n_times, 2, height, width],
        solar,
    )?;
    cube.insert_variable(SOLAR_ANGLE, grid_attrs(solar))?;

    if bands.is_empty() {
        debug!("No spectral bands; viewing angles skipped");
        return Ok(());
    }
    let mut viewing = Vec::with_capacity(n_times * 2 * bands.len() * angles.grid.len());
    for t in 0..n_times {
        for band in bands {
            push_plane(&mut viewing, angles, &viewing_zenith(band), t);
        }
        for band in bands {
            push_plane(&mut viewing, angles, &viewing_azimuth(band), t);
        }
    }
    let viewing = Variable::new(
        vec![
            Dim::Time,
            Dim::Named("angle".to_string()),
            Dim::Named("band".to_string()),
            Dim::Named("angle_y".to_string()),
            Dim::Named("angle_x".to_string()),
        ],
        vec![n_times, 2, bands.len(), height, width],
        viewing,
    )?;
    cube.insert_variable(VIEWING_ANGLE, grid_attrs(viewing).with_attr("band", json!(bands)))?;
    Ok(())
}
