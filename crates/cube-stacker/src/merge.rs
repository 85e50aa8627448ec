//! Assembly of per-asset and per-zone cubes into one cube.

use stac_common::{build_grid, BoundingBox, CrsCode, GridMapping, SpatialRes};
use tracing::debug;

use crate::config::InterpolationMethod;
use crate::error::{Result, StackError};
use crate::mosaic::{mosaic_take_first, mosaic_take_first_across_time};
use crate::resample::resample_soft;
use crate::types::RasterCube;

/// Relative tolerance when comparing resolutions.
const RES_TOLERANCE: f64 = 1e-9;

fn same_res(a: (f64, f64), b: (f64, f64)) -> bool {
    (a.0 - b.0).abs() <= RES_TOLERANCE * a.0.abs().max(1.0)
        && (a.1 - b.1).abs() <= RES_TOLERANCE * a.1.abs().max(1.0)
}

/// Merge the variables of cubes sharing a grid; later names overwrite earlier ones.
pub fn union_cubes(cubes: Vec<RasterCube>) -> Result<RasterCube> {
    let mut cubes = cubes.into_iter();
    let mut out = cubes
        .next()
        .ok_or_else(|| StackError::EmptyInput("no cubes to merge".to_string()))?;
    for cube in cubes {
        if cube.times != out.times {
            return Err(StackError::coordinate_mismatch(
                "cubes to merge have different time axes",
            ));
        }
        for (name, var) in cube.variables {
            out.insert_variable(name, var)?;
        }
        for (key, value) in cube.attrs {
            out.attrs.entry(key).or_insert(value);
        }
    }
    Ok(out)
}

/// Target grid for merging UTM zones.
///
/// A zone already in `crs` at the requested resolution is adopted as is;
/// otherwise a fresh grid is built over `bbox`.
pub fn zone_target_grid(
    zones: &[RasterCube],
    crs: CrsCode,
    bbox: &BoundingBox,
    spatial_res: impl Into<SpatialRes>,
    tile_size: usize,
) -> Result<GridMapping> {
    let res = spatial_res.into();
    if let Some(zone) = zones
        .iter()
        .find(|z| z.grid.crs == crs && same_res(z.grid.resolution(), res.xy()))
    {
        debug!(crs = %crs, "Adopting zone grid as target");
        return Ok(zone.grid.with_tile_size(tile_size));
    }
    Ok(build_grid(bbox, res, crs, tile_size)?)
}

/// Resample every zone onto one grid and mosaic them in zone order.
///
/// Without an explicit `target`, the first zone's grid is used. Zones
/// covering different time steps are joined along the union of their
/// time axes.
pub fn merge_utm_zones(
    zones: Vec<RasterCube>,
    target: Option<&GridMapping>,
    interpolation: InterpolationMethod,
) -> Result<RasterCube> {
    let target = match target {
        Some(grid) => grid.clone(),
        None => zones
            .first()
            .map(|z| z.grid.clone())
            .ok_or_else(|| StackError::EmptyInput("no UTM zones to merge".to_string()))?,
    };

    let zones = zones
        .into_iter()
        .map(|zone| {
            debug!(from = %zone.grid.crs, to = %target.crs, "Merging UTM zone");
            resample_soft(zone, &target, None, interpolation)
        })
        .collect::<Result<Vec<_>>>()?;

    let aligned = zones.windows(2).all(|w| w[0].times == w[1].times);
    if aligned {
        mosaic_take_first(zones, None)
    } else {
        mosaic_take_first_across_time(zones)
    }
}

/// Merge per-asset cubes that may differ in resolution.
///
/// Cubes are grouped by resolution and unioned per group; each group is
/// then resampled onto `target` (by default the coarsest grid) and the
/// groups are unioned. Cells outside a group's coverage become NaN.
pub fn merge_assets(
    assets: Vec<RasterCube>,
    target: Option<&GridMapping>,
    interpolation: InterpolationMethod,
) -> Result<RasterCube> {
    if assets.is_empty() {
        return Err(StackError::EmptyInput("no assets to merge".to_string()));
    }

    let mut groups: Vec<((f64, f64), Vec<RasterCube>)> = Vec::new();
    for cube in assets {
        let res = cube.grid.resolution();
        match groups.iter_mut().find(|(r, _)| same_res(*r, res)) {
            Some((_, members)) => members.push(cube),
            None => groups.push((res, vec![cube])),
        }
    }

    let mut unions = Vec::with_capacity(groups.len());
    for (_, members) in groups {
        let reference = members[0].grid.clone();
        let members = members
            .into_iter()
            .map(|m| resample_soft(m, &reference, None, interpolation))
            .collect::<Result<Vec<_>>>()?;
        unions.push(union_cubes(members)?);
    }

    if unions.len() == 1 && target.is_none() {
        return union_cubes(unions);
    }

    let target = match target {
        Some(grid) => grid.clone(),
        None => unions
            .iter()
            .map(|u| &u.grid)
            .fold(None::<&GridMapping>, |best, g| match best {
                Some(b) if b.x_res >= g.x_res => Some(b),
                _ => Some(g),
            })
            .cloned()
            .ok_or_else(|| StackError::EmptyInput("no assets to merge".to_string()))?,
    };
    debug!(groups = unions.len(), res = ?target.resolution(), "Merging asset groups");

    let resampled = unions
        .into_iter()
        .map(|u| resample_soft(u, &target, None, interpolation))
        .collect::<Result<Vec<_>>>()?;
    union_cubes(resampled)
}
