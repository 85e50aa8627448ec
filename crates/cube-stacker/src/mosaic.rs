//! Take-first mosaicking.
//!
//! Overlapping cubes on one grid collapse into a single cube by taking, per
//! pixel, the value of the first cube (in input order) that is valid there.
//! A value is invalid when it is NaN or equals the fill value.

use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use rayon::prelude::*;
use stac_common::grid::DEFAULT_GRID_TOLERANCE;
use tracing::debug;

use crate::error::{Result, StackError};
use crate::types::{RasterCube, Variable};

#[inline]
fn is_valid(value: f32, fill: Option<f32>) -> bool {
    match fill {
        Some(f) if !f.is_nan() => !value.is_nan() && value != f,
        _ => !value.is_nan(),
    }
}

/// Take-first over one variable present in several cubes.
fn mosaic_variable(name: &str, layers: &[&Variable], fill: Option<f32>) -> Result<Variable> {
    let first = layers[0];
    if layers.len() == 1 {
        return Ok(first.clone());
    }
    if let Some(other) = layers.iter().find(|v| v.shape != first.shape) {
        return Err(StackError::coordinate_mismatch(format!(
            "variable {} has shapes {:?} and {:?}",
            name, first.shape, other.shape
        )));
    }

    let width = first.shape.last().copied().unwrap_or(1).max(1);
    let mut data = first.data.clone();
    data.par_chunks_mut(width)
        .enumerate()
        .for_each(|(chunk, out)| {
            let start = chunk * width;
            for (i, cell) in out.iter_mut().enumerate() {
                if is_valid(*cell, fill) {
                    continue;
                }
                if let Some(v) = layers[1..]
                    .iter()
                    .map(|layer| layer.data[start + i])
                    .find(|v| is_valid(*v, fill))
                {
                    *cell = v;
                }
            }
        });

    let mut out = Variable::new(first.dims.clone(), first.shape.clone(), data)?;
    out.attrs = first.attrs.clone();
    Ok(out)
}

/// Merge cubes sharing one grid and time axis by first valid pixel.
///
/// Spatial variables are mosaicked among the cubes that carry them;
/// non-spatial variables and attributes come from the first cube. A single
/// cube is returned as is.
pub fn mosaic_take_first(cubes: Vec<RasterCube>, fill_value: Option<f32>) -> Result<RasterCube> {
    let mut cubes = cubes;
    match cubes.len() {
        0 => return Err(StackError::EmptyInput("no cubes to mosaic".to_string())),
        1 => return Ok(cubes.remove(0)),
        _ => {}
    }

    let first = &cubes[0];
    for (i, cube) in cubes.iter().enumerate().skip(1) {
        if !cube.grid.is_close(&first.grid, DEFAULT_GRID_TOLERANCE) {
            return Err(StackError::coordinate_mismatch(format!(
                "cube {} is not on the grid of the first cube",
                i
            )));
        }
        if cube.times != first.times {
            return Err(StackError::coordinate_mismatch(format!(
                "cube {} has a different time axis",
                i
            )));
        }
    }

    let mut names: Vec<&String> = Vec::new();
    for cube in &cubes {
        for (name, _) in cube.spatial_variables() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    debug!(cubes = cubes.len(), variables = names.len(), "Mosaicking");

    let mut out = RasterCube::new(first.grid.clone()).with_times(first.times.clone());
    out.attrs = first.attrs.clone();
    for (name, var) in first.variables.iter().filter(|(_, v)| !v.is_spatial()) {
        out.variables.insert(name.clone(), var.clone());
    }
    for name in names {
        let layers: Vec<&Variable> = cubes.iter().filter_map(|c| c.variable(name)).collect();
        let var = mosaic_variable(name, &layers, fill_value)?;
        out.insert_variable(name.clone(), var)?;
    }
    Ok(out)
}

/// Merge cubes whose time axes differ.
///
/// The output time axis is the sorted union of the inputs. Each step is
/// taken from the cubes defining it, mosaicked take-first (NaN as fill)
/// when more than one does. A spatial variable missing from every cube of
/// a step is NaN there. Slices must share their spatial coordinates.
pub fn mosaic_take_first_across_time(cubes: Vec<RasterCube>) -> Result<RasterCube> {
    if cubes.is_empty() {
        return Err(StackError::EmptyInput("no cubes to mosaic".to_string()));
    }

    // one template plane per spatial variable, kept for its dims and attrs
    let mut templates: Vec<(String, Variable)> = Vec::new();
    for cube in &cubes {
        for (name, var) in cube.spatial_variables() {
            if templates.iter().any(|(n, _)| n == name) {
                continue;
            }
            let plane = if var.has_time() { var.time_slice(0)? } else { var.clone() };
            templates.push((name.clone(), plane));
        }
    }

    let times: BTreeSet<NaiveDateTime> = cubes.iter().flat_map(|c| c.times.iter().copied()).collect();
    let mut slices = Vec::with_capacity(times.len());
    for time in times {
        let mut parts = Vec::new();
        for cube in &cubes {
            if let Some(t) = cube.times.iter().position(|x| *x == time) {
                parts.push(cube.time_slice(t)?);
            }
        }
        let mut slice = mosaic_take_first(parts, None)?;
        for (name, template) in &templates {
            if slice.variables.contains_key(name) {
                continue;
            }
            debug!(variable = %name, time = %time, "Padding missing variable with NaN");
            let mut empty =
                Variable::filled(template.dims.clone(), template.shape.clone(), f32::NAN)?;
            empty.attrs = template.attrs.clone();
            slice.insert_variable(name.clone(), empty)?;
        }
        slices.push((time, slice));
    }
    RasterCube::concat_time(slices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use stac_common::{CrsCode, GridMapping};

    const NAN: f32 = f32::NAN;

    fn grid(width: usize, height: usize) -> GridMapping {
        GridMapping::new(
            CrsCode::Utm {
                zone: 32,
                north: true,
            },
            600_000.0,
            5_000_000.0,
            10.0,
            width,
            height,
            1024,
        )
        .unwrap()
    }

    fn spatial(name: &str, data: Vec<f32>) -> RasterCube {
        RasterCube::new(grid(3, 3))
            .with_variable(name, Variable::spatial(3, 3, data).unwrap())
            .unwrap()
    }

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, d)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn timed(times: Vec<NaiveDateTime>, values: &[f32]) -> RasterCube {
        let data: Vec<f32> = values.iter().flat_map(|v| [*v; 4]).collect();
        RasterCube::new(grid(2, 2))
            .with_times(times.clone())
            .with_variable("B04", Variable::cube(times.len(), 2, 2, data).unwrap())
            .unwrap()
    }

    // ============================================================
    // Spatial mosaics
    // ============================================================

    #[test]
    fn test_single_cube_is_identity() {
        let a = spatial("B04", vec![1.0, NAN, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let out = mosaic_take_first(vec![a.clone()], Some(0.0)).unwrap();
        assert_eq!(out.variables["B04"].data[0], 1.0);
        assert!(out.variables["B04"].data[1].is_nan());
        assert_eq!(out.grid, a.grid);
    }

    #[test]
    fn test_first_valid_pixel_wins() {
        let a = spatial("B04", vec![1.0, 2.0, 3.0, 4.0, 5.0, NAN, 7.0, 8.0, 9.0]);
        let b = spatial(
            "B04",
            vec![NAN, NAN, NAN, NAN, 114.0, 106.0, NAN, NAN, NAN],
        );
        let out = mosaic_take_first(vec![a, b], None).unwrap();
        let data = &out.variables["B04"].data;
        assert_eq!(data[5], 106.0);
        assert_eq!(data[4], 5.0);
        assert_eq!(data[0], 1.0);
    }

    #[test]
    fn test_fill_value_counts_as_invalid() {
        let a = spatial("B04", vec![0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let b = spatial("B04", vec![7.0, 0.0, 9.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let out = mosaic_take_first(vec![a, b], Some(0.0)).unwrap();
        let data = &out.variables["B04"].data;
        assert_eq!(&data[0..3], &[7.0, 0.0, 3.0]);
    }

    #[test]
    fn test_all_invalid_keeps_first_value() {
        let a = spatial("B04", vec![NAN; 9]);
        let b = spatial("B04", vec![NAN; 9]);
        let out = mosaic_take_first(vec![a, b], None).unwrap();
        assert!(out.variables["B04"].data.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_variables_are_unioned() {
        let a = spatial("B04", vec![1.0; 9]);
        let b = spatial("B08", vec![2.0; 9]);
        let out = mosaic_take_first(vec![a, b], None).unwrap();
        assert_eq!(out.variables.len(), 2);
        assert_eq!(out.variables["B08"].data, vec![2.0; 9]);
    }

    #[test]
    fn test_grid_mismatch_rejected() {
        let a = spatial("B04", vec![1.0; 9]);
        let b = RasterCube::new(grid(2, 2))
            .with_variable("B04", Variable::spatial(2, 2, vec![1.0; 4]).unwrap())
            .unwrap();
        assert!(matches!(
            mosaic_take_first(vec![a, b], None),
            Err(StackError::CoordinateMismatch(_))
        ));
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            mosaic_take_first(Vec::new(), None),
            Err(StackError::EmptyInput(_))
        ));
    }

    // ============================================================
    // Across time
    // ============================================================

    #[test]
    fn test_across_time_sorted_union() {
        let a = timed(vec![day(1), day(2), day(3)], &[1.0, NAN, 3.0]);
        let b = timed(vec![day(1), day(2), day(4)], &[10.0, 20.0, 40.0]);

        let out = mosaic_take_first_across_time(vec![a, b]).unwrap();
        assert_eq!(out.times, vec![day(1), day(2), day(3), day(4)]);

        let var = &out.variables["B04"];
        assert_eq!(var.shape, vec![4, 2, 2]);
        assert_eq!(var.plane(0).unwrap(), &[1.0; 4]);
        assert_eq!(var.plane(1).unwrap(), &[20.0; 4]);
        assert_eq!(var.plane(2).unwrap(), &[3.0; 4]);
        assert_eq!(var.plane(3).unwrap(), &[40.0; 4]);
    }

    #[test]
    fn test_across_time_pads_missing_variables() {
        // the first cube lacks B08 entirely
        let a = timed(vec![day(1)], &[1.0]);
        let mut b = timed(vec![day(2)], &[2.0]);
        b.insert_variable("B08", Variable::cube(1, 2, 2, vec![8.0; 4]).unwrap())
            .unwrap();

        let out = mosaic_take_first_across_time(vec![a, b]).unwrap();
        assert_eq!(out.times, vec![day(1), day(2)]);
        let b08 = &out.variables["B08"];
        assert_eq!(b08.shape, vec![2, 2, 2]);
        assert!(b08.plane(0).unwrap().iter().all(|v| v.is_nan()));
        assert_eq!(b08.plane(1).unwrap(), &[8.0; 4]);
        assert_eq!(out.variables["B04"].plane(0).unwrap(), &[1.0; 4]);
    }

    #[test]
    fn test_across_time_requires_same_grid() {
        let a = timed(vec![day(1)], &[1.0]);
        let mut b = timed(vec![day(2)], &[2.0]);
        b.grid.x_min += 10.0;
        assert!(matches!(
            mosaic_take_first_across_time(vec![a, b]),
            Err(StackError::CoordinateMismatch(_))
        ));
    }
}
