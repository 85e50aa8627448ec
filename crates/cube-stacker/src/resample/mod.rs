//! Soft resampling of cubes onto a target grid.
//!
//! Three paths, cheapest first:
//! - the grids already match: the cube is returned as is
//! - same CRS: target pixels map to source pixels through an affine transform
//! - different CRS: every target pixel center is transformed into the source CRS
//!
//! Target cells that land outside the source get the fill value.

pub mod interpolation;

pub use interpolation::{bilinear_interpolate, interpolate, nearest_interpolate};

use nalgebra::{Matrix3, Vector3};
use projection::Transformer;
use rayon::prelude::*;
use stac_common::grid::DEFAULT_GRID_TOLERANCE;
use stac_common::GridMapping;
use tracing::debug;

use crate::config::InterpolationMethod;
use crate::error::{Result, StackError};
use crate::types::{RasterCube, Variable};

/// Affine transform from `(col, row, 1)` pixel-center indices to CRS coordinates.
pub fn pixel_to_crs(grid: &GridMapping) -> Matrix3<f64> {
    Matrix3::new(
        grid.x_res,
        0.0,
        grid.x_min + 0.5 * grid.x_res,
        0.0,
        -grid.y_res,
        grid.y_max - 0.5 * grid.y_res,
        0.0,
        0.0,
        1.0,
    )
}

/// Affine transform from target pixel indices to source pixel indices.
///
/// Both grids must share a CRS.
pub fn affine_pixel_mapping(source: &GridMapping, target: &GridMapping) -> Result<Matrix3<f64>> {
    let crs_to_source = pixel_to_crs(source).try_inverse().ok_or_else(|| {
        StackError::resampling(format!(
            "source grid with resolution {:?} is not invertible",
            source.resolution()
        ))
    })?;
    Ok(crs_to_source * pixel_to_crs(target))
}

/// Fractional source pixel position of every target pixel, row-major.
type PixelMap = Vec<Option<(f64, f64)>>;

fn affine_map(source: &GridMapping, target: &GridMapping) -> Result<PixelMap> {
    let m = affine_pixel_mapping(source, target)?;
    let (height, width) = target.shape();
    Ok((0..height)
        .into_par_iter()
        .flat_map_iter(|row| {
            (0..width).map(move |col| {
                let p = m * Vector3::new(col as f64, row as f64, 1.0);
                Some((p.x, p.y))
            })
        })
        .collect())
}

fn reprojection_map(source: &GridMapping, target: &GridMapping) -> Result<PixelMap> {
    let transformer = Transformer::new(target.crs, source.crs)?;
    let (height, width) = target.shape();
    let map: PixelMap = (0..height)
        .into_par_iter()
        .flat_map_iter(|row| {
            let transformer = &transformer;
            let y = target.y_coord(row);
            (0..width).map(move |col| {
                transformer
                    .transform(target.x_coord(col), y)
                    .ok()
                    .map(|(sx, sy)| source.pixel_position(sx, sy))
            })
        })
        .collect();

    if map.iter().all(Option::is_none) {
        return Err(StackError::resampling(format!(
            "no pixel of the {} target grid maps into {}",
            target.crs, source.crs
        )));
    }
    Ok(map)
}

fn resample_variable(
    var: &Variable,
    source: &GridMapping,
    target: &GridMapping,
    map: &PixelMap,
    fill: f32,
    method: InterpolationMethod,
) -> Result<Variable> {
    let (src_h, src_w) = source.shape();
    let (dst_h, dst_w) = target.shape();
    let plane_len = dst_h * dst_w;
    let planes = var.num_planes();

    let mut data = vec![fill; planes * plane_len];
    for p in 0..planes {
        let src = var
            .plane(p)
            .ok_or_else(|| StackError::resampling(format!("missing plane {}", p)))?;
        let dst = &mut data[p * plane_len..(p + 1) * plane_len];
        dst.par_chunks_mut(dst_w).enumerate().for_each(|(row, out)| {
            let offsets = &map[row * dst_w..(row + 1) * dst_w];
            for (cell, pos) in out.iter_mut().zip(offsets) {
                if let Some((x, y)) = *pos {
                    if let Some(v) = interpolate(method, src, src_w, src_h, x, y) {
                        *cell = v;
                    }
                }
            }
        });
    }

    let mut shape = var.shape.clone();
    let n = shape.len();
    shape[n - 2] = dst_h;
    shape[n - 1] = dst_w;
    let mut out = Variable::new(var.dims.clone(), shape, data)?;
    out.attrs = var.attrs.clone();
    Ok(out)
}

/// Resample every spatial variable of `source` onto `target`.
///
/// Non-spatial variables, the time axis and attributes are carried over.
/// Unmapped cells get `fill_value`, NaN when `None`.
pub fn resample_soft(
    source: RasterCube,
    target: &GridMapping,
    fill_value: Option<f32>,
    interpolation: InterpolationMethod,
) -> Result<RasterCube> {
    if source.grid.is_close(target, DEFAULT_GRID_TOLERANCE) {
        return Ok(source);
    }

    let map = if source.grid.crs == target.crs {
        debug!(
            from = ?source.grid.resolution(),
            to = ?target.resolution(),
            "Affine resampling"
        );
        affine_map(&source.grid, target)?
    } else {
        debug!(from = %source.grid.crs, to = %target.crs, "Reprojecting");
        reprojection_map(&source.grid, target)?
    };

    let fill = fill_value.unwrap_or(f32::NAN);
    let mut out = RasterCube::new(target.clone()).with_times(source.times.clone());
    out.attrs = source.attrs.clone();
    for (name, var) in &source.variables {
        let var = if var.is_spatial() {
            resample_variable(var, &source.grid, target, &map, fill, interpolation)?
        } else {
            var.clone()
        };
        out.insert_variable(name.clone(), var)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stac_common::CrsCode;

    const UTM32: CrsCode = CrsCode::Utm {
        zone: 32,
        north: true,
    };
    const UTM33: CrsCode = CrsCode::Utm {
        zone: 33,
        north: true,
    };

    fn cube_on(grid: GridMapping, data: Vec<f32>) -> RasterCube {
        let (h, w) = grid.shape();
        RasterCube::new(grid)
            .with_variable("B04", Variable::spatial(h, w, data).unwrap())
            .unwrap()
    }

    #[test]
    fn test_matching_grid_is_returned_unchanged() {
        let grid = GridMapping::new(UTM32, 600_000.0, 5_000_000.0, 10.0, 3, 2, 1024).unwrap();
        let cube = cube_on(grid.clone(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let out = resample_soft(cube.clone(), &grid.with_tile_size(2), None, Default::default())
            .unwrap();
        assert_eq!(out, cube);
    }

    #[test]
    fn test_affine_shift_by_one_pixel() {
        let source = GridMapping::new(UTM32, 600_000.0, 5_000_000.0, 10.0, 3, 1, 1024).unwrap();
        let target = GridMapping::new(UTM32, 600_010.0, 5_000_000.0, 10.0, 3, 1, 1024).unwrap();
        let out = resample_soft(
            cube_on(source, vec![1.0, 2.0, 3.0]),
            &target,
            Some(0.0),
            InterpolationMethod::Nearest,
        )
        .unwrap();
        assert_eq!(out.grid, target);
        assert_eq!(out.variables["B04"].data, vec![2.0, 3.0, 0.0]);
    }

    #[test]
    fn test_affine_upsample_20m_to_10m() {
        let source = GridMapping::new(UTM32, 600_000.0, 5_000_000.0, 20.0, 2, 2, 1024).unwrap();
        let target = GridMapping::new(UTM32, 600_000.0, 5_000_000.0, 10.0, 4, 4, 1024).unwrap();
        let out = resample_soft(
            cube_on(source, vec![1.0, 2.0, 3.0, 4.0]),
            &target,
            None,
            InterpolationMethod::Nearest,
        )
        .unwrap();
        let data = &out.variables["B04"].data;
        assert_eq!(&data[0..4], &[1.0, 1.0, 2.0, 2.0]);
        assert_eq!(&data[12..16], &[3.0, 3.0, 4.0, 4.0]);
    }

    #[test]
    fn test_affine_mapping_matrix() {
        let source = GridMapping::new(UTM32, 0.0, 100.0, 20.0, 5, 5, 1024).unwrap();
        let target = GridMapping::new(UTM32, 0.0, 100.0, 10.0, 10, 10, 1024).unwrap();
        let m = affine_pixel_mapping(&source, &target).unwrap();
        let p = m * Vector3::new(1.0, 1.0, 1.0);
        // center of target pixel 1 sits on the edge between source pixels 0 and 1
        assert!((p.x - 0.25).abs() < 1e-12);
        assert!((p.y - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_reprojection_between_utm_zones() {
        // near 12E, the shared edge of zones 32 and 33
        let source = GridMapping::new(UTM32, 700_000.0, 5_550_000.0, 100.0, 50, 50, 1024).unwrap();
        let data: Vec<f32> = (0..2500).map(|v| v as f32).collect();
        let cube = cube_on(source.clone(), data);

        let t = Transformer::new(UTM32, UTM33).unwrap();
        let (cx, cy) = t.transform(source.x_coord(25), source.y_coord(25)).unwrap();
        let target =
            GridMapping::from_first_center(UTM33, cx, cy, 100.0, 1, 1, 1024).unwrap();

        let out = resample_soft(cube, &target, None, InterpolationMethod::Nearest).unwrap();
        assert_eq!(out.grid.crs, UTM33);
        assert_eq!(out.variables["B04"].data, vec![(25 * 50 + 25) as f32]);
    }

    #[test]
    fn test_reprojection_fills_outside() {
        let source = GridMapping::new(UTM32, 700_000.0, 5_550_000.0, 100.0, 4, 4, 1024).unwrap();
        let target = GridMapping::new(UTM33, 100_000.0, 5_000_000.0, 100.0, 2, 2, 1024).unwrap();
        let out = resample_soft(
            cube_on(source, vec![1.0; 16]),
            &target,
            Some(-1.0),
            InterpolationMethod::Nearest,
        )
        .unwrap();
        assert_eq!(out.variables["B04"].data, vec![-1.0; 4]);
    }

    #[test]
    fn test_bilinear_halfway() {
        let source = GridMapping::new(UTM32, 0.0, 10.0, 10.0, 2, 1, 1024).unwrap();
        // one 20m pixel centered between the two source centers
        let target = GridMapping::new(UTM32, 0.0, 10.0, (20.0, 10.0), 1, 1, 1024).unwrap();
        let out = resample_soft(
            cube_on(source, vec![2.0, 4.0]),
            &target,
            None,
            InterpolationMethod::Bilinear,
        )
        .unwrap();
        assert!((out.variables["B04"].data[0] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_time_axis_and_attrs_carried() {
        use chrono::NaiveDate;
        let t = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let source = GridMapping::new(UTM32, 0.0, 20.0, 10.0, 2, 2, 1024).unwrap();
        let target = GridMapping::new(UTM32, 0.0, 20.0, 20.0, 1, 1, 1024).unwrap();
        let mut cube = RasterCube::new(source)
            .with_times(vec![t])
            .with_variable("B04", Variable::cube(1, 2, 2, vec![7.0; 4]).unwrap())
            .unwrap();
        cube.attrs.insert("title".into(), serde_json::json!("x"));

        let out = resample_soft(cube, &target, None, InterpolationMethod::Nearest).unwrap();
        assert_eq!(out.times, vec![t]);
        assert_eq!(out.variables["B04"].shape, vec![1, 1, 1]);
        assert_eq!(out.attrs["title"], "x");
    }
}
