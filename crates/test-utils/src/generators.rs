//! Synthetic raster data for stacking tests.
//!
//! These generators create predictable, verifiable patterns so tests can
//! tell which tile a pixel came from.

use cube_stacker::{RasterCube, Variable};
use stac_common::{BoundingBox, CrsCode, GridMapping};

/// Creates a test grid with predictable values.
///
/// Each cell value is calculated as: `col * 1000 + row`
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50);
/// assert_eq!(grid[1], 1000.0); // col=1, row=0
/// assert_eq!(grid[10], 1.0);   // col=0, row=1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// Raw Sentinel-2-like digital numbers (1000..=4000), with nodata (0)
/// along the left `nodata_cols` columns.
pub fn create_reflectance_grid(width: usize, height: usize, nodata_cols: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            if col < nodata_cols {
                data.push(0.0);
            } else {
                let x = col as f32 / width.max(1) as f32;
                let y = row as f32 / height.max(1) as f32;
                data.push(1000.0 + (x * 1500.0 + y * 1500.0).round());
            }
        }
    }
    data
}

/// Grid covering a projected `bbox` at `res`.
pub fn grid_for_bbox(crs: CrsCode, bbox: &BoundingBox, res: f64, tile_size: usize) -> GridMapping {
    let width = (bbox.width() / res).round() as usize;
    let height = (bbox.height() / res).round() as usize;
    GridMapping::new(crs, bbox.min_x, bbox.max_y, res, width, height, tile_size)
        .expect("fixture grid must be valid")
}

/// Single-variable cube without a time axis.
pub fn cube_from_data(name: &str, grid: GridMapping, data: Vec<f32>) -> RasterCube {
    let (height, width) = grid.shape();
    let variable = Variable::spatial(height, width, data).expect("data must match the grid");
    RasterCube::new(grid)
        .with_variable(name, variable)
        .expect("variable must match the grid")
}

/// Single-variable cube holding `value` everywhere.
pub fn constant_cube(name: &str, grid: GridMapping, value: f32) -> RasterCube {
    let len = grid.len();
    cube_from_data(name, grid, vec![value; len])
}

/// Single-variable cube holding [`create_test_grid`].
pub fn pattern_cube(name: &str, grid: GridMapping) -> RasterCube {
    let (height, width) = grid.shape();
    cube_from_data(name, grid, create_test_grid(width, height))
}

/// Constant sun and viewing angle grids, named as the stacker expects.
///
/// Solar angles are `(solar_zenith, solar_zenith + 100)`; every band gets
/// `(viewing_zenith, viewing_zenith + 100)`.
pub fn angle_cube(grid: GridMapping, bands: &[&str], solar_zenith: f32, viewing_zenith: f32) -> RasterCube {
    let len = grid.len();
    let (height, width) = grid.shape();
    let constant =
        |v: f32| Variable::spatial(height, width, vec![v; len]).expect("data must match the grid");
    let mut cube = RasterCube::new(grid);
    let mut variables = vec![
        ("solar_angle_zenith".to_string(), solar_zenith),
        ("solar_angle_azimuth".to_string(), solar_zenith + 100.0),
    ];
    for band in bands {
        variables.push((format!("viewing_angle_zenith_{}", band), viewing_zenith));
        variables.push((format!("viewing_angle_azimuth_{}", band), viewing_zenith + 100.0));
    }
    for (name, value) in variables {
        cube.insert_variable(name, constant(value))
            .expect("variable must match the grid");
    }
    cube
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reflectance_grid_nodata_columns() {
        let data = create_reflectance_grid(4, 2, 1);
        assert_eq!(data[0], 0.0);
        assert_eq!(data[4], 0.0);
        assert!(data[1] >= 1000.0);
        assert!(data.iter().all(|v| *v <= 4000.0));
    }

    #[test]
    fn test_grid_for_bbox() {
        let crs = CrsCode::Utm {
            zone: 32,
            north: true,
        };
        let grid = grid_for_bbox(crs, &BoundingBox::new(0.0, 0.0, 100.0, 50.0), 10.0, 256);
        assert_eq!(grid.shape(), (5, 10));
        assert_eq!(pattern_cube("B04", grid).variables["B04"].data[1], 1000.0);
    }
}
