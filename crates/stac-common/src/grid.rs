//! Regular grid mappings for data cubes.
//!
//! A [`GridMapping`] describes a north-up raster: an outer-edge origin
//! (`x_min`, `y_max`), a positive pixel size per axis, a pixel count per
//! axis, the CRS, and the chunk (tile) size used for storage. Rows run from
//! north to south, so y coordinates are descending.

use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;
use crate::crs::CrsCode;
use crate::error::{StacError, StacResult};

/// Relative slack used when converting extents to pixel counts.
const PIXEL_EPSILON: f64 = 1e-9;

/// Default relative tolerance for [`GridMapping::is_close`].
pub const DEFAULT_GRID_TOLERANCE: f64 = 1e-5;

/// Spatial resolution, either uniform or per axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpatialRes {
    Uniform(f64),
    Xy(f64, f64),
}

impl SpatialRes {
    /// Resolution as `(x_res, y_res)`.
    pub fn xy(&self) -> (f64, f64) {
        match *self {
            SpatialRes::Uniform(r) => (r, r),
            SpatialRes::Xy(x, y) => (x, y),
        }
    }
}

impl From<f64> for SpatialRes {
    fn from(r: f64) -> Self {
        SpatialRes::Uniform(r)
    }
}

impl From<(f64, f64)> for SpatialRes {
    fn from((x, y): (f64, f64)) -> Self {
        SpatialRes::Xy(x, y)
    }
}

/// A rectangular pixel window inside a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
        }
    }

    /// Number of pixels in the window.
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A regular, north-up grid in a single CRS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridMapping {
    /// CRS of the x/y coordinates
    pub crs: CrsCode,
    /// Left outer edge of the first column
    pub x_min: f64,
    /// Top outer edge of the first row
    pub y_max: f64,
    /// Pixel width (positive)
    pub x_res: f64,
    /// Pixel height (positive, applied as descending)
    pub y_res: f64,
    /// Number of columns
    pub width: usize,
    /// Number of rows
    pub height: usize,
    /// Chunk width used for storage
    pub tile_width: usize,
    /// Chunk height used for storage
    pub tile_height: usize,
}

impl GridMapping {
    /// Create a grid from its outer-edge origin.
    pub fn new(
        crs: CrsCode,
        x_min: f64,
        y_max: f64,
        res: impl Into<SpatialRes>,
        width: usize,
        height: usize,
        tile_size: usize,
    ) -> StacResult<Self> {
        let (x_res, y_res) = res.into().xy();
        if !(x_res.is_finite() && y_res.is_finite()) || x_res <= 0.0 || y_res <= 0.0 {
            return Err(StacError::invalid_grid(format!(
                "resolution must be positive, got ({}, {})",
                x_res, y_res
            )));
        }
        if !(x_min.is_finite() && y_max.is_finite()) {
            return Err(StacError::invalid_grid("grid origin must be finite"));
        }
        if width == 0 || height == 0 {
            return Err(StacError::invalid_grid(format!(
                "grid size must be positive, got {}x{}",
                width, height
            )));
        }
        if tile_size == 0 {
            return Err(StacError::invalid_grid("tile size must be positive"));
        }

        Ok(Self {
            crs,
            x_min,
            y_max,
            x_res,
            y_res,
            width,
            height,
            tile_width: tile_size.min(width),
            tile_height: tile_size.min(height),
        })
    }

    /// Create a grid whose first pixel center is at `(x_first, y_first)`.
    pub fn from_first_center(
        crs: CrsCode,
        x_first: f64,
        y_first: f64,
        res: impl Into<SpatialRes>,
        width: usize,
        height: usize,
        tile_size: usize,
    ) -> StacResult<Self> {
        let res = res.into();
        let (x_res, y_res) = res.xy();
        Self::new(
            crs,
            x_first - x_res / 2.0,
            y_first + y_res / 2.0,
            res,
            width,
            height,
            tile_size,
        )
    }

    /// Copy of this grid with another chunk size.
    pub fn with_tile_size(&self, tile_size: usize) -> Self {
        let tile_size = tile_size.max(1);
        Self {
            tile_width: tile_size.min(self.width),
            tile_height: tile_size.min(self.height),
            ..self.clone()
        }
    }

    /// Resolution as `(x_res, y_res)`.
    pub fn resolution(&self) -> (f64, f64) {
        (self.x_res, self.y_res)
    }

    /// Shape as `(height, width)`, matching row-major storage.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// X coordinate of the center of column `col`.
    pub fn x_coord(&self, col: usize) -> f64 {
        self.x_min + (col as f64 + 0.5) * self.x_res
    }

    /// Y coordinate of the center of row `row`.
    pub fn y_coord(&self, row: usize) -> f64 {
        self.y_max - (row as f64 + 0.5) * self.y_res
    }

    /// Pixel-center x coordinates (ascending).
    pub fn x_coords(&self) -> Vec<f64> {
        (0..self.width).map(|c| self.x_coord(c)).collect()
    }

    /// Pixel-center y coordinates (descending).
    pub fn y_coords(&self) -> Vec<f64> {
        (0..self.height).map(|r| self.y_coord(r)).collect()
    }

    /// Outer-edge extent of the grid.
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::new(
            self.x_min,
            self.y_max - self.height as f64 * self.y_res,
            self.x_min + self.width as f64 * self.x_res,
            self.y_max,
        )
    }

    /// Fractional `(col, row)` of a point, with pixel centers at integer positions.
    pub fn pixel_position(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.x_min) / self.x_res - 0.5,
            (self.y_max - y) / self.y_res - 0.5,
        )
    }

    /// Number of chunks along `(y, x)`.
    pub fn num_tiles(&self) -> (usize, usize) {
        (
            self.height.div_ceil(self.tile_height),
            self.width.div_ceil(self.tile_width),
        )
    }

    /// Whether two grids describe the same pixels within `tolerance` (relative to pixel size).
    ///
    /// Chunk sizes are ignored.
    pub fn is_close(&self, other: &GridMapping, tolerance: f64) -> bool {
        let x_tol = tolerance * self.x_res;
        let y_tol = tolerance * self.y_res;
        self.crs == other.crs
            && self.width == other.width
            && self.height == other.height
            && (self.x_res - other.x_res).abs() <= x_tol
            && (self.y_res - other.y_res).abs() <= y_tol
            && (self.x_min - other.x_min).abs() <= x_tol
            && (self.y_max - other.y_max).abs() <= y_tol
    }

    /// Pixel window of every cell intersecting `bbox`, `None` when disjoint.
    pub fn window_for(&self, bbox: &BoundingBox) -> Option<Window> {
        let col0 = snap_floor((bbox.min_x - self.x_min) / self.x_res).max(0.0);
        let col1 = snap_ceil((bbox.max_x - self.x_min) / self.x_res).min(self.width as f64);
        let row0 = snap_floor((self.y_max - bbox.max_y) / self.y_res).max(0.0);
        let row1 = snap_ceil((self.y_max - bbox.min_y) / self.y_res).min(self.height as f64);

        if col1 <= col0 || row1 <= row0 {
            return None;
        }
        Some(Window::new(
            col0 as usize,
            row0 as usize,
            (col1 - col0) as usize,
            (row1 - row0) as usize,
        ))
    }

    /// Grid covering `window` of this grid.
    pub fn subgrid(&self, window: &Window) -> StacResult<GridMapping> {
        if window.col_off + window.width > self.width || window.row_off + window.height > self.height
        {
            return Err(StacError::invalid_grid(format!(
                "window {:?} exceeds grid of {}x{}",
                window, self.width, self.height
            )));
        }
        GridMapping::new(
            self.crs,
            self.x_min + window.col_off as f64 * self.x_res,
            self.y_max - window.row_off as f64 * self.y_res,
            (self.x_res, self.y_res),
            window.width,
            window.height,
            self.tile_width.max(self.tile_height),
        )
    }
}

/// Build a regular target grid from a bbox, resolution, CRS and tile size.
///
/// The bbox edges become the centers of the outermost pixels, so the grid
/// extends half a pixel beyond the bbox on every side and
/// `width = ceil((x_max - x_min) / x_res) + 1` (likewise for height).
pub fn build_grid(
    bbox: &BoundingBox,
    spatial_res: impl Into<SpatialRes>,
    crs: CrsCode,
    tile_size: usize,
) -> StacResult<GridMapping> {
    let (x_res, y_res) = spatial_res.into().xy();
    if !(x_res.is_finite() && y_res.is_finite()) || x_res <= 0.0 || y_res <= 0.0 {
        return Err(StacError::invalid_grid(format!(
            "resolution must be positive, got ({}, {})",
            x_res, y_res
        )));
    }
    if !bbox.is_valid() {
        return Err(StacError::invalid_grid(format!(
            "degenerate bounding box {:?}",
            bbox.to_array()
        )));
    }

    let width = snap_ceil(bbox.width() / x_res) as usize + 1;
    let height = snap_ceil(bbox.height() / y_res) as usize + 1;

    GridMapping::from_first_center(
        crs,
        bbox.min_x,
        bbox.max_y,
        (x_res, y_res),
        width,
        height,
        tile_size,
    )
}

fn snap_ceil(v: f64) -> f64 {
    (v - PIXEL_EPSILON * v.abs().max(1.0)).ceil()
}

fn snap_floor(v: f64) -> f64 {
    (v + PIXEL_EPSILON * v.abs().max(1.0)).floor()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utm32() -> CrsCode {
        CrsCode::Utm {
            zone: 32,
            north: true,
        }
    }

    #[test]
    fn test_build_grid_ceil_plus_one() {
        let bbox = BoundingBox::new(500_000.0, 5_900_000.0, 501_000.0, 5_900_500.0);
        let grid = build_grid(&bbox, 10.0, utm32(), 256).unwrap();
        assert_eq!(grid.width, 101);
        assert_eq!(grid.height, 51);
        assert_eq!(grid.x_min, 499_995.0);
        assert_eq!(grid.y_max, 5_900_505.0);
        assert_eq!(grid.x_coord(0), 500_000.0);
        assert_eq!(grid.y_coord(0), 5_900_500.0);
        assert_eq!(grid.tile_width, 101);
        assert_eq!(grid.tile_height, 51);
    }

    #[test]
    fn test_build_grid_inexact_division() {
        let bbox = BoundingBox::new(2.0, 50.0, 3.0, 51.0);
        let grid = build_grid(&bbox, 0.1, CrsCode::Epsg4326, 1024).unwrap();
        assert_eq!(grid.width, 11);
        assert_eq!(grid.height, 11);

        let grid = build_grid(&bbox, 0.3, CrsCode::Epsg4326, 1024).unwrap();
        assert_eq!(grid.width, 5);
    }

    #[test]
    fn test_build_grid_xy_resolution() {
        let bbox = BoundingBox::new(0.0, 0.0, 100.0, 40.0);
        let grid = build_grid(&bbox, (10.0, 20.0), utm32(), 8).unwrap();
        assert_eq!(grid.resolution(), (10.0, 20.0));
        assert_eq!(grid.shape(), (3, 11));
        assert_eq!(grid.num_tiles(), (1, 2));
    }

    #[test]
    fn test_build_grid_rejects_degenerate_input() {
        let flat = BoundingBox::new(0.0, 0.0, 0.0, 10.0);
        assert!(matches!(
            build_grid(&flat, 1.0, utm32(), 16),
            Err(StacError::InvalidGrid(_))
        ));

        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(build_grid(&bbox, 0.0, utm32(), 16).is_err());
        assert!(build_grid(&bbox, -1.0, utm32(), 16).is_err());
        assert!(build_grid(&bbox, 1.0, utm32(), 0).is_err());
    }

    #[test]
    fn test_is_close() {
        let bbox = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        let a = build_grid(&bbox, 10.0, utm32(), 4).unwrap();
        let b = a.with_tile_size(8);
        assert!(a.is_close(&b, DEFAULT_GRID_TOLERANCE));

        let mut shifted = a.clone();
        shifted.x_min += 5.0;
        assert!(!a.is_close(&shifted, DEFAULT_GRID_TOLERANCE));

        let mut other_crs = a.clone();
        other_crs.crs = CrsCode::Epsg3035;
        assert!(!a.is_close(&other_crs, DEFAULT_GRID_TOLERANCE));
    }

    #[test]
    fn test_window_and_subgrid() {
        let grid = GridMapping::new(utm32(), 0.0, 100.0, 10.0, 10, 10, 4).unwrap();
        let window = grid
            .window_for(&BoundingBox::new(15.0, 45.0, 40.0, 80.0))
            .unwrap();
        assert_eq!(window, Window::new(1, 2, 3, 4));

        let sub = grid.subgrid(&window).unwrap();
        assert_eq!(sub.x_min, 10.0);
        assert_eq!(sub.y_max, 80.0);
        assert_eq!(sub.shape(), (4, 3));

        assert!(grid
            .window_for(&BoundingBox::new(200.0, 0.0, 300.0, 50.0))
            .is_none());
    }

    #[test]
    fn test_pixel_position() {
        let grid = GridMapping::new(utm32(), 0.0, 100.0, 10.0, 10, 10, 4).unwrap();
        assert_eq!(grid.pixel_position(5.0, 95.0), (0.0, 0.0));
        assert_eq!(grid.pixel_position(20.0, 70.0), (1.5, 2.5));
    }
}
