//! Per-asset destination arrays.
//!
//! A [`Canvas`] is a `(time, y, x)` zarr array held in memory and chunked
//! as `(1, tile_size, tile_size)`. Tiles are written into it window by
//! window; each time step lives in its own row of chunks, so writers that
//! own distinct time steps never touch the same chunk.
//!
//! Canvases start out NaN. Cells no tile reaches stay NaN, which keeps them
//! invalid when zones are merged even if the asset's nodata is a number.

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::json;
use stac_common::{BoundingBox, CrsCode, GridMapping, Window};
use tracing::debug;
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_storage::store::MemoryStore;

use crate::error::{Result, StackError};
use crate::types::{Dim, RasterCube, Variable, SPATIAL_REF};

/// Relative slack when counting pixels along an axis.
const PIXEL_EPSILON: f64 = 1e-9;

/// An in-memory chunked destination array for one asset.
pub struct Canvas {
    asset: String,
    grid: GridMapping,
    times: Vec<NaiveDateTime>,
    nodata: f32,
    array: Array<MemoryStore>,
}

impl std::fmt::Debug for Canvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canvas")
            .field("asset", &self.asset)
            .field("grid", &self.grid)
            .field("times", &self.times.len())
            .field("nodata", &self.nodata)
            .finish()
    }
}

/// Snap the overlap of `items_bbox` and `target_bbox` onto the pixel lattice of `items_bbox`.
///
/// Returns `(x_start, y_start, x_end, y_end)` where `y_start` is the top edge.
fn snap_extent(items_bbox: &BoundingBox, target_bbox: &BoundingBox, res: f64) -> (f64, f64, f64, f64) {
    let steps = |d: f64| (d / res).floor().max(0.0);
    let x_start = items_bbox.min_x + res * steps(target_bbox.min_x - items_bbox.min_x);
    let x_end = items_bbox.max_x - res * steps(items_bbox.max_x - target_bbox.max_x);
    let y_start = items_bbox.max_y - res * steps(items_bbox.max_y - target_bbox.max_y);
    let y_end = items_bbox.min_y + res * steps(target_bbox.min_y - items_bbox.min_y);
    (x_start, y_start, x_end, y_end)
}

/// Pixel centers `start + res/2, start + 3res/2, ...` strictly below `start + span`.
fn pixel_count(span: f64, res: f64) -> usize {
    let n = ((span - res / 2.0) / res - PIXEL_EPSILON).ceil();
    if n > 0.0 {
        n as usize
    } else {
        0
    }
}

/// Allocate an empty canvas for `asset` covering the overlap of the item
/// footprints with the requested area.
///
/// Both boxes are in `crs`. The canvas edges are snapped outward to whole
/// pixels of the item lattice, so native tiles land on it without
/// resampling.
#[allow(clippy::too_many_arguments)]
pub fn allocate_canvas(
    asset: &str,
    items_bbox: &BoundingBox,
    target_bbox: &BoundingBox,
    spatial_res: f64,
    crs: CrsCode,
    times: &[NaiveDateTime],
    tile_size: usize,
    nodata: f32,
) -> Result<Canvas> {
    if !(spatial_res.is_finite() && spatial_res > 0.0) {
        return Err(StackError::invalid_grid(format!(
            "resolution must be positive, got {}",
            spatial_res
        )));
    }
    if times.is_empty() {
        return Err(StackError::canvas(format!("no time steps for asset {}", asset)));
    }

    let (x_start, y_start, x_end, y_end) = snap_extent(items_bbox, target_bbox, spatial_res);
    let width = pixel_count(x_end - x_start, spatial_res);
    let height = pixel_count(y_start - y_end, spatial_res);
    if width == 0 || height == 0 {
        return Err(StackError::canvas(format!(
            "items {:?} do not overlap the requested area {:?}",
            items_bbox.to_array(),
            target_bbox.to_array()
        )));
    }

    let grid = GridMapping::new(crs, x_start, y_start, spatial_res, width, height, tile_size)?;
    Canvas::new(asset, grid, times.to_vec(), nodata)
}

impl Canvas {
    /// Create an all-NaN canvas on `grid`.
    ///
    /// `nodata` marks cells a later tile may still overwrite.
    pub fn new(
        asset: impl Into<String>,
        grid: GridMapping,
        times: Vec<NaiveDateTime>,
        nodata: f32,
    ) -> Result<Self> {
        let asset = asset.into();
        let (height, width) = grid.shape();

        let mut attrs = serde_json::Map::new();
        attrs.insert("_ARRAY_DIMENSIONS".to_string(), json!(["time", "y", "x"]));
        attrs.insert("grid_mapping".to_string(), json!(SPATIAL_REF));
        attrs.insert("asset".to_string(), json!(asset));

        let chunk_grid: zarrs::array::ChunkGrid = vec![
            1u64,
            grid.tile_height as u64,
            grid.tile_width as u64,
        ]
        .try_into()
        .map_err(|e| StackError::canvas(format!("{:?}", e)))?;

        let store = Arc::new(MemoryStore::new());
        let mut binding = ArrayBuilder::new(
            vec![times.len() as u64, height as u64, width as u64],
            DataType::Float32,
            chunk_grid,
            FillValue::from(f32::NAN),
        );
        let builder = binding.attributes(attrs);
        let array = builder
            .build(store, "/")
            .map_err(|e| StackError::canvas(e.to_string()))?;
        array
            .store_metadata()
            .map_err(|e| StackError::canvas(e.to_string()))?;

        debug!(
            asset = %asset,
            times = times.len(),
            height,
            width,
            crs = %grid.crs,
            "Allocated canvas"
        );

        Ok(Self {
            asset,
            grid,
            times,
            nodata,
            array,
        })
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn grid(&self) -> &GridMapping {
        &self.grid
    }

    pub fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    pub fn nodata(&self) -> f32 {
        self.nodata
    }

    /// `(time, height, width)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.times.len(), self.grid.height, self.grid.width)
    }

    fn subset(&self, t: usize, window: &Window) -> Result<ArraySubset> {
        if t >= self.times.len()
            || window.col_off + window.width > self.grid.width
            || window.row_off + window.height > self.grid.height
        {
            return Err(StackError::canvas(format!(
                "window {:?} at time {} is outside the {:?} canvas",
                window,
                t,
                self.shape()
            )));
        }
        ArraySubset::new_with_start_shape(
            vec![t as u64, window.row_off as u64, window.col_off as u64],
            vec![1, window.height as u64, window.width as u64],
        )
        .map_err(|e| StackError::canvas(e.to_string()))
    }

    /// Overwrite a window of time step `t`.
    pub fn write_window(&self, t: usize, window: &Window, data: &[f32]) -> Result<()> {
        if data.len() != window.len() {
            return Err(StackError::canvas(format!(
                "{} values for a window of {}",
                data.len(),
                window.len()
            )));
        }
        let subset = self.subset(t, window)?;
        self.array
            .store_array_subset_elements(&subset, data)
            .map_err(|e| StackError::canvas(e.to_string()))
    }

    /// Read a window of time step `t`.
    pub fn read_window(&self, t: usize, window: &Window) -> Result<Vec<f32>> {
        let subset = self.subset(t, window)?;
        self.array
            .retrieve_array_subset_elements::<f32>(&subset)
            .map_err(|e| StackError::canvas(e.to_string()))
    }

    /// Write `data` into the window, keeping values already written.
    ///
    /// A cell is free while it holds NaN or nodata, so the first tile
    /// written to a cell wins.
    pub fn merge_window(&self, t: usize, window: &Window, data: &[f32]) -> Result<()> {
        let mut existing = self.read_window(t, window)?;
        if data.len() != existing.len() {
            return Err(StackError::canvas(format!(
                "{} values for a window of {}",
                data.len(),
                existing.len()
            )));
        }
        let nodata = self.nodata;
        for (cell, value) in existing.iter_mut().zip(data) {
            if cell.is_nan() || *cell == nodata {
                *cell = *value;
            }
        }
        self.write_window(t, window, &existing)
    }

    /// One full `(y, x)` plane.
    pub fn read_time_step(&self, t: usize) -> Result<Vec<f32>> {
        self.read_window(t, &Window::new(0, 0, self.grid.width, self.grid.height))
    }

    /// Materialize the whole canvas as a `(time, y, x)` variable.
    pub fn to_variable(&self) -> Result<Variable> {
        let (t, h, w) = self.shape();
        let subset = ArraySubset::new_with_start_shape(
            vec![0, 0, 0],
            vec![t as u64, h as u64, w as u64],
        )
        .map_err(|e| StackError::canvas(e.to_string()))?;
        let data = self
            .array
            .retrieve_array_subset_elements::<f32>(&subset)
            .map_err(|e| StackError::canvas(e.to_string()))?;

        Ok(Variable::new(vec![Dim::Time, Dim::Y, Dim::X], vec![t, h, w], data)?
            .with_attr("grid_mapping", json!(SPATIAL_REF)))
    }

    /// Materialize the canvas as a single-variable cube named after its asset.
    pub fn into_cube(self) -> Result<RasterCube> {
        let variable = self.to_variable()?;
        let mut cube = RasterCube::new(self.grid).with_times(self.times);
        cube.insert_variable(self.asset, variable)?;
        cube.set_grid_mapping_attrs();
        Ok(cube)
    }
}
