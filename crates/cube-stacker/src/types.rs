//! In-memory labeled arrays: variables on a shared grid and time axis.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde_json::{json, Map, Value};
use stac_common::{BoundingBox, CrsCode, GridMapping, Window};

use crate::error::{Result, StackError};

/// Name of the non-dimensional coordinate carrying CF grid-mapping attributes.
pub const SPATIAL_REF: &str = "spatial_ref";

/// A named array dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dim {
    Time,
    Y,
    X,
    Named(String),
}

impl Dim {
    pub fn as_str(&self) -> &str {
        match self {
            Dim::Time => "time",
            Dim::Y => "y",
            Dim::X => "x",
            Dim::Named(name) => name,
        }
    }
}

/// A dense `f32` array with named dimensions, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub dims: Vec<Dim>,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
    pub attrs: Map<String, Value>,
}

impl Variable {
    /// Create a variable, checking that `data` matches `shape`.
    pub fn new(dims: Vec<Dim>, shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        if dims.len() != shape.len() {
            return Err(StackError::invalid_metadata(format!(
                "{} dimensions but shape {:?}",
                dims.len(),
                shape
            )));
        }
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(StackError::invalid_metadata(format!(
                "shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            dims,
            shape,
            data,
            attrs: Map::new(),
        })
    }

    /// A single `(y, x)` plane.
    pub fn spatial(height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        Self::new(vec![Dim::Y, Dim::X], vec![height, width], data)
    }

    /// A `(time, y, x)` stack.
    pub fn cube(times: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        Self::new(vec![Dim::Time, Dim::Y, Dim::X], vec![times, height, width], data)
    }

    /// A variable of the given shape filled with `value`.
    pub fn filled(dims: Vec<Dim>, shape: Vec<usize>, value: f32) -> Result<Self> {
        let len = shape.iter().product();
        Self::new(dims, shape, vec![value; len])
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the last two dimensions are `(y, x)`.
    pub fn is_spatial(&self) -> bool {
        matches!(self.dims.as_slice(), [.., Dim::Y, Dim::X])
    }

    pub fn has_time(&self) -> bool {
        self.dims.first() == Some(&Dim::Time)
    }

    /// `(height, width)` of a spatial variable.
    pub fn spatial_shape(&self) -> Option<(usize, usize)> {
        if !self.is_spatial() {
            return None;
        }
        let n = self.shape.len();
        Some((self.shape[n - 2], self.shape[n - 1]))
    }

    /// Number of `(y, x)` planes of a spatial variable.
    pub fn num_planes(&self) -> usize {
        match self.spatial_shape() {
            Some((h, w)) if h * w > 0 => self.data.len() / (h * w),
            _ => 0,
        }
    }

    /// The `index`-th `(y, x)` plane.
    pub fn plane(&self, index: usize) -> Option<&[f32]> {
        let (h, w) = self.spatial_shape()?;
        let len = h * w;
        self.data.get(index * len..(index + 1) * len)
    }

    /// Copy of a spatial variable restricted to `window`.
    pub fn window(&self, window: &Window) -> Result<Variable> {
        let (h, w) = self
            .spatial_shape()
            .ok_or_else(|| StackError::invalid_metadata("window of a non-spatial variable"))?;
        if window.col_off + window.width > w || window.row_off + window.height > h {
            return Err(StackError::invalid_metadata(format!(
                "window {:?} exceeds {}x{} plane",
                window, w, h
            )));
        }

        let mut data = Vec::with_capacity(self.num_planes() * window.len());
        for p in 0..self.num_planes() {
            let plane = &self.data[p * h * w..(p + 1) * h * w];
            for row in window.row_off..window.row_off + window.height {
                let start = row * w + window.col_off;
                data.extend_from_slice(&plane[start..start + window.width]);
            }
        }

        let mut shape = self.shape.clone();
        let n = shape.len();
        shape[n - 2] = window.height;
        shape[n - 1] = window.width;
        Ok(Variable {
            dims: self.dims.clone(),
            shape,
            data,
            attrs: self.attrs.clone(),
        })
    }

    /// Copy of a time-leading variable at time index `t`, without the time dimension.
    pub fn time_slice(&self, t: usize) -> Result<Variable> {
        if !self.has_time() || t >= self.shape[0] {
            return Err(StackError::invalid_metadata(format!(
                "time index {} out of range for shape {:?}",
                t, self.shape
            )));
        }
        let step: usize = self.shape[1..].iter().product();
        Ok(Variable {
            dims: self.dims[1..].to_vec(),
            shape: self.shape[1..].to_vec(),
            data: self.data[t * step..(t + 1) * step].to_vec(),
            attrs: self.attrs.clone(),
        })
    }
}

/// Variables sharing one grid and one time axis, with dataset attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterCube {
    pub grid: GridMapping,
    pub times: Vec<NaiveDateTime>,
    pub variables: BTreeMap<String, Variable>,
    pub attrs: Map<String, Value>,
}

impl RasterCube {
    /// An empty cube on `grid` with no time axis.
    pub fn new(grid: GridMapping) -> Self {
        Self {
            grid,
            times: Vec::new(),
            variables: BTreeMap::new(),
            attrs: Map::new(),
        }
    }

    pub fn with_times(mut self, times: Vec<NaiveDateTime>) -> Self {
        self.times = times;
        self
    }

    /// Add a variable, checking it against the grid and time axis.
    pub fn with_variable(mut self, name: impl Into<String>, variable: Variable) -> Result<Self> {
        self.insert_variable(name, variable)?;
        Ok(self)
    }

    pub fn insert_variable(&mut self, name: impl Into<String>, variable: Variable) -> Result<()> {
        let name = name.into();
        if let Some(shape) = variable.spatial_shape() {
            if shape != self.grid.shape() {
                return Err(StackError::coordinate_mismatch(format!(
                    "variable {} has shape {:?}, grid is {:?}",
                    name,
                    shape,
                    self.grid.shape()
                )));
            }
        }
        if variable.has_time() && variable.shape[0] != self.times.len() {
            return Err(StackError::coordinate_mismatch(format!(
                "variable {} has {} time steps, cube has {}",
                name,
                variable.shape[0],
                self.times.len()
            )));
        }
        self.variables.insert(name, variable);
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn crs(&self) -> CrsCode {
        self.grid.crs
    }

    /// Variables whose last two dimensions are `(y, x)`.
    pub fn spatial_variables(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.variables.iter().filter(|(_, v)| v.is_spatial())
    }

    /// CF attributes of the `spatial_ref` coordinate.
    pub fn spatial_ref(&self) -> Map<String, Value> {
        self.grid.crs.cf_attributes()
    }

    /// Crop to the pixels touching `bbox` (given in the cube's CRS).
    ///
    /// Returns `None` when nothing overlaps.
    pub fn clip(&self, bbox: &BoundingBox) -> Result<Option<RasterCube>> {
        match self.grid.window_for(bbox) {
            Some(window) => Ok(Some(self.select_window(&window)?)),
            None => Ok(None),
        }
    }

    /// Crop to a pixel window of the grid.
    pub fn select_window(&self, window: &Window) -> Result<RasterCube> {
        let grid = self.grid.subgrid(window)?;
        let mut variables = BTreeMap::new();
        for (name, var) in &self.variables {
            let var = if var.is_spatial() {
                var.window(window)?
            } else {
                var.clone()
            };
            variables.insert(name.clone(), var);
        }
        Ok(RasterCube {
            grid,
            times: self.times.clone(),
            variables,
            attrs: self.attrs.clone(),
        })
    }

    /// The cube at time index `t`, without a time dimension.
    pub fn time_slice(&self, t: usize) -> Result<RasterCube> {
        let time = *self.times.get(t).ok_or_else(|| {
            StackError::invalid_metadata(format!(
                "time index {} out of range ({} steps)",
                t,
                self.times.len()
            ))
        })?;
        let mut variables = BTreeMap::new();
        for (name, var) in &self.variables {
            let var = if var.has_time() {
                var.time_slice(t)?
            } else {
                var.clone()
            };
            variables.insert(name.clone(), var);
        }
        Ok(RasterCube {
            grid: self.grid.clone(),
            times: vec![time],
            variables,
            attrs: self.attrs.clone(),
        })
    }

    /// Stack time-less slices along a new time axis.
    ///
    /// Every slice must share the grid and the set of spatial variables;
    /// non-spatial variables and attributes come from the first slice.
    pub fn concat_time(slices: Vec<(NaiveDateTime, RasterCube)>) -> Result<RasterCube> {
        let (_, first) = slices
            .first()
            .ok_or_else(|| StackError::EmptyInput("no slices to concatenate".to_string()))?;
        let grid = first.grid.clone();
        let names: Vec<String> = first.spatial_variables().map(|(n, _)| n.clone()).collect();

        for (time, slice) in &slices {
            if !slice.grid.is_close(&grid, stac_common::grid::DEFAULT_GRID_TOLERANCE) {
                return Err(StackError::coordinate_mismatch(format!(
                    "slice at {} is on a different grid",
                    time
                )));
            }
            let other: Vec<&String> = slice.spatial_variables().map(|(n, _)| n).collect();
            if other.len() != names.len() || other.iter().zip(&names).any(|(a, b)| *a != b) {
                return Err(StackError::coordinate_mismatch(format!(
                    "slice at {} has variables {:?}, expected {:?}",
                    time, other, names
                )));
            }
        }

        let (h, w) = grid.shape();
        let times: Vec<NaiveDateTime> = slices.iter().map(|(t, _)| *t).collect();
        let mut cube = RasterCube::new(grid).with_times(times.clone());
        cube.attrs = first.attrs.clone();
        for (name, var) in first.variables.iter().filter(|(_, v)| !v.is_spatial()) {
            cube.variables.insert(name.clone(), var.clone());
        }

        for name in &names {
            let mut data = Vec::with_capacity(times.len() * h * w);
            let mut attrs = Map::new();
            for (time, slice) in &slices {
                let var = &slice.variables[name];
                if var.has_time() || var.len() != h * w {
                    return Err(StackError::coordinate_mismatch(format!(
                        "variable {} at {} is not a single plane",
                        name, time
                    )));
                }
                if attrs.is_empty() {
                    attrs = var.attrs.clone();
                }
                data.extend_from_slice(&var.data);
            }
            let mut var = Variable::cube(times.len(), h, w, data)?;
            var.attrs = attrs;
            cube.insert_variable(name.clone(), var)?;
        }
        Ok(cube)
    }

    /// Dataset-level attributes describing the grid mapping.
    pub fn set_grid_mapping_attrs(&mut self) {
        let spatial_ref = self.spatial_ref();
        self.attrs
            .insert("grid_mapping".to_string(), json!(SPATIAL_REF));
        self.attrs
            .insert(SPATIAL_REF.to_string(), Value::Object(spatial_ref));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn grid(width: usize, height: usize) -> GridMapping {
        GridMapping::new(
            CrsCode::Utm {
                zone: 32,
                north: true,
            },
            500_000.0,
            5_000_000.0,
            10.0,
            width,
            height,
            1024,
        )
        .unwrap()
    }

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, d)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_variable_shape_checked() {
        assert!(Variable::spatial(2, 2, vec![0.0; 3]).is_err());
        let var = Variable::cube(2, 2, 3, vec![0.0; 12]).unwrap();
        assert!(var.is_spatial());
        assert_eq!(var.spatial_shape(), Some((2, 3)));
        assert_eq!(var.num_planes(), 2);
    }

    #[test]
    fn test_variable_window() {
        let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let var = Variable::spatial(3, 4, data).unwrap();
        let sub = var.window(&Window::new(1, 1, 2, 2)).unwrap();
        assert_eq!(sub.shape, vec![2, 2]);
        assert_eq!(sub.data, vec![5.0, 6.0, 9.0, 10.0]);
    }

    #[test]
    fn test_insert_rejects_wrong_shape() {
        let mut cube = RasterCube::new(grid(4, 3));
        let var = Variable::spatial(4, 3, vec![0.0; 12]).unwrap();
        assert!(matches!(
            cube.insert_variable("B04", var),
            Err(StackError::CoordinateMismatch(_))
        ));
    }

    #[test]
    fn test_clip_selects_touching_pixels() {
        let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let cube = RasterCube::new(grid(4, 3))
            .with_variable("B04", Variable::spatial(3, 4, data).unwrap())
            .unwrap();

        let bbox = BoundingBox::new(500_015.0, 4_999_972.0, 500_025.0, 4_999_978.0);
        let clipped = cube.clip(&bbox).unwrap().unwrap();
        assert_eq!(clipped.grid.shape(), (1, 2));
        assert_eq!(clipped.variables["B04"].data, vec![9.0, 10.0]);

        let outside = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(cube.clip(&outside).unwrap().is_none());
    }

    #[test]
    fn test_time_slice_and_concat() {
        let data: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let cube = RasterCube::new(grid(2, 2))
            .with_times(vec![day(1), day(2)])
            .with_variable("B04", Variable::cube(2, 2, 2, data).unwrap())
            .unwrap();

        let second = cube.time_slice(1).unwrap();
        assert_eq!(second.variables["B04"].dims, vec![Dim::Y, Dim::X]);
        assert_eq!(second.variables["B04"].data, vec![4.0, 5.0, 6.0, 7.0]);

        let joined = RasterCube::concat_time(vec![
            (day(2), second),
            (day(1), cube.time_slice(0).unwrap()),
        ])
        .unwrap();
        assert_eq!(joined.times, vec![day(2), day(1)]);
        assert_eq!(
            joined.variables["B04"].data,
            vec![4.0, 5.0, 6.0, 7.0, 0.0, 1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn test_concat_rejects_grid_mismatch() {
        let a = RasterCube::new(grid(2, 2))
            .with_variable("B04", Variable::spatial(2, 2, vec![1.0; 4]).unwrap())
            .unwrap();
        let b = RasterCube::new(grid(3, 2))
            .with_variable("B04", Variable::spatial(2, 3, vec![1.0; 6]).unwrap())
            .unwrap();
        assert!(matches!(
            RasterCube::concat_time(vec![(day(1), a), (day(2), b)]),
            Err(StackError::CoordinateMismatch(_))
        ));
    }
}
