//! An [`AssetOpener`] serving cubes from memory.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use cube_stacker::accessor::{AssetOpener, OpenOptions};
use cube_stacker::RasterCube;
use stac_common::{AssetAccessParams, Item, RasterInfo};

use crate::generators::{constant_cube, grid_for_bbox};

/// Serves pre-built cubes keyed by `(item id, asset key)`.
///
/// The served cube's variable is renamed to the requested output name,
/// and every call is recorded.
#[derive(Debug, Default)]
pub struct InMemoryOpener {
    cubes: HashMap<(String, String), RasterCube>,
    angles: HashMap<String, RasterCube>,
    failing: HashSet<String>,
    calls: AtomicUsize,
    opened: Mutex<Vec<String>>,
}

impl InMemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// A constant cube per item and asset on the asset's declared grid.
    pub fn constant_per_item(items: &[Item], value: impl Fn(&Item, &str) -> f32) -> Self {
        let mut opener = Self::new();
        for item in items {
            for (key, asset) in &item.assets {
                let info = RasterInfo::from_asset(item, asset, "proj:code");
                let (Some(crs), Some(bbox), Some(res)) =
                    (info.crs, info.proj_bbox, info.spatial_resolution)
                else {
                    continue;
                };
                let grid = grid_for_bbox(crs, &bbox, res, 256);
                opener.insert(&item.id, key, constant_cube(key, grid, value(item, key)));
            }
        }
        opener
    }

    pub fn insert(&mut self, item_id: &str, asset_key: &str, cube: RasterCube) {
        self.cubes
            .insert((item_id.to_string(), asset_key.to_string()), cube);
    }

    /// Angle grids served for `item_id`, narrowed to the requested bands.
    pub fn insert_angles(&mut self, item_id: &str, cube: RasterCube) {
        self.angles.insert(item_id.to_string(), cube);
    }

    /// Make every open of `item_id` fail.
    pub fn fail_item(mut self, item_id: &str) -> Self {
        self.failing.insert(item_id.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `item_id/asset_key` of every open call, in call order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

impl AssetOpener for InMemoryOpener {
    fn open(&self, params: &AssetAccessParams, _options: &OpenOptions) -> anyhow::Result<RasterCube> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(format!("{}/{}", params.item_id, params.name_origin));
        }

        if self.failing.contains(&params.item_id) {
            anyhow::bail!("simulated read failure for {}", params.href);
        }
        let cube = self
            .cubes
            .get(&(params.item_id.clone(), params.name_origin.clone()))
            .ok_or_else(|| anyhow::anyhow!("no cube for {}", params.href))?;

        let mut cube = cube.clone();
        let variables = std::mem::take(&mut cube.variables);
        for (_, variable) in variables {
            cube.insert_variable(params.name.clone(), variable)?;
        }
        Ok(cube)
    }

    fn open_angles(&self, item: &Item, bands: &[String]) -> anyhow::Result<Option<RasterCube>> {
        if self.failing.contains(&item.id) {
            anyhow::bail!("simulated granule metadata failure for {}", item.id);
        }
        let Some(cube) = self.angles.get(&item.id) else {
            return Ok(None);
        };
        let mut cube = cube.clone();
        cube.variables.retain(|name, _| {
            name.starts_with("solar_angle_") || bands.iter().any(|b| name.ends_with(&format!("_{}", b)))
        });
        Ok(Some(cube))
    }
}
