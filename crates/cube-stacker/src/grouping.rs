//! Grouping of items into `(time, tile, slot)` cells.
//!
//! Items are bucketed by nominal solar date and tile id. A `(date, tile)`
//! pair holds at most two acquisitions per processing version; of several
//! versions only the newest one that has data survives.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use stac_common::time::{iso_timestamp, solar_date};
use stac_common::Item;
use tracing::{debug, warn};

/// Duplicate acquisitions kept per `(date, tile)`.
pub const NUM_SLOTS: usize = 2;

/// Processing version assumed when an item declares none.
pub const DEFAULT_PROCESSING_VERSION: f64 = 1.0;

/// Property keys an item collection uses for grouping.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemConventions {
    /// Property holding the spatial tile id
    pub tile_id_key: String,
    /// Properties holding the processing version, in lookup order
    pub version_keys: Vec<String>,
    /// Property holding the native CRS
    pub crs_key: String,
}

impl Default for ItemConventions {
    fn default() -> Self {
        Self {
            tile_id_key: "grid:code".to_string(),
            version_keys: vec![
                "processing:version".to_string(),
                "s2:processing_baseline".to_string(),
            ],
            crs_key: "proj:code".to_string(),
        }
    }
}

impl ItemConventions {
    /// Tile id of `item`; items without one form their own tile.
    pub fn tile_id(&self, item: &Item) -> String {
        item.property_string(&self.tile_id_key)
            .unwrap_or_else(|| item.id.clone())
    }

    /// Processing version of `item`.
    pub fn processing_version(&self, item: &Item) -> f64 {
        self.version_keys
            .iter()
            .find_map(|key| item.property_f64(key))
            .unwrap_or(DEFAULT_PROCESSING_VERSION)
    }
}

/// An item dropped because its `(date, tile, version)` cell was full.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedItem {
    pub item_id: String,
    pub date: NaiveDate,
    pub tile_id: String,
    /// Ids of the two items that kept their slots
    pub kept: [String; NUM_SLOTS],
}

/// Items indexed by `(time, tile, slot)`.
#[derive(Debug, Clone)]
pub struct GroupedItems {
    items: Vec<Item>,
    dates: Vec<NaiveDate>,
    times: Vec<NaiveDateTime>,
    tile_ids: Vec<String>,
    /// Row-major `[time][tile][slot]` indices into `items`
    cells: Vec<Option<usize>>,
    dropped: Vec<DroppedItem>,
}

impl GroupedItems {
    /// Nominal solar dates, ascending.
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Time coordinate: acquisition time of the first item of each date.
    pub fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    /// Tile ids, sorted.
    pub fn tile_ids(&self) -> &[String] {
        &self.tile_ids
    }

    pub fn num_slots(&self) -> usize {
        NUM_SLOTS
    }

    /// `(times, tiles, slots)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.times.len(), self.tile_ids.len(), NUM_SLOTS)
    }

    pub fn len(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every item that was given a slot.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.cells.iter().flatten().map(|&i| &self.items[i])
    }

    /// Items dropped as third or later duplicates.
    pub fn dropped(&self) -> &[DroppedItem] {
        &self.dropped
    }

    fn index(&self, t: usize, tile: usize, slot: usize) -> usize {
        (t * self.tile_ids.len() + tile) * NUM_SLOTS + slot
    }

    pub fn get(&self, t: usize, tile: usize, slot: usize) -> Option<&Item> {
        if t >= self.times.len() || tile >= self.tile_ids.len() || slot >= NUM_SLOTS {
            return None;
        }
        self.cells[self.index(t, tile, slot)].map(|i| &self.items[i])
    }

    /// Occupied slots of one `(time, tile)` cell, in slot order.
    pub fn items_at(&self, t: usize, tile: usize) -> Vec<&Item> {
        (0..NUM_SLOTS).filter_map(|s| self.get(t, tile, s)).collect()
    }

    /// Every item of one time step, tile-major.
    pub fn items_at_time(&self, t: usize) -> Vec<&Item> {
        (0..self.tile_ids.len())
            .flat_map(|tile| self.items_at(t, tile))
            .collect()
    }

    /// First item found for a tile over all time steps.
    pub fn first_item_for_tile(&self, tile: usize) -> Option<&Item> {
        (0..self.times.len()).find_map(|t| self.get(t, tile, 0))
    }

    /// Contributing item ids per ISO time step.
    pub fn item_ids_by_time(&self) -> BTreeMap<String, Vec<String>> {
        self.times
            .iter()
            .enumerate()
            .map(|(t, time)| {
                let ids = self.items_at_time(t).iter().map(|i| i.id.clone()).collect();
                (iso_timestamp(time), ids)
            })
            .collect()
    }

    /// Restrict to a subset of tiles, keeping only time steps that still hold data.
    ///
    /// Time coordinates are kept, so subsets of one grouping stay aligned in time.
    pub fn select_tiles(&self, tiles: &[usize]) -> GroupedItems {
        let mut dates = Vec::new();
        let mut times = Vec::new();
        let mut cells = Vec::new();
        for t in 0..self.times.len() {
            let row: Vec<Option<usize>> = tiles
                .iter()
                .flat_map(|&tile| (0..NUM_SLOTS).map(move |s| (tile, s)))
                .map(|(tile, s)| self.cells[self.index(t, tile, s)])
                .collect();
            if row.iter().all(Option::is_none) {
                continue;
            }
            dates.push(self.dates[t]);
            times.push(self.times[t]);
            cells.extend(row);
        }
        GroupedItems {
            items: self.items.clone(),
            dates,
            times,
            tile_ids: tiles.iter().map(|&i| self.tile_ids[i].clone()).collect(),
            cells,
            dropped: Vec::new(),
        }
    }
}

/// Drop items whose geographic bbox spans `max_width` degrees or more.
///
/// Such footprints come from records crossing the antimeridian that were
/// encoded as near-global boxes.
pub fn filter_items(items: Vec<Item>, max_width: f64) -> Vec<Item> {
    items
        .into_iter()
        .filter(|item| {
            let width = item.bbox.width().abs();
            if width >= max_width {
                warn!(item_id = %item.id, width, "Dropping item with implausible bbox width");
                false
            } else {
                true
            }
        })
        .collect()
}

/// Group items with the default property conventions.
pub fn group_by_solar_day(items: &[Item]) -> GroupedItems {
    group_by_solar_day_with(items, &ItemConventions::default())
}

/// Group items by solar date, tile id, slot and processing version.
pub fn group_by_solar_day_with(items: &[Item], conventions: &ItemConventions) -> GroupedItems {
    let keys: Vec<(NaiveDate, String, f64)> = items
        .iter()
        .map(|item| {
            (
                solar_date(item.datetime, item.center_lon()),
                conventions.tile_id(item),
                conventions.processing_version(item),
            )
        })
        .collect();

    let mut dates: Vec<NaiveDate> = keys.iter().map(|k| k.0).collect();
    dates.sort();
    dates.dedup();
    let mut tile_ids: Vec<String> = keys.iter().map(|k| k.1.clone()).collect();
    tile_ids.sort();
    tile_ids.dedup();
    let mut versions: Vec<f64> = keys.iter().map(|k| k.2).collect();
    versions.sort_by(|a, b| b.total_cmp(a));
    versions.dedup();

    let n_tiles = tile_ids.len();
    let n_versions = versions.len();
    let full_index =
        |d: usize, tile: usize, slot: usize, v: usize| ((d * n_tiles + tile) * NUM_SLOTS + slot) * n_versions + v;

    let mut full: Vec<Option<usize>> = vec![None; dates.len() * n_tiles * NUM_SLOTS * n_versions];
    let mut dropped = Vec::new();
    for (i, (date, tile_id, version)) in keys.iter().enumerate() {
        let d = dates.partition_point(|x| x < date);
        let tile = tile_ids.partition_point(|x| x < tile_id);
        let v = versions
            .iter()
            .position(|x| x == version)
            .unwrap_or_default();

        match (0..NUM_SLOTS).find(|&s| full[full_index(d, tile, s, v)].is_none()) {
            Some(slot) => full[full_index(d, tile, slot, v)] = Some(i),
            None => {
                let kept = [0, 1].map(|s| {
                    full[full_index(d, tile, s, v)]
                        .map(|k| items[k].id.clone())
                        .unwrap_or_default()
                });
                warn!(
                    item_id = %items[i].id,
                    kept_0 = %kept[0],
                    kept_1 = %kept[1],
                    date = %date,
                    tile_id = %tile_id,
                    "More than two items for one date, tile and processing version; dropping item"
                );
                dropped.push(DroppedItem {
                    item_id: items[i].id.clone(),
                    date: *date,
                    tile_id: tile_id.clone(),
                    kept,
                });
            }
        }
    }

    // newest version holding data wins, slot by slot
    let cells: Vec<Option<usize>> = (0..dates.len() * n_tiles * NUM_SLOTS)
        .map(|cell| (0..n_versions).find_map(|v| full[cell * n_versions + v]))
        .collect();

    let times: Vec<NaiveDateTime> = (0..dates.len())
        .map(|d| {
            (0..n_tiles)
                .find_map(|tile| cells[(d * n_tiles + tile) * NUM_SLOTS])
                .map(|i| items[i].datetime.naive_utc())
                .unwrap_or_else(|| dates[d].and_time(chrono::NaiveTime::MIN))
        })
        .collect();

    debug!(
        items = items.len(),
        times = dates.len(),
        tiles = n_tiles,
        versions = n_versions,
        "Grouped items"
    );

    GroupedItems {
        items: items.to_vec(),
        dates,
        times,
        tile_ids,
        cells,
        dropped,
    }
}
