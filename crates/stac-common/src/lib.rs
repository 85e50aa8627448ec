//! Common types shared by the cube stacking crates.
//!
//! - [`bbox`]: bounding boxes in any CRS
//! - [`crs`]: the CRS codes the engine understands and [`normalize_crs`]
//! - [`item`] / [`raster`]: STAC items, assets and their raster metadata
//! - [`access`]: per-asset access parameters derived from hrefs
//! - [`grid`]: regular target grids and [`build_grid`]
//! - [`time`]: solar-day bucketing and ISO time keys

pub mod access;
pub mod bbox;
pub mod crs;
pub mod error;
pub mod grid;
pub mod item;
pub mod raster;
pub mod time;

pub use access::{decode_href, AssetAccessParams, DecodedHref, FormatId};
pub use bbox::BoundingBox;
pub use crs::{normalize_crs, CrsCode, CrsParseError, IntoCrs};
pub use error::{StacError, StacResult};
pub use grid::{build_grid, GridMapping, SpatialRes, Window};
pub use item::{Asset, Item};
pub use raster::{Radiometry, RasterExtension, RasterInfo};
