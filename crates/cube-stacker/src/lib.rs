//! Data-Cube Stacking and Mosaicking for STAC Items
//!
//! This crate turns a list of STAC items into one regular spatiotemporal
//! cube. Items are bucketed by solar day and tile, each native CRS (UTM
//! zone) is assembled on its own Zarr-backed canvas, and the zones are
//! finally resampled onto the requested grid and merged take-first.
//!
//! - **No decoding**: raster files are opened by a caller-supplied [`AssetOpener`]
//! - **Native lattice**: canvases snap to the item pixels, so tiles land without resampling
//! - **Consistent radiometry**: items of one asset must agree on nodata, scale and offset
//!
//! # Architecture
//!
//! ```text
//! Vec<Item>
//!      │
//!      ▼
//! filter_items + group_by_solar_day
//!      │
//!      ├─► GroupedItems (time × tile × slot)
//!      │
//!      ▼
//! stack()
//!      │
//!      ├─► split tiles by native CRS
//!      │
//!      ├─► per zone, per asset: allocate_canvas
//!      │         │
//!      │         ├─► open slots ─► mosaic_take_first
//!      │         │
//!      │         └─► resample_soft onto the tile window ─► Canvas::merge_window
//!      │
//!      ├─► apply_radiometry + merge_assets
//!      │
//!      ├─► merge_utm_zones onto the target grid
//!      │
//!      └─► add_angles (optional, Sentinel-2)
//!               │
//!               ▼
//!          RasterCube
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cube_stacker::{stack_items, variant_for_store, StackParams};
//! use stac_common::{BoundingBox, CrsCode};
//!
//! let variant = variant_for_store("stac-cdse", Some("sentinel-2-l2a"));
//! let params = StackParams::new(BoundingBox::new(9.9, 53.4, 10.1, 53.6), CrsCode::Epsg4326, 0.0001)
//!     .with_asset_names(["B04", "B08", "SCL"]);
//!
//! let cube = stack_items(items, &my_opener, variant.as_ref(), &params)?;
//! ```

pub mod accessor;
pub mod angles;
pub mod canvas;
pub mod config;
pub mod error;
pub mod grouping;
pub mod merge;
pub mod mosaic;
pub mod resample;
pub mod scaling;
pub mod stack;
pub mod types;

// Re-export commonly used types at crate root
pub use accessor::{
    variant_for_store, AssetOpener, ExecutionMode, GenericVariant, OpenOptions,
    Sentinel2CdseVariant, Sentinel2PlanetaryComputerVariant, StackVariant,
};
pub use angles::{add_angles, angle_target_grid, SOLAR_ANGLE, VIEWING_ANGLE};
pub use canvas::{allocate_canvas, Canvas};
pub use config::{InterpolationMethod, StackConfig};
pub use error::{Result, StackError};
pub use grouping::{
    filter_items, group_by_solar_day, group_by_solar_day_with, DroppedItem, GroupedItems,
    ItemConventions,
};
pub use merge::{merge_assets, merge_utm_zones};
pub use mosaic::{mosaic_take_first, mosaic_take_first_across_time};
pub use resample::resample_soft;
pub use resample::interpolation::{bilinear_interpolate, nearest_interpolate};
pub use scaling::{apply_radiometry, resolve_radiometry};
pub use stack::{stack, stack_items, StackParams};
pub use types::{Dim, RasterCube, Variable};
