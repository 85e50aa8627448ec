//! Coordinate reference system transformations.
//!
//! Implements the projections used by Sentinel-2 stacks (UTM, ETRS89-LAEA,
//! Web Mercator) from scratch, plus densified bounding-box reprojection.
//! Any other EPSG code goes through proj4rs.

pub mod error;
pub mod geographic;
pub mod laea;
pub mod mercator;
pub mod proj4;
pub mod transform;
pub mod utm;

pub use error::{ProjectionError, Result};
pub use geographic::Ellipsoid;
pub use laea::LambertAzimuthalEqualArea;
pub use mercator::WebMercator;
pub use proj4::Proj4Projection;
pub use transform::{
    reproject_bbox, reproject_bbox_with, Projection, Transformer, DEFAULT_DENSIFY_POINTS,
};
pub use utm::TransverseMercator;
