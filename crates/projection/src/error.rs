//! Projection errors.

use thiserror::Error;

/// Errors raised by coordinate transformations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    /// The point cannot be represented in the target projection.
    #[error("point ({x}, {y}) is outside the domain of {crs}")]
    OutOfDomain { x: f64, y: f64, crs: String },

    /// A coordinate was NaN or infinite.
    #[error("non-finite coordinate ({x}, {y})")]
    NonFinite { x: f64, y: f64 },

    /// No sampled point of a bounding box could be transformed.
    #[error("bounding box {0:?} could not be transformed")]
    EmptyBounds([f64; 4]),

    /// A CRS definition could not be turned into a projection.
    #[error("cannot build a projection for {crs}: {reason}")]
    Definition { crs: String, reason: String },

    /// Invalid CRS identifier.
    #[error(transparent)]
    Crs(#[from] stac_common::CrsParseError),
}

impl ProjectionError {
    pub(crate) fn out_of_domain(x: f64, y: f64, crs: impl ToString) -> Self {
        Self::OutOfDomain {
            x,
            y,
            crs: crs.to_string(),
        }
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
