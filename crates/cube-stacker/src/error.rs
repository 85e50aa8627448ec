//! Error types for stacking and mosaicking.

use projection::ProjectionError;
use stac_common::StacError;
use thiserror::Error;

/// Errors that can occur while building a data cube.
#[derive(Error, Debug)]
pub enum StackError {
    /// Degenerate or non-positive grid dimensions.
    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    /// A tile could not be resampled onto its target grid.
    #[error("resampling failed: {0}")]
    Resampling(String),

    /// Contributing items declare different nodata/scale/offset for one asset.
    #[error("inconsistent radiometry for asset {asset}: {message}")]
    InconsistentRadiometry { asset: String, message: String },

    /// Slices to be joined do not share their non-time coordinates.
    #[error("coordinate mismatch: {0}")]
    CoordinateMismatch(String),

    /// Coordinate transformation failed.
    #[error("projection error: {0}")]
    Projection(#[from] ProjectionError),

    /// Failed to allocate, read or write a canvas.
    #[error("canvas error: {0}")]
    Canvas(String),

    /// Missing or malformed item metadata.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// An asset could not be opened.
    #[error("failed to open {asset} of item {item_id}: {source}")]
    OpenFailed {
        item_id: String,
        asset: String,
        #[source]
        source: anyhow::Error,
    },

    /// Nothing to operate on.
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Errors from caller-supplied collaborators.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StackError {
    /// Create an InvalidGrid error.
    pub fn invalid_grid(msg: impl Into<String>) -> Self {
        Self::InvalidGrid(msg.into())
    }

    /// Create a Resampling error.
    pub fn resampling(msg: impl Into<String>) -> Self {
        Self::Resampling(msg.into())
    }

    /// Create an InconsistentRadiometry error.
    pub fn inconsistent_radiometry(asset: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InconsistentRadiometry {
            asset: asset.into(),
            message: msg.into(),
        }
    }

    /// Create a CoordinateMismatch error.
    pub fn coordinate_mismatch(msg: impl Into<String>) -> Self {
        Self::CoordinateMismatch(msg.into())
    }

    /// Create a Canvas error.
    pub fn canvas(msg: impl Into<String>) -> Self {
        Self::Canvas(msg.into())
    }

    /// Create an InvalidMetadata error.
    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }

    /// Whether the error only affects one tile and stacking may continue.
    pub fn is_tile_local(&self) -> bool {
        matches!(
            self,
            Self::Resampling(_) | Self::OpenFailed { .. } | Self::Projection(_)
        )
    }
}

impl From<StacError> for StackError {
    fn from(err: StacError) -> Self {
        match err {
            StacError::InvalidGrid(msg) => Self::InvalidGrid(msg),
            other => Self::InvalidMetadata(other.to_string()),
        }
    }
}

/// Result type for stacking operations.
pub type Result<T> = std::result::Result<T, StackError>;
