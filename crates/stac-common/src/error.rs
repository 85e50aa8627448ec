//! Error types shared by the stacking crates.

use thiserror::Error;

use crate::bbox::BboxParseError;
use crate::crs::CrsParseError;

/// Result type alias using StacError.
pub type StacResult<T> = Result<T, StacError>;

/// Errors raised while interpreting STAC metadata and grid definitions.
#[derive(Debug, Error)]
pub enum StacError {
    // === Grid Errors ===
    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    // === Metadata Errors ===
    #[error("Invalid item '{item_id}': {message}")]
    InvalidItem { item_id: String, message: String },

    #[error("Asset '{asset}' not found in item '{item_id}'")]
    AssetNotFound { item_id: String, asset: String },

    #[error("Invalid href '{href}': {message}")]
    InvalidHref { href: String, message: String },

    #[error(transparent)]
    Crs(#[from] CrsParseError),

    #[error(transparent)]
    Bbox(#[from] BboxParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StacError {
    /// Create an InvalidGrid error.
    pub fn invalid_grid(msg: impl Into<String>) -> Self {
        Self::InvalidGrid(msg.into())
    }

    /// Create an InvalidItem error.
    pub fn invalid_item(item_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidItem {
            item_id: item_id.into(),
            message: message.into(),
        }
    }

    /// Create an InvalidHref error.
    pub fn invalid_href(href: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidHref {
            href: href.into(),
            message: message.into(),
        }
    }
}
