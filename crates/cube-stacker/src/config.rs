//! Configuration for the stacking engine.

use serde::{Deserialize, Serialize};

/// Default chunk size of canvases along y and x.
pub const DEFAULT_TILE_SIZE: usize = 1024;

/// Items whose geographic bbox is at least this wide (degrees) are dropped.
pub const DEFAULT_MAX_ITEM_BBOX_WIDTH: f64 = 20.0;

/// Configuration for building data cubes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    /// Chunk dimension of canvases (square chunks along y and x).
    pub tile_size: usize,

    /// Interpolation method used when reprojecting tiles.
    pub interpolation: InterpolationMethod,

    /// Fraction of width/height added around reprojected bounding boxes.
    pub bbox_buffer: f64,

    /// Maximum longitude span of an item footprint before it is considered broken.
    pub max_item_bbox_width: f64,

    /// Process the time steps of a canvas in parallel.
    pub parallel: bool,

    /// Points sampled per edge when reprojecting bounding boxes.
    pub densify_points: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            interpolation: InterpolationMethod::Nearest,
            bbox_buffer: 0.05,
            max_item_bbox_width: DEFAULT_MAX_ITEM_BBOX_WIDTH,
            parallel: true,
            densify_points: projection::DEFAULT_DENSIFY_POINTS,
        }
    }
}

impl StackConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("STACK_TILE_SIZE") {
            if let Ok(size) = val.parse() {
                config.tile_size = size;
            }
        }

        if let Ok(val) = std::env::var("STACK_INTERPOLATION") {
            config.interpolation = InterpolationMethod::from_str(&val);
        }

        if let Ok(val) = std::env::var("STACK_BBOX_BUFFER") {
            if let Ok(buffer) = val.parse() {
                config.bbox_buffer = buffer;
            }
        }

        if let Ok(val) = std::env::var("STACK_MAX_ITEM_BBOX_WIDTH") {
            if let Ok(width) = val.parse() {
                config.max_item_bbox_width = width;
            }
        }

        if let Ok(val) = std::env::var("STACK_PARALLEL") {
            config.parallel = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("STACK_DENSIFY_POINTS") {
            if let Ok(points) = val.parse() {
                config.densify_points = points;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 {
            return Err("tile_size must be > 0".to_string());
        }

        if !(self.bbox_buffer.is_finite() && self.bbox_buffer >= 0.0) {
            return Err("bbox_buffer must be a non-negative number".to_string());
        }

        if !(self.max_item_bbox_width > 0.0 && self.max_item_bbox_width <= 360.0) {
            return Err("max_item_bbox_width must be in (0, 360]".to_string());
        }

        if self.densify_points < 2 {
            return Err("densify_points must be >= 2".to_string());
        }

        Ok(())
    }
}

/// Interpolation used when a tile has to be reprojected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    /// Nearest neighbor (preserves exact values, required for categorical bands).
    #[default]
    Nearest,
    /// Bilinear interpolation between the four surrounding pixel centers.
    Bilinear,
}

impl InterpolationMethod {
    /// Parse from string (case-insensitive); unknown names fall back to nearest.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "bilinear" | "linear" => Self::Bilinear,
            _ => Self::Nearest,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Bilinear => "bilinear",
        }
    }
}

impl std::fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
