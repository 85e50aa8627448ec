//! STAC item and asset records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::bbox::BoundingBox;
use crate::crs::CrsCode;
use crate::error::{StacError, StacResult};
use crate::time::parse_datetime;

/// One acquisition's metadata record. Read-only to the stacking engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawItem", into = "RawItem")]
pub struct Item {
    pub id: String,
    pub collection: Option<String>,
    /// Footprint in geographic coordinates
    pub bbox: BoundingBox,
    /// Acquisition time
    pub datetime: DateTime<Utc>,
    pub properties: Map<String, Value>,
    pub assets: BTreeMap<String, Asset>,
}

/// A raster asset referenced by an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub href: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(flatten)]
    pub extra_fields: Map<String, Value>,
}

impl Asset {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            media_type: None,
            title: None,
            roles: Vec::new(),
            extra_fields: Map::new(),
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra_fields.insert(key.into(), value);
        self
    }
}

impl Item {
    pub fn new(id: impl Into<String>, bbox: BoundingBox, datetime: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            collection: None,
            bbox,
            datetime,
            properties: Map::new(),
            assets: BTreeMap::new(),
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_asset(mut self, name: impl Into<String>, asset: Asset) -> Self {
        self.assets.insert(name.into(), asset);
        self
    }

    /// Parse a STAC item JSON document.
    pub fn from_json(json: &str) -> StacResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Center longitude of the footprint.
    pub fn center_lon(&self) -> f64 {
        self.bbox.center().0
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Property rendered as a string; numbers are formatted.
    pub fn property_string(&self, key: &str) -> Option<String> {
        value_as_string(self.properties.get(key)?)
    }

    /// Property as a float; numeric strings are parsed.
    pub fn property_f64(&self, key: &str) -> Option<f64> {
        value_as_f64(self.properties.get(key)?)
    }

    /// Look up an asset by name.
    pub fn asset(&self, name: &str) -> StacResult<&Asset> {
        self.assets.get(name).ok_or_else(|| StacError::AssetNotFound {
            item_id: self.id.clone(),
            asset: name.to_string(),
        })
    }

    /// Native CRS declared on the item under `key` (e.g. `proj:code`), falling back to `proj:epsg`.
    pub fn native_crs(&self, key: &str) -> Option<CrsCode> {
        crs_from_fields(&self.properties, key)
    }
}

pub(crate) fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn crs_from_fields(fields: &Map<String, Value>, key: &str) -> Option<CrsCode> {
    let parse = |v: &Value| match v {
        Value::String(s) => CrsCode::parse(s).ok(),
        Value::Number(n) => n.as_u64().and_then(|c| CrsCode::from_epsg(c as u32).ok()),
        _ => None,
    };
    fields
        .get(key)
        .and_then(parse)
        .or_else(|| fields.get("proj:epsg").and_then(parse))
}

/// Wire layout of a STAC item (datetime lives inside `properties`).
#[derive(Serialize, Deserialize)]
struct RawItem {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    collection: Option<String>,
    bbox: BoundingBox,
    #[serde(default)]
    properties: Map<String, Value>,
    #[serde(default)]
    assets: BTreeMap<String, Asset>,
}

impl TryFrom<RawItem> for Item {
    type Error = StacError;

    fn try_from(raw: RawItem) -> Result<Self, Self::Error> {
        let datetime = raw
            .properties
            .get("datetime")
            .and_then(Value::as_str)
            .or_else(|| raw.properties.get("start_datetime").and_then(Value::as_str))
            .ok_or_else(|| StacError::invalid_item(&raw.id, "missing datetime"))?;
        let datetime =
            parse_datetime(datetime).map_err(|e| StacError::invalid_item(&raw.id, e.to_string()))?;

        Ok(Item {
            id: raw.id,
            collection: raw.collection,
            bbox: raw.bbox,
            datetime,
            properties: raw.properties,
            assets: raw.assets,
        })
    }
}

impl From<Item> for RawItem {
    fn from(item: Item) -> Self {
        let mut properties = item.properties;
        properties.insert(
            "datetime".to_string(),
            Value::String(item.datetime.to_rfc3339()),
        );
        RawItem {
            id: item.id,
            collection: item.collection,
            bbox: item.bbox,
            properties,
            assets: item.assets,
        }
    }
}
