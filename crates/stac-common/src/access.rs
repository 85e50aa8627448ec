//! Asset access parameters and href decoding.
//!
//! Access parameters are derived once per (item, asset) and kept in a side
//! table keyed by asset name. The stacking engine never interprets them; it
//! only forwards them to the caller-supplied opener.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{StacError, StacResult};
use crate::item::Item;

/// AWS regions accepted in S3 hrefs.
const AWS_REGION_NAMES: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "af-south-1",
    "ap-east-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ca-central-1",
    "ca-west-1",
    "eu-central-1",
    "eu-central-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-south-1",
    "eu-south-2",
    "eu-north-1",
    "il-central-1",
    "me-south-1",
    "me-central-1",
    "sa-east-1",
    "us-gov-east-1",
    "us-gov-west-1",
];

/// Raster encoding of an asset, used to pick a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatId {
    GeoTiff,
    Jp2,
    NetCdf,
    Zarr,
    Unknown,
}

impl FormatId {
    /// Guess the format from a media type, falling back to the href's extension.
    pub fn detect(media_type: Option<&str>, href: &str) -> Self {
        if let Some(media_type) = media_type {
            let mt = media_type.to_lowercase();
            if mt.contains("geotiff") || mt.contains("image/tiff") {
                return FormatId::GeoTiff;
            }
            if mt.contains("jp2") {
                return FormatId::Jp2;
            }
            if mt.contains("netcdf") {
                return FormatId::NetCdf;
            }
            if mt.contains("zarr") {
                return FormatId::Zarr;
            }
        }

        let path = href.split(['?', '#']).next().unwrap_or(href).to_lowercase();
        match path.rsplit('.').next() {
            Some("tif") | Some("tiff") => FormatId::GeoTiff,
            Some("jp2") => FormatId::Jp2,
            Some("nc") => FormatId::NetCdf,
            Some("zarr") => FormatId::Zarr,
            _ => FormatId::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatId::GeoTiff => "geotiff",
            FormatId::Jp2 => "jp2",
            FormatId::NetCdf => "netcdf",
            FormatId::Zarr => "zarr",
            FormatId::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An href split into transport protocol, storage root and path.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedHref {
    pub protocol: String,
    pub root: String,
    pub fs_path: String,
    pub storage_options: Map<String, Value>,
}

/// Everything needed to open one raster asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetAccessParams {
    /// Name of the output variable
    pub name: String,
    /// Asset key in the item
    pub name_origin: String,
    pub protocol: String,
    pub root: String,
    pub fs_path: String,
    pub storage_options: Map<String, Value>,
    pub format_id: FormatId,
    pub href: String,
    pub item_id: String,
}

impl AssetAccessParams {
    /// Derive access parameters for `asset_name` of `item`.
    pub fn from_item(item: &Item, asset_name: &str) -> StacResult<Self> {
        let asset = item.asset(asset_name)?;
        let decoded = decode_href(&asset.href)?;
        Ok(Self {
            name: asset_name.to_string(),
            name_origin: asset_name.to_string(),
            protocol: decoded.protocol,
            root: decoded.root,
            fs_path: decoded.fs_path,
            storage_options: decoded.storage_options,
            format_id: FormatId::detect(asset.media_type.as_deref(), &asset.href),
            href: asset.href.clone(),
            item_id: item.id.clone(),
        })
    }

    /// Rename the output variable, keeping the original asset key.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Access parameters of several assets of one item, keyed by asset name.
pub fn access_table(
    item: &Item,
    asset_names: &[String],
) -> StacResult<BTreeMap<String, AssetAccessParams>> {
    asset_names
        .iter()
        .map(|name| Ok((name.clone(), AssetAccessParams::from_item(item, name)?)))
        .collect()
}

/// Split an href into protocol, root, path and storage options.
///
/// AWS S3 hrefs are recognised in these forms:
/// - `s3://<bucket>/<path>`
/// - `https://s3.amazonaws.com/<bucket>/<path>`
/// - `https://<bucket>.s3.amazonaws.com/<path>`
/// - `https://s3-<region>.amazonaws.com/<bucket>/<path>`
/// - `https://<bucket>.s3-<region>.amazonaws.com/<path>`
/// - `https://<bucket>.s3.<region>.amazonaws.com/<path>`
///
/// A region found in the href becomes `client_kwargs.region_name`.
pub fn decode_href(href: &str) -> StacResult<DecodedHref> {
    if let Some(decoded) = decode_aws_s3_href(href)? {
        return Ok(decoded);
    }

    let (protocol, remain) = href
        .split_once("://")
        .ok_or_else(|| StacError::invalid_href(href, "missing protocol"))?;
    let (root, fs_path) = match protocol {
        "file" => ("", remain),
        _ => remain.split_once('/').unwrap_or((remain, "")),
    };

    Ok(DecodedHref {
        protocol: protocol.to_string(),
        root: root.to_string(),
        fs_path: fs_path.to_string(),
        storage_options: Map::new(),
    })
}

fn decode_aws_s3_href(href: &str) -> StacResult<Option<DecodedHref>> {
    let (bucket, fs_path, region) = if let Some(rest) = href.strip_prefix("s3://") {
        match rest.split_once('/') {
            Some((bucket, path)) => (bucket, path, None),
            None => return Ok(None),
        }
    } else if let Some(rest) = href.strip_prefix("https://") {
        let Some((host, path)) = rest.split_once('/') else {
            return Ok(None);
        };
        let Some(prefix) = host.strip_suffix(".amazonaws.com") else {
            return Ok(None);
        };

        if prefix == "s3" {
            // path style
            match path.split_once('/') {
                Some((bucket, path)) => (bucket, path, None),
                None => return Ok(None),
            }
        } else if let Some(region) = prefix.strip_prefix("s3-") {
            match path.split_once('/') {
                Some((bucket, path)) => (bucket, path, Some(region)),
                None => return Ok(None),
            }
        } else if let Some(bucket) = prefix.strip_suffix(".s3") {
            (bucket, path, None)
        } else if let Some((bucket, region)) = prefix.rsplit_once(".s3-") {
            (bucket, path, Some(region))
        } else if let Some((bucket, region)) = prefix.rsplit_once(".s3.") {
            (bucket, path, Some(region))
        } else {
            return Ok(None);
        }
    } else {
        return Ok(None);
    };

    if !is_valid_bucket_name(bucket) {
        return Err(StacError::invalid_href(
            href,
            format!("'{}' is not a valid AWS S3 bucket name", bucket),
        ));
    }

    let mut storage_options = Map::new();
    if let Some(region) = region {
        if !AWS_REGION_NAMES.contains(&region) {
            return Err(StacError::invalid_href(
                href,
                format!("'{}' is not a known AWS region", region),
            ));
        }
        storage_options.insert("client_kwargs".to_string(), json!({ "region_name": region }));
    }

    Ok(Some(DecodedHref {
        protocol: "s3".to_string(),
        root: bucket.to_string(),
        fs_path: fs_path.to_string(),
        storage_options,
    }))
}

/// AWS bucket naming rules: 3-63 chars of `[a-z0-9.-]`, alphanumeric at both
/// ends, not an IPv4 address, no reserved prefixes or suffixes.
fn is_valid_bucket_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if !(3..=63).contains(&bytes.len()) {
        return false;
    }
    let allowed = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'.' || *b == b'-';
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !bytes.iter().all(allowed) || !alnum(&bytes[0]) || !alnum(&bytes[bytes.len() - 1]) {
        return false;
    }
    if name.parse::<std::net::Ipv4Addr>().is_ok() {
        return false;
    }
    let reserved_prefix = ["xn--", "sthree-"].iter().any(|p| name.starts_with(p));
    let reserved_suffix = ["--ol-s3", "-s3alias"].iter().any(|s| name.ends_with(s));
    !(reserved_prefix || reserved_suffix)
}
