//! Radiometric normalization of stacked assets.

use rayon::prelude::*;
use stac_common::{Item, Radiometry, RasterInfo};
use tracing::warn;

use crate::error::{Result, StackError};
use crate::types::Variable;

/// The calibration shared by every item contributing `asset`.
///
/// Returns `None` when no item declares one. Items that disagree, or a mix
/// of items with and without a declaration, are an error.
pub fn resolve_radiometry<'a>(
    items: impl IntoIterator<Item = &'a Item>,
    asset: &str,
    crs_key: &str,
) -> Result<Option<Radiometry>> {
    let mut resolved: Option<(String, Option<Radiometry>)> = None;
    for item in items {
        let Ok(entry) = item.asset(asset) else {
            continue;
        };
        let radiometry = RasterInfo::from_asset(item, entry, crs_key).radiometry();
        match &resolved {
            None => resolved = Some((item.id.clone(), radiometry)),
            Some((first_id, first)) if *first != radiometry => {
                return Err(StackError::inconsistent_radiometry(
                    asset,
                    format!(
                        "item {} declares {:?}, item {} declares {:?}",
                        first_id, first, item.id, radiometry
                    ),
                ));
            }
            Some(_) => {}
        }
    }

    let radiometry = resolved.and_then(|(_, r)| r);
    if radiometry.is_none() {
        warn!(asset = %asset, "No nodata, scale or offset declared; skipping scaling");
    }
    Ok(radiometry)
}

/// Calibrate a variable in place.
///
/// Nodata becomes NaN unless `mask_nodata` is false.
pub fn apply_radiometry(variable: &mut Variable, radiometry: &Radiometry, mask_nodata: bool) {
    if radiometry.is_identity() {
        return;
    }
    variable
        .data
        .par_iter_mut()
        .for_each(|v| *v = radiometry.apply(*v, mask_nodata));
}
