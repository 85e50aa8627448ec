//! Integration tests: grouping of Sentinel-2-like items and the warnings it emits.

use cube_stacker::{filter_items, group_by_solar_day};
use stac_common::BoundingBox;
use test_utils::{bbox, june, S2ItemFixture, WarnCounter};

fn hamburg_item(id: &str, day: u32, version: f64) -> stac_common::Item {
    S2ItemFixture::new(id, "32UNE", 32, bbox::hamburg(), june(day))
        .with_version(version)
        .build()
}

#[test]
fn test_third_item_in_cell_dropped_with_one_warning() {
    let items = vec![
        hamburg_item("first", 1, 5.0),
        hamburg_item("second", 1, 5.0),
        hamburg_item("third", 1, 5.0),
    ];

    let counter = WarnCounter::new();
    let grouped =
        tracing::subscriber::with_default(counter.subscriber(), || group_by_solar_day(&items));

    assert_eq!(counter.warnings(), 1);
    assert_eq!(grouped.shape(), (1, 1, 2));
    assert_eq!(grouped.get(0, 0, 0).unwrap().id, "first");
    assert_eq!(grouped.get(0, 0, 1).unwrap().id, "second");

    let dropped = grouped.dropped();
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].item_id, "third");
    assert_eq!(dropped[0].tile_id, "MGRS-32UNE");
    assert_eq!(dropped[0].kept, ["first".to_string(), "second".to_string()]);
}

#[test]
fn test_reprocessed_item_replaces_older_version() {
    let items = vec![
        hamburg_item("baseline_4", 1, 4.0),
        hamburg_item("baseline_5", 1, 5.0),
    ];

    let counter = WarnCounter::new();
    let grouped =
        tracing::subscriber::with_default(counter.subscriber(), || group_by_solar_day(&items));

    assert_eq!(counter.warnings(), 0);
    assert_eq!(grouped.items_at(0, 0).len(), 1);
    assert_eq!(grouped.get(0, 0, 0).unwrap().id, "baseline_5");
}

#[test]
fn test_days_sorted_and_keyed_by_acquisition() {
    let items = vec![
        hamburg_item("later", 4, 5.0),
        hamburg_item("earlier", 2, 5.0),
    ];
    let grouped = group_by_solar_day(&items);

    assert_eq!(grouped.times().len(), 2);
    assert_eq!(grouped.times()[0], june(2).naive_utc());
    let ids = grouped.item_ids_by_time();
    let values: Vec<_> = ids.values().cloned().collect();
    assert_eq!(values, vec![vec!["earlier".to_string()], vec!["later".to_string()]]);
}

#[test]
fn test_near_global_footprints_filtered_with_warning() {
    let mut broken = hamburg_item("broken", 1, 5.0);
    broken.bbox = BoundingBox::new(-179.9, 70.0, 179.9, 71.0);
    let items = vec![hamburg_item("fine", 1, 5.0), broken];

    let counter = WarnCounter::new();
    let kept = tracing::subscriber::with_default(counter.subscriber(), || {
        filter_items(items, 20.0)
    });

    assert_eq!(counter.warnings(), 1);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].id, "fine");
}
