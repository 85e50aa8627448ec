//! Tests for bounding boxes and the grids built from them.

use stac_common::bbox::{BboxParseError, BoundingBox};
use stac_common::{build_grid, CrsCode, GridMapping};

// ============================================================================
// Parsing tests
// ============================================================================

#[test]
fn test_parse_bbox_integer() {
    let bbox = BoundingBox::parse("0,0,100,100").unwrap();
    assert_eq!(bbox.to_array(), [0.0, 0.0, 100.0, 100.0]);
}

#[test]
fn test_parse_bbox_utm_meters() {
    let bbox = BoundingBox::parse("499980,5890200,609780,6000000").unwrap();
    assert_eq!(bbox.width(), 109_800.0);
    assert_eq!(bbox.height(), 109_800.0);
}

#[test]
fn test_parse_bbox_invalid_format_too_few() {
    let result = BoundingBox::parse("0,0,100");
    assert!(matches!(result, Err(BboxParseError::InvalidFormat(_))));
}

#[test]
fn test_parse_bbox_invalid_number() {
    let result = BoundingBox::parse("0,zero,100,100");
    assert!(matches!(result, Err(BboxParseError::InvalidNumber(_))));
}

// ============================================================================
// Geometry tests
// ============================================================================

#[test]
fn test_bbox_intersects_adjacent_edge() {
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BoundingBox::new(10.0, 0.0, 20.0, 10.0);
    // touching edges do not overlap
    assert!(!a.intersects(&b));
    assert!(a.intersection(&b).is_none());
}

#[test]
fn test_bbox_union_contains_both() {
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BoundingBox::new(5.0, -5.0, 20.0, 8.0);
    let u = a.union(&b);
    assert!(u.contains_point(0.0, -5.0));
    assert!(u.contains_point(20.0, 10.0));
}

#[test]
fn test_bbox_is_valid() {
    assert!(BoundingBox::new(0.0, 0.0, 1.0, 1.0).is_valid());
    assert!(!BoundingBox::new(0.0, 0.0, 0.0, 1.0).is_valid());
    assert!(!BoundingBox::new(1.0, 0.0, 0.0, 1.0).is_valid());
    assert!(!BoundingBox::new(f64::NAN, 0.0, 1.0, 1.0).is_valid());
}

// ============================================================================
// Grid tests
// ============================================================================

#[test]
fn test_grid_bbox_extends_half_pixel() {
    let bbox = BoundingBox::new(2.0, 50.0, 3.0, 51.0);
    let grid = build_grid(&bbox, 0.25, CrsCode::Epsg4326, 1024).unwrap();
    assert_eq!(grid.shape(), (5, 5));
    assert!(grid
        .bbox()
        .approx_eq(&BoundingBox::new(1.875, 49.875, 3.125, 51.125), 1e-12));
    assert_eq!(grid.x_coords(), vec![2.0, 2.25, 2.5, 2.75, 3.0]);
    assert_eq!(grid.y_coords(), vec![51.0, 50.75, 50.5, 50.25, 50.0]);
}

#[test]
fn test_grid_window_covers_subgrid() {
    let crs = CrsCode::Utm {
        zone: 33,
        north: true,
    };
    let grid = GridMapping::new(crs, 300_000.0, 5_000_000.0, 20.0, 100, 50, 32).unwrap();
    let inner = BoundingBox::new(300_100.0, 4_999_400.0, 300_400.0, 4_999_900.0);
    let window = grid.window_for(&inner).unwrap();
    let sub = grid.subgrid(&window).unwrap();
    assert!(sub.bbox().approx_eq(&inner, 1e-9));
    assert_eq!(sub.tile_width, 15);
    assert_eq!(sub.tile_height, 25);
}
