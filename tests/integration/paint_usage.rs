//! Fill usage mapping over whole documents

use serde_json::json;

use design_archiver::document::DesignDocument;
use design_archiver::fills::{FillError, PaintUsageMapper};
use design_archiver::Dimensions;

use crate::support::single_frame_document;

#[test]
fn fit_fill_sized_by_frame_and_density() {
    let document: DesignDocument = serde_json::from_value(single_frame_document()).unwrap();
    let usage = PaintUsageMapper::default().map(&document.document).unwrap();

    assert_eq!(usage.len(), 1);
    let max = usage.max_size("fillhash", Dimensions::new(800, 400)).unwrap();
    assert_eq!(max, Some(Dimensions::new(200, 100)));
    assert_eq!(usage.max_size("unknown", Dimensions::new(800, 400)).unwrap(), None);
}

#[test]
fn largest_usage_wins_across_nodes() {
    let document: DesignDocument = serde_json::from_value(json!({
        "document": {"id": "0:0", "type": "DOCUMENT", "children": [
            {"id": "0:1", "type": "CANVAS", "children": [
                {"id": "1:1", "type": "RECTANGLE",
                 "size": {"x": 40, "y": 20},
                 "relativeTransform": [[1, 0, 0], [0, 1, 0]],
                 "fills": [{"type": "IMAGE", "imageRef": "shared", "scaleMode": "FILL"}]},
                {"id": "1:2", "type": "RECTANGLE",
                 "size": {"x": 100, "y": 100},
                 "relativeTransform": [[1, 0, 50], [0, 1, 0]],
                 "fills": [{"type": "IMAGE", "imageRef": "shared", "scaleMode": "FILL"}]}
            ]}
        ]}
    }))
    .unwrap();

    let usage = PaintUsageMapper::new(1.0).map(&document.document).unwrap();
    let record = usage.get("shared").unwrap();
    assert_eq!(record.usage.len(), 2);
    // FILL on 100x100 needs max(100/1000, 100/500) = 0.2 of 1000x500
    let max = usage.max_size("shared", Dimensions::new(1000, 500)).unwrap();
    assert_eq!(max, Some(Dimensions::new(200, 100)));
}

#[test]
fn unknown_geometry_keeps_native_size() {
    let document: DesignDocument = serde_json::from_value(json!({
        "document": {"id": "0:0", "type": "DOCUMENT", "children": [
            {"id": "0:1", "type": "CANVAS", "children": [
                {"id": "1:1", "type": "GROUP", "children": [
                    {"id": "1:2", "type": "RECTANGLE",
                     "absoluteBoundingBox": {"x": 5, "y": 5, "width": 10, "height": 10},
                     "fills": [{"type": "IMAGE", "imageRef": "lost", "scaleMode": "FIT"}]}
                ]}
            ]}
        ]}
    }))
    .unwrap();

    let usage = PaintUsageMapper::default().map(&document.document).unwrap();
    let max = usage.max_size("lost", Dimensions::new(640, 480)).unwrap();
    assert_eq!(max, Some(Dimensions::new(640, 480)));
}

#[test]
fn unsupported_scale_mode_is_an_error() {
    let document: DesignDocument = serde_json::from_value(json!({
        "document": {"id": "0:0", "type": "DOCUMENT", "children": [
            {"id": "0:1", "type": "CANVAS", "children": [
                {"id": "1:1", "type": "RECTANGLE",
                 "fills": [{"type": "IMAGE", "imageRef": "odd", "scaleMode": "CROP"}]}
            ]}
        ]}
    }))
    .unwrap();

    let err = PaintUsageMapper::default().map(&document.document).unwrap_err();
    match err {
        FillError::UnsupportedScaleMode { hash, node_id, mode } => {
            assert_eq!((hash.as_str(), node_id.as_str(), mode.as_str()), ("odd", "1:1", "CROP"));
        }
        other => panic!("unexpected error {other}"),
    }
}
