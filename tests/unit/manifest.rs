//! Manifest durability tests

use crate::support::items;
use mix_downloader::output::{read_manifest, write_manifest, OutputError};
use tempfile::TempDir;

#[test]
fn test_every_truncation_fails_to_decode() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("manifest.json");
    write_manifest(&path, &items(3)).unwrap();
    let complete = std::fs::read(&path).unwrap();

    let truncated = temp.path().join("truncated.json");
    for len in 0..complete.len() {
        std::fs::write(&truncated, &complete[..len]).unwrap();
        let result = read_manifest(&truncated);
        assert!(
            matches!(result, Err(OutputError::InvalidManifest { .. })),
            "prefix of {len} bytes decoded as a manifest"
        );
    }
}

#[test]
fn test_entries_follow_discovery_order() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("manifest.json");

    write_manifest(&path, &items(12)).unwrap();
    let entries = read_manifest(&path).unwrap();

    let ids: Vec<_> = entries.iter().map(|e| e.id.clone()).collect();
    let expected: Vec<_> = (0..12).map(|i| format!("t{i}")).collect();
    assert_eq!(ids, expected);
}

#[test]
fn test_empty_group_writes_empty_array() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("manifest.json");

    write_manifest(&path, &[]).unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(raw, serde_json::json!([]));
    assert!(read_manifest(&path).unwrap().is_empty());
}

#[test]
fn test_manifest_is_a_json_array_of_objects() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("manifest.json");
    write_manifest(&path, &items(2)).unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    let first = &raw.as_array().unwrap()[0];

    assert_eq!(first["id"], "t0");
    assert_eq!(first["groupId"], "g");
    assert_eq!(first["duration"], 180);
    assert_eq!(first["title"], "Track 0");
    assert_eq!(first["artist"], "Artist");
    assert!(first["cover"].is_null());
}

#[test]
fn test_object_instead_of_array_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("manifest.json");
    std::fs::write(&path, br#"{"id": "1"}"#).unwrap();

    assert!(matches!(
        read_manifest(&path),
        Err(OutputError::InvalidManifest { .. })
    ));
}

#[test]
fn test_missing_manifest_is_an_io_error() {
    let temp = TempDir::new().unwrap();

    assert!(matches!(
        read_manifest(&temp.path().join("absent.json")),
        Err(OutputError::IoError(_))
    ));
}
