//! Property-based tests for normalization and content round trips.

mod common;

use arkiv::path::{normalize_entry_path, normalize_preserving_kind};
use arkiv::{Batch, ContainerSource, WriteMode};
use common::{temp_dir, zip_fixture};
use proptest::prelude::*;

fn line_strategy() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-zA-Z0-9 äöü€.,;-]{0,24}", 0..12)
}

proptest! {
    #[test]
    fn normalization_is_idempotent(path in "[a-zA-Z0-9./\\\\:_ -]{0,48}", directory in any::<bool>()) {
        let once = normalize_entry_path(&path, directory);
        prop_assert_eq!(normalize_entry_path(&once, directory), once.clone());
        prop_assert_eq!(normalize_preserving_kind(&once), once.clone());
        prop_assert!(!once.contains('\\'));
        prop_assert!(!once.starts_with('/'));
    }

    #[test]
    fn kind_marker_follows_request(path in "[a-z]{1,8}(/[a-z]{1,8}){0,3}/?") {
        prop_assert!(normalize_entry_path(&path, true).ends_with('/'));
        prop_assert!(!normalize_entry_path(&path, false).ends_with('/'));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn bytes_round_trip(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let dir = temp_dir();
        let source = ContainerSource::from_path(zip_fixture(dir.path(), "p.zip", &[]));

        let mut batch = Batch::default();
        batch.write_bytes(&source, "blob", &data, WriteMode::Truncate).unwrap();
        batch.dispose().unwrap();

        let mut batch = Batch::default();
        let read = batch.read_bytes(&source, "blob").unwrap().unwrap_or_default();
        prop_assert_eq!(read, data);
    }

    #[test]
    fn lines_round_trip(lines in line_strategy()) {
        let dir = temp_dir();
        let source = ContainerSource::from_path(zip_fixture(dir.path(), "l.zip", &[]));

        let mut batch = Batch::default();
        batch.write_lines(&source, "text", &lines, WriteMode::Truncate).unwrap();
        batch.dispose().unwrap();

        let mut batch = Batch::default();
        prop_assert_eq!(batch.read_lines(&source, "text").unwrap(), lines);
    }
}
