//! Change detection between two file indexes.
//!
//! Size + mtime is the only change heuristic; contents are never hashed.

use crate::fs::walker::{FileEntry, FileIndex};

/// Paths that differ between a baseline and a fresh scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// In the current scan only
    pub added: FileIndex,
    /// In both, with a different size or mtime (current entry kept)
    pub modified: FileIndex,
    /// In the baseline only (baseline entry kept)
    pub deleted: FileIndex,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn total_changes(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    /// Entries that have to be copied to the payload.
    pub fn to_copy(&self) -> impl Iterator<Item = &FileEntry> {
        self.added.values().chain(self.modified.values())
    }
}

/// Classify every path of `previous` and `current`.
///
/// A path lands in at most one bucket; unchanged paths are left out.
pub fn diff(previous: &FileIndex, current: &FileIndex) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for (path, entry) in current {
        match previous.get(path) {
            None => {
                changes.added.insert(path.clone(), entry.clone());
            }
            Some(old) if !old.is_same_state(entry) => {
                changes.modified.insert(path.clone(), entry.clone());
            }
            Some(_) => {}
        }
    }

    for (path, entry) in previous {
        if !current.contains_key(path) {
            changes.deleted.insert(path.clone(), entry.clone());
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn entry(path: &str, size: u64, secs: i64) -> FileEntry {
        FileEntry::new(path, size, Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn index(entries: &[FileEntry]) -> FileIndex {
        entries
            .iter()
            .map(|e| (e.relative_path.clone(), e.clone()))
            .collect()
    }

    #[test]
    fn test_empty_previous_is_all_added() {
        let current = index(&[entry("a.txt", 1, 10), entry("dir/b.txt", 2, 20)]);
        let changes = diff(&FileIndex::new(), &current);

        assert_eq!(changes.added, current);
        assert!(changes.modified.is_empty());
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn test_classifies_added_modified_deleted() {
        let previous = index(&[
            entry("same.txt", 10, 100),
            entry("grown.txt", 10, 100),
            entry("touched.txt", 10, 100),
            entry("gone.txt", 5, 50),
        ]);
        let current = index(&[
            entry("same.txt", 10, 100),
            entry("grown.txt", 11, 100),
            entry("touched.txt", 10, 101),
            entry("new.txt", 1, 200),
        ]);

        let changes = diff(&previous, &current);

        assert_eq!(changes.added.keys().collect::<Vec<_>>(), vec!["new.txt"]);
        assert_eq!(
            changes.modified.keys().collect::<Vec<_>>(),
            vec!["grown.txt", "touched.txt"]
        );
        assert_eq!(changes.deleted.keys().collect::<Vec<_>>(), vec!["gone.txt"]);
        assert_eq!(changes.deleted["gone.txt"].size, 5);
        assert_eq!(changes.total_changes(), 4);
    }

    #[test]
    fn test_subsecond_mtime_noise_is_unchanged() {
        let mut recorded = entry("a.txt", 3, 1_000);
        recorded.modified_time = Utc.timestamp_opt(1_000, 400_000_000).unwrap();
        let scanned = entry("a.txt", 3, 1_000);

        let changes = diff(&index(&[recorded]), &index(&[scanned]));
        assert!(changes.is_empty());
    }

    fn arb_index() -> impl Strategy<Value = FileIndex> {
        prop::collection::btree_map("[a-e]{1,2}(/[a-e]{1,2})?", (0u64..4, 0i64..4), 0..12)
            .prop_map(|m| {
                m.into_iter()
                    .map(|(p, (size, secs))| (p.clone(), entry(&p, size, secs)))
                    .collect()
            })
    }

    proptest! {
        #[test]
        fn prop_every_path_classified_once(a in arb_index(), b in arb_index()) {
            let changes = diff(&a, &b);

            let added: BTreeSet<_> = changes.added.keys().collect();
            let modified: BTreeSet<_> = changes.modified.keys().collect();
            let deleted: BTreeSet<_> = changes.deleted.keys().collect();
            prop_assert!(added.is_disjoint(&modified));
            prop_assert!(added.is_disjoint(&deleted));
            prop_assert!(modified.is_disjoint(&deleted));

            for path in a.keys().chain(b.keys()) {
                let unchanged = matches!(
                    (a.get(path), b.get(path)),
                    (Some(x), Some(y)) if x.is_same_state(y)
                );
                let buckets = [
                    added.contains(path),
                    modified.contains(path),
                    deleted.contains(path),
                    unchanged,
                ];
                prop_assert_eq!(buckets.iter().filter(|hit| **hit).count(), 1);
            }
        }

        #[test]
        fn prop_diff_with_itself_is_empty(a in arb_index()) {
            prop_assert!(diff(&a, &a).is_empty());
        }
    }
}
