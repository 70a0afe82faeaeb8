//! Cascading rename and move.
//!
//! Containers have no rename primitive: every affected entry is copied to
//! its new path and the old one deleted. Renaming a directory moves its whole
//! subtree. All mappings for a container are planned against its live
//! listing before the first one is applied, so a request that fails
//! validation never mutates anything. Once applying starts there is no
//! rollback: mappings applied before a failure stay applied.

use std::collections::{BTreeMap, HashSet};

use crate::batch::CancelToken;
use crate::cache::HandleCache;
use crate::entry::{Entry, MutableIfFileBacked};
use crate::error::{Error, Result};
use crate::handle::{ArchiveHandle, OpenMode};
use crate::path;
use crate::source::{ContainerSource, SourceKey};

/// Give `entry` a new final segment. Directories keep their marker.
#[derive(Clone, Debug)]
pub struct RenameRequest {
    pub entry: Entry,
    pub new_leaf_name: String,
}

impl RenameRequest {
    pub fn new(entry: Entry, new_leaf_name: impl Into<String>) -> Self {
        Self {
            entry,
            new_leaf_name: new_leaf_name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathMapping {
    pub old_relative_path: String,
    pub new_relative_path: String,
}

impl PathMapping {
    fn new(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old_relative_path: old.into(),
            new_relative_path: new.into(),
        }
    }
}

/// One outcome per request, in submission order. A successful outcome lists
/// the mappings applied on behalf of that request.
#[derive(Debug)]
pub struct RenameReport {
    outcomes: Vec<Result<Vec<PathMapping>>>,
}

impl RenameReport {
    pub fn outcomes(&self) -> &[Result<Vec<PathMapping>>] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<Result<Vec<PathMapping>>> {
        self.outcomes
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(Result::is_ok)
    }

    /// Every mapping that was applied, deduplicated across requests.
    pub fn applied(&self) -> Vec<&PathMapping> {
        let mut seen = HashSet::new();
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.as_ref().ok())
            .flatten()
            .filter(|mapping| seen.insert(&mapping.old_relative_path))
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &Error)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(index, outcome)| outcome.as_ref().err().map(|e| (index, e)))
    }
}

struct Pending {
    target: String,
    owners: Vec<usize>,
}

/// Planned but not yet applied mappings of the container being renamed,
/// keyed by old path. Owned by the batch and emptied after every apply.
#[derive(Default)]
pub struct PendingMappings {
    map: BTreeMap<String, Pending>,
}

impl PendingMappings {
    /// Planned target of `old`, if any.
    pub fn target(&self, old: &str) -> Option<&str> {
        self.map.get(old).map(|pending| pending.target.as_str())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Whether a mapping not in `olds` already claims `target`: the same
    /// name in either kind, or a file standing where the other needs a
    /// parent directory.
    fn other_claims(&self, target: &str, olds: &HashSet<&str>) -> bool {
        let bare = target.trim_end_matches('/');
        self.map
            .iter()
            .filter(|(claimed_old, _)| !olds.contains(claimed_old.as_str()))
            .any(|(_, pending)| {
                let claimed = pending.target.as_str();
                claimed.trim_end_matches('/') == bare
                    || file_above(claimed, target)
                    || file_above(target, claimed)
            })
    }

    fn merge(&mut self, owner: usize, mappings: &[PathMapping]) {
        for mapping in mappings {
            let pending = self
                .map
                .entry(mapping.old_relative_path.clone())
                .or_insert_with(|| Pending {
                    target: mapping.new_relative_path.clone(),
                    owners: Vec::new(),
                });
            pending.target.clone_from(&mapping.new_relative_path);
            if !pending.owners.contains(&owner) {
                pending.owners.push(owner);
            }
        }
    }
}

/// `file` is a file path and `path` lies below it.
fn file_above(file: &str, path: &str) -> bool {
    !path::is_directory_path(file)
        && path
            .strip_prefix(file)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl std::fmt::Debug for PendingMappings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.map.iter().map(|(old, pending)| (old, &pending.target)))
            .finish()
    }
}

/// Plan and apply `requests`, container by container in order of first
/// appearance.
///
/// Per-request failures land in the report, and so does cancellation:
/// containers not yet started report `Cancelled` for each of their requests
/// while those already applied keep their outcomes. Failing to open a
/// container aborts the whole call.
pub(crate) fn rename_all(
    cache: &mut HandleCache,
    pending: &mut PendingMappings,
    cancel: &CancelToken,
    requests: &[RenameRequest],
) -> Result<RenameReport> {
    let mut outcomes: Vec<Option<Result<Vec<PathMapping>>>> =
        std::iter::repeat_with(|| None).take(requests.len()).collect();

    let mut groups: Vec<(SourceKey, ContainerSource, Vec<usize>)> = Vec::new();
    for (index, request) in requests.iter().enumerate() {
        let source = request.entry.source();
        let key = source.key();
        match groups.iter_mut().find(|(k, _, _)| *k == key) {
            Some((_, _, members)) => members.push(index),
            None => groups.push((key, source.clone(), vec![index])),
        }
    }

    for (_, source, members) in groups {
        if cancel.is_cancelled() {
            for index in members {
                outcomes[index] = Some(Err(Error::Cancelled));
            }
            continue;
        }
        if source.is_stream() {
            for index in members {
                let refused = requests[index].entry.ensure_mutable().map(|()| Vec::new());
                outcomes[index] = Some(refused);
            }
            continue;
        }

        let handle = cache.get_or_open(&source, OpenMode::Update)?;
        pending.clear();
        rename_in_source(handle, pending, cancel, requests, members, &mut outcomes);
        pending.clear();
    }

    let outcomes = outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap_or_else(|| Ok(Vec::new())))
        .collect::<Vec<_>>();
    for (index, outcome) in outcomes.iter().enumerate() {
        if let Err(e) = outcome {
            tracing::warn!(
                request = index,
                entry = %requests[index].entry,
                error = %e,
                "rename failed"
            );
        }
    }
    Ok(RenameReport { outcomes })
}

fn rename_in_source(
    handle: &mut ArchiveHandle,
    pending: &mut PendingMappings,
    cancel: &CancelToken,
    requests: &[RenameRequest],
    mut members: Vec<usize>,
    outcomes: &mut [Option<Result<Vec<PathMapping>>>],
) {
    // Deepest first, so a directory sees the targets its children already
    // planned.
    members.sort_by(|a, b| {
        let a = requests[*a].entry.relative_path();
        let b = requests[*b].entry.relative_path();
        b.cmp(a)
    });

    for &index in &members {
        match plan(handle, pending, &requests[index]) {
            Ok(mappings) => {
                pending.merge(index, &mappings);
                outcomes[index] = Some(Ok(Vec::new()));
            }
            Err(e) => outcomes[index] = Some(Err(e)),
        }
    }

    apply(handle, pending, cancel, outcomes);
}

/// Compute the mappings for one request against the live listing and the
/// mappings planned so far.
fn plan(handle: &ArchiveHandle, pending: &PendingMappings, request: &RenameRequest) -> Result<Vec<PathMapping>> {
    request.entry.ensure_mutable()?;
    path::validate_leaf_name(&request.new_leaf_name)?;

    let old = request.entry.relative_path();
    if !handle.contains(old) {
        return Err(Error::EntryNotFound {
            path: old.to_string(),
        });
    }

    let current = pending.target(old).unwrap_or(old).to_string();
    let new = path::replace_leaf(&current, &request.new_leaf_name);
    path::validate_path(&new)?;

    let mut mappings = vec![PathMapping::new(old, new.as_str())];
    if request.entry.is_directory() {
        for descendant in handle.descendant_paths(old) {
            let base = pending.target(&descendant).unwrap_or(&descendant);
            let suffix = base
                .strip_prefix(current.as_str())
                .or_else(|| base.strip_prefix(old))
                .unwrap_or(&descendant[old.len()..]);
            let target = format!("{new}{suffix}");
            mappings.push(PathMapping::new(descendant.as_str(), target));
        }
    }

    mappings.retain(|m| pending.target(&m.old_relative_path).unwrap_or(&m.old_relative_path) != m.new_relative_path);

    let olds: HashSet<&str> = mappings.iter().map(|m| m.old_relative_path.as_str()).collect();
    for mapping in &mappings {
        let target = &mapping.new_relative_path;
        if target == &mapping.old_relative_path {
            continue;
        }
        path::validate_path(target)?;
        if let Some(existing) = handle.occupant(target)
            && !olds.contains(existing.as_str())
        {
            return Err(Error::DuplicateEntry { path: existing });
        }
        if pending.other_claims(target, &olds) {
            return Err(Error::DuplicateEntry { path: target.clone() });
        }
    }

    Ok(mappings)
}

fn apply(
    handle: &mut ArchiveHandle,
    pending: &mut PendingMappings,
    cancel: &CancelToken,
    outcomes: &mut [Option<Result<Vec<PathMapping>>>],
) {
    let mut failed: HashSet<usize> = HashSet::new();

    for (old, Pending { target, owners }) in std::mem::take(&mut pending.map) {
        if owners.iter().any(|owner| failed.contains(owner)) {
            continue;
        }
        if old == target {
            continue;
        }
        if cancel.is_cancelled() {
            for owner in owners {
                if failed.insert(owner) {
                    outcomes[owner] = Some(Err(Error::Cancelled));
                }
            }
            continue;
        }

        let moved = handle
            .copy_entry(&old, &target)
            .and_then(|_| handle.remove_entry(&old));
        match moved {
            Ok(_) => {
                tracing::trace!(handle = %handle.id(), from = %old, to = %target, "moved entry");
                for owner in owners {
                    if let Some(Ok(applied)) = outcomes[owner].as_mut() {
                        applied.push(PathMapping::new(old.as_str(), target.as_str()));
                    }
                }
            }
            Err(e) => {
                for owner in owners {
                    failed.insert(owner);
                    outcomes[owner] = Some(Err(e.replicate()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::options::BatchOptions;

    #[test]
    fn merge_retargets_and_tracks_owners() {
        let mut pending = PendingMappings::default();
        pending.merge(0, &[PathMapping::new("a/b/x", "a/b/y")]);
        pending.merge(1, &[PathMapping::new("a/b/", "a/c/"), PathMapping::new("a/b/x", "a/c/y")]);

        assert_eq!(pending.len(), 2);
        assert_eq!(pending.target("a/b/x"), Some("a/c/y"));
        assert_eq!(pending.target("a/b/"), Some("a/c/"));
        assert_eq!(pending.map["a/b/x"].owners, vec![0, 1]);
        assert!(pending.other_claims("a/c/y", &HashSet::from(["a/b/"])));
        assert!(!pending.other_claims("a/c/y", &HashSet::from(["a/b/x"])));
    }

    #[test]
    fn claims_ignore_the_directory_marker() {
        let mut pending = PendingMappings::default();
        pending.merge(0, &[PathMapping::new("a/x", "a/c")]);
        let none = HashSet::new();

        assert!(pending.other_claims("a/c/", &none));
        assert!(pending.other_claims("a/c/inner.txt", &none));
        assert!(!pending.other_claims("a/cc", &none));

        pending.merge(1, &[PathMapping::new("d/", "e/"), PathMapping::new("d/f", "e/f")]);
        assert!(pending.other_claims("e", &none));
        assert!(!pending.other_claims("e/g", &none));
    }

    fn zip_on_disk(dir: &std::path::Path, members: &[&str]) -> ContainerSource {
        use std::io::Write;

        let path = dir.join("fixture.zip");
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        for name in members {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(name.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        ContainerSource::from_path(&path)
    }

    #[test]
    fn apply_continues_past_a_failed_owner() {
        let dir = tempfile::tempdir().unwrap();
        let source = zip_on_disk(dir.path(), &["a.txt", "b.txt", "taken.txt"]);
        let mut cache = HandleCache::new(BatchOptions::default());
        let handle = cache.get_or_open(&source, OpenMode::Update).unwrap();

        // Planning would have refused the first mapping; apply must cope.
        let mut pending = PendingMappings::default();
        pending.merge(0, &[PathMapping::new("a.txt", "taken.txt")]);
        pending.merge(1, &[PathMapping::new("b.txt", "c.txt")]);
        let mut outcomes = vec![Some(Ok(Vec::new())), Some(Ok(Vec::new()))];
        apply(handle, &mut pending, &CancelToken::new(), &mut outcomes);

        let failed = outcomes[0].as_ref().unwrap().as_ref().unwrap_err();
        assert_eq!(failed.kind(), ErrorKind::DuplicateEntry);
        let applied = outcomes[1].as_ref().unwrap().as_ref().unwrap();
        assert_eq!(applied, &vec![PathMapping::new("b.txt", "c.txt")]);

        assert!(handle.contains("a.txt"));
        assert!(handle.contains("c.txt"));
        assert!(!handle.contains("b.txt"));
        assert!(pending.is_empty());
    }

    #[test]
    fn apply_after_cancel_moves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = zip_on_disk(dir.path(), &["a.txt"]);
        let mut cache = HandleCache::new(BatchOptions::default());
        let handle = cache.get_or_open(&source, OpenMode::Update).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let mut pending = PendingMappings::default();
        pending.merge(0, &[PathMapping::new("a.txt", "b.txt")]);
        let mut outcomes = vec![Some(Ok(Vec::new()))];
        apply(handle, &mut pending, &cancel, &mut outcomes);

        assert!(matches!(outcomes[0], Some(Err(Error::Cancelled))));
        assert!(handle.contains("a.txt"));
        assert!(!handle.is_dirty());
    }

    #[test]
    fn report_separates_failures() {
        let report = RenameReport {
            outcomes: vec![
                Ok(vec![PathMapping::new("a", "b")]),
                Err(Error::EntryNotFound { path: "c".into() }),
                Ok(vec![PathMapping::new("a", "b")]),
            ],
        };
        assert!(!report.is_success());
        assert_eq!(report.applied().len(), 1);
        let failures: Vec<_> = report.failures().map(|(i, _)| i).collect();
        assert_eq!(failures, vec![1]);
    }
}
