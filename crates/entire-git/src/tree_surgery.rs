//! Path-scoped tree rewriting.
//!
//! Two complementary ways to rewrite a git tree without touching unrelated
//! subtrees:
//!
//! - [`update_subtree`] replaces or merges the tree found at a single path,
//!   descending one level at a time and rewriting only the trees on the path
//!   from root to that subtree.
//! - [`apply_tree_changes`] applies a batch of leaf-level edits across many
//!   paths in one call, via gix's tree editor.
//!
//! Both only ever write the minimum set of new tree objects needed to
//! express the change — sibling subtrees are referenced by their existing
//! OID, never re-read or rewritten. This is what lets the checkpoint store
//! shard checkpoints under `checkpoints/<2-hex>/<rest>` and touch one shard
//! per write regardless of how many checkpoints already exist.

use std::collections::BTreeMap;

use crate::error::GitError;
use crate::repo::GitRepo;
use crate::types::{EntryMode, GitOid, TreeEdit, TreeEntry};

/// A single leaf-level change, as consumed by [`apply_tree_changes`].
pub type TreeChange = TreeEdit;

/// How [`update_subtree`] should combine `new_entries` with whatever the
/// subtree at `path` already contains.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeMode {
    /// Discard the subtree's existing entries entirely; the new subtree is
    /// exactly `new_entries`.
    ReplaceAll,
    /// Keep existing entries not named in `new_entries`, upsert the ones
    /// that are, and additionally drop the named `delete` entries.
    MergeKeepExisting {
        /// Names to remove from the subtree even if absent from `new_entries`.
        delete: Vec<String>,
    },
}

/// Replace or merge the tree found at `path` within `root`, and return the
/// OID of the resulting root tree.
///
/// `path` is a sequence of path components (e.g. `["checkpoints", "ab"]` for
/// `checkpoints/ab`); an empty slice rewrites the root tree itself. Each
/// level along `path` is read, its matching child entry recursively updated,
/// and exactly one new tree object written for that level.
///
/// `root` of `None` is treated as an empty tree, so the first write on a
/// fresh branch works the same as any later one.
pub fn update_subtree(
    repo: &dyn GitRepo,
    root: Option<GitOid>,
    path: &[&str],
    new_entries: &[TreeEntry],
    mode: &MergeMode,
) -> Result<GitOid, GitError> {
    let current_entries = match root {
        Some(oid) => repo.read_tree(oid)?,
        None => Vec::new(),
    };

    let Some((head, rest)) = path.split_first() else {
        let merged = merge_entries(current_entries, new_entries, mode);
        return repo.write_tree(&merged);
    };

    let child_oid = current_entries
        .iter()
        .find(|e| e.name == *head && matches!(e.mode, EntryMode::Tree))
        .map(|e| e.oid);

    let new_child_oid = update_subtree(repo, child_oid, rest, new_entries, mode)?;

    let mut next_entries: Vec<TreeEntry> = current_entries
        .into_iter()
        .filter(|e| e.name != *head)
        .collect();
    next_entries.push(TreeEntry {
        name: (*head).to_string(),
        mode: EntryMode::Tree,
        oid: new_child_oid,
    });
    repo.write_tree(&next_entries)
}

fn merge_entries(
    current: Vec<TreeEntry>,
    new_entries: &[TreeEntry],
    mode: &MergeMode,
) -> Vec<TreeEntry> {
    match mode {
        MergeMode::ReplaceAll => new_entries.to_vec(),
        MergeMode::MergeKeepExisting { delete } => {
            let mut by_name: BTreeMap<String, TreeEntry> =
                current.into_iter().map(|e| (e.name.clone(), e)).collect();
            for name in delete {
                by_name.remove(name);
            }
            for entry in new_entries {
                by_name.insert(entry.name.clone(), entry.clone());
            }
            by_name.into_values().collect()
        }
    }
}

/// Apply a batch of leaf-level [`TreeChange`]s to `base` and return the OID
/// of the resulting tree.
///
/// Changes may touch arbitrarily many distinct paths in a single call; only
/// the trees on the path from root to each touched leaf are rewritten.
/// Delegates to [`GitRepo::edit_tree`], which gix's tree editor implements
/// with that same O(touched-paths) write footprint.
pub fn apply_tree_changes(
    repo: &dyn GitRepo,
    base: Option<GitOid>,
    changes: &[TreeChange],
) -> Result<GitOid, GitError> {
    let base = match base {
        Some(oid) => oid,
        None => repo.write_tree(&[])?,
    };
    repo.edit_tree(base, changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gix_repo::GixRepo;
    use std::process::Command;
    use tempfile::TempDir;

    fn init_repo() -> (TempDir, GixRepo) {
        let dir = TempDir::new().unwrap();
        Command::new("git")
            .args(["init", "--quiet"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        let repo = GixRepo::open(dir.path()).unwrap();
        (dir, repo)
    }

    fn blob(repo: &GixRepo, content: &[u8]) -> GitOid {
        repo.write_blob(content).unwrap()
    }

    #[test]
    fn update_subtree_at_root_replaces_entries() {
        let (_dir, repo) = init_repo();
        let a = blob(&repo, b"a");
        let entries = vec![TreeEntry {
            name: "a.txt".into(),
            mode: EntryMode::Blob,
            oid: a,
        }];
        let tree = update_subtree(&repo, None, &[], &entries, &MergeMode::ReplaceAll).unwrap();
        let read_back = repo.read_tree(tree).unwrap();
        assert_eq!(read_back, entries);
    }

    #[test]
    fn update_subtree_creates_nested_path_and_preserves_siblings() {
        let (_dir, repo) = init_repo();
        let sibling = blob(&repo, b"sibling");
        let root = repo
            .write_tree(&[TreeEntry {
                name: "README.md".into(),
                mode: EntryMode::Blob,
                oid: sibling,
            }])
            .unwrap();

        let shard_blob = blob(&repo, b"checkpoint payload");
        let new_entries = vec![TreeEntry {
            name: "abc123.json".into(),
            mode: EntryMode::Blob,
            oid: shard_blob,
        }];
        let new_root = update_subtree(
            &repo,
            Some(root),
            &["checkpoints", "ab"],
            &new_entries,
            &MergeMode::ReplaceAll,
        )
        .unwrap();

        let top = repo.read_tree(new_root).unwrap();
        assert!(top.iter().any(|e| e.name == "README.md" && e.oid == sibling));
        let checkpoints = top
            .iter()
            .find(|e| e.name == "checkpoints")
            .expect("checkpoints dir created");
        let shards = repo.read_tree(checkpoints.oid).unwrap();
        let ab = shards
            .iter()
            .find(|e| e.name == "ab")
            .expect("shard dir created");
        let files = repo.read_tree(ab.oid).unwrap();
        assert_eq!(files, new_entries);
    }

    #[test]
    fn update_subtree_merge_keep_existing_preserves_unrelated_entries() {
        let (_dir, repo) = init_repo();
        let existing = blob(&repo, b"first");
        let root = update_subtree(
            &repo,
            None,
            &["ab"],
            &[TreeEntry {
                name: "one.json".into(),
                mode: EntryMode::Blob,
                oid: existing,
            }],
            &MergeMode::ReplaceAll,
        )
        .unwrap();

        let added = blob(&repo, b"second");
        let root2 = update_subtree(
            &repo,
            Some(root),
            &["ab"],
            &[TreeEntry {
                name: "two.json".into(),
                mode: EntryMode::Blob,
                oid: added,
            }],
            &MergeMode::MergeKeepExisting { delete: vec![] },
        )
        .unwrap();

        let top = repo.read_tree(root2).unwrap();
        let ab = top.iter().find(|e| e.name == "ab").unwrap();
        let mut files = repo.read_tree(ab.oid).unwrap();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "one.json");
        assert_eq!(files[1].name, "two.json");
    }

    #[test]
    fn apply_tree_changes_matches_update_subtree_for_single_path() {
        let (_dir, repo) = init_repo();
        let payload = blob(&repo, b"checkpoint payload");

        let via_subtree = update_subtree(
            &repo,
            None,
            &["checkpoints", "ab"],
            &[TreeEntry {
                name: "abc123.json".into(),
                mode: EntryMode::Blob,
                oid: payload,
            }],
            &MergeMode::ReplaceAll,
        )
        .unwrap();

        let via_changes = apply_tree_changes(
            &repo,
            None,
            &[TreeChange::Upsert {
                path: "checkpoints/ab/abc123.json".into(),
                mode: EntryMode::Blob,
                oid: payload,
            }],
        )
        .unwrap();

        assert_eq!(via_subtree, via_changes);
    }

    #[test]
    fn apply_tree_changes_across_disjoint_paths_is_order_independent() {
        let (_dir, repo) = init_repo();
        let a = blob(&repo, b"a");
        let b = blob(&repo, b"b");

        let forward = apply_tree_changes(
            &repo,
            None,
            &[
                TreeChange::Upsert {
                    path: "checkpoints/ab/one.json".into(),
                    mode: EntryMode::Blob,
                    oid: a,
                },
                TreeChange::Upsert {
                    path: "checkpoints/cd/two.json".into(),
                    mode: EntryMode::Blob,
                    oid: b,
                },
            ],
        )
        .unwrap();

        let reversed = apply_tree_changes(
            &repo,
            None,
            &[
                TreeChange::Upsert {
                    path: "checkpoints/cd/two.json".into(),
                    mode: EntryMode::Blob,
                    oid: b,
                },
                TreeChange::Upsert {
                    path: "checkpoints/ab/one.json".into(),
                    mode: EntryMode::Blob,
                    oid: a,
                },
            ],
        )
        .unwrap();

        assert_eq!(forward, reversed);
    }

    #[test]
    fn apply_tree_changes_remove_drops_leaf_without_touching_siblings() {
        let (_dir, repo) = init_repo();
        let a = blob(&repo, b"a");
        let b = blob(&repo, b"b");
        let base = apply_tree_changes(
            &repo,
            None,
            &[
                TreeChange::Upsert {
                    path: "ab/one.json".into(),
                    mode: EntryMode::Blob,
                    oid: a,
                },
                TreeChange::Upsert {
                    path: "ab/two.json".into(),
                    mode: EntryMode::Blob,
                    oid: b,
                },
            ],
        )
        .unwrap();

        let updated = repo
            .edit_tree(
                base,
                &[TreeChange::Remove {
                    path: "ab/one.json".into(),
                }],
            )
            .unwrap();

        let top = repo.read_tree(updated).unwrap();
        let ab = top.iter().find(|e| e.name == "ab").unwrap();
        let files = repo.read_tree(ab.oid).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "two.json");
    }
}

#[cfg(test)]
mod flatten_equivalence {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;
    use crate::gix_repo::GixRepo;

    fn init_repo() -> (tempfile::TempDir, GixRepo) {
        let dir = tempfile::TempDir::new().unwrap();
        std::process::Command::new("git")
            .args(["init", "--quiet"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        (dir, GixRepo::open(dir.path()).unwrap())
    }

    fn flatten(
        repo: &dyn GitRepo,
        tree: Option<GitOid>,
        prefix: &str,
        out: &mut BTreeMap<String, (EntryMode, GitOid)>,
    ) -> Result<(), GitError> {
        let Some(tree) = tree else { return Ok(()) };
        for entry in repo.read_tree(tree)? {
            let path = if prefix.is_empty() { entry.name.clone() } else { format!("{prefix}/{}", entry.name) };
            if matches!(entry.mode, EntryMode::Tree) {
                flatten(repo, Some(entry.oid), &path, out)?;
            } else {
                out.insert(path, (entry.mode, entry.oid));
            }
        }
        Ok(())
    }

    fn rebuild_from_flat(
        repo: &dyn GitRepo,
        flat: &BTreeMap<String, (EntryMode, GitOid)>,
        prefix: &str,
    ) -> Result<GitOid, GitError> {
        let mut entries: Vec<TreeEntry> = Vec::new();
        let mut subdir_names: BTreeSet<String> = BTreeSet::new();
        for (path, (mode, oid)) in flat {
            let rest = if prefix.is_empty() {
                Some(path.as_str())
            } else {
                path.strip_prefix(prefix).and_then(|s| s.strip_prefix('/'))
            };
            let Some(rest) = rest else { continue };
            match rest.split_once('/') {
                None => entries.push(TreeEntry { name: rest.to_owned(), mode: *mode, oid: *oid }),
                Some((head, _)) => {
                    subdir_names.insert(head.to_owned());
                }
            }
        }
        for name in subdir_names {
            let child_prefix = if prefix.is_empty() { name.clone() } else { format!("{prefix}/{name}") };
            let child_oid = rebuild_from_flat(repo, flat, &child_prefix)?;
            entries.push(TreeEntry { name, mode: EntryMode::Tree, oid: child_oid });
        }
        repo.write_tree(&entries)
    }

    /// Independent oracle for [`apply_tree_changes`]: flatten `base` to a
    /// `path -> (mode, oid)` map, apply every change to that map directly
    /// (no tree structure involved), then rebuild a tree bottom-up from
    /// whatever paths remain. Shares no code with `apply_tree_changes` or
    /// `update_subtree`, so agreement with this oracle is a real check of
    /// tree-surgery correctness rather than two code paths agreeing with
    /// each other.
    fn flatten_modify_rebuild(
        repo: &dyn GitRepo,
        base: Option<GitOid>,
        changes: &[TreeChange],
    ) -> Result<GitOid, GitError> {
        let mut flat = BTreeMap::new();
        flatten(repo, base, "", &mut flat)?;
        for change in changes {
            match change {
                TreeChange::Upsert { path, mode, oid } => {
                    flat.insert(path.clone(), (*mode, *oid));
                }
                TreeChange::Remove { path } => {
                    flat.remove(path);
                }
            }
        }
        if flat.is_empty() {
            return repo.write_tree(&[]);
        }
        rebuild_from_flat(repo, &flat, "")
    }

    fn path_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-c]\\.txt",
            "[a-c]/[a-c]\\.txt",
            "[a-c]/[a-c]/[a-c]\\.txt",
        ]
    }

    fn entry_strategy() -> impl Strategy<Value = (String, Option<Vec<u8>>)> {
        (path_strategy(), proptest::option::of(proptest::collection::vec(any::<u8>(), 0..8)))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// `apply_tree_changes` must produce the same root hash as
        /// flattening the base tree, applying the edits to the flat path
        /// map, and rebuilding — for arbitrary overlapping and nested
        /// paths, not just the single-path case
        /// `apply_tree_changes_matches_update_subtree_for_single_path`
        /// already covers.
        #[test]
        fn apply_tree_changes_matches_flatten_modify_rebuild_oracle(
            base_entries in proptest::collection::vec(entry_strategy(), 0..6),
            edits in proptest::collection::vec(entry_strategy(), 1..8),
        ) {
            let (_dir, repo) = init_repo();

            let mut base_changes = Vec::new();
            for (path, contents) in &base_entries {
                if let Some(contents) = contents {
                    let oid = repo.write_blob(contents).unwrap();
                    base_changes.push(TreeChange::Upsert { path: path.clone(), mode: EntryMode::Blob, oid });
                }
            }
            let base = if base_changes.is_empty() {
                None
            } else {
                Some(apply_tree_changes(&repo, None, &base_changes).unwrap())
            };

            let mut changes = Vec::new();
            for (path, contents) in &edits {
                match contents {
                    Some(bytes) => {
                        let oid = repo.write_blob(bytes).unwrap();
                        changes.push(TreeChange::Upsert { path: path.clone(), mode: EntryMode::Blob, oid });
                    }
                    None => changes.push(TreeChange::Remove { path: path.clone() }),
                }
            }

            let via_changes = apply_tree_changes(&repo, base, &changes).unwrap();
            let via_oracle = flatten_modify_rebuild(&repo, base, &changes).unwrap();
            prop_assert_eq!(via_changes, via_oracle);
        }
    }
}
