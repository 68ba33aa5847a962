//! Tree-to-tree diffing.
//!
//! Implemented as a recursive flatten-and-compare over [`crate::objects_impl::read_tree`]
//! rather than gix's diff machinery: the checkpoint store only ever diffs two
//! full trees (never index/worktree state), so a plain walk is both simpler
//! and easier to reason about for the rewind file-set computation.

use std::collections::BTreeMap;

use crate::error::GitError;
use crate::gix_repo::GixRepo;
use crate::objects_impl::read_tree;
use crate::types::{ChangeType, DiffEntry, EntryMode, GitOid};

fn flatten(
    repo: &GixRepo,
    oid: GitOid,
    prefix: &str,
    out: &mut BTreeMap<String, (EntryMode, GitOid)>,
) -> Result<(), GitError> {
    for entry in read_tree(repo, oid)? {
        let path = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{prefix}/{}", entry.name)
        };
        if matches!(entry.mode, EntryMode::Tree) {
            flatten(repo, entry.oid, &path, out)?;
        } else {
            out.insert(path, (entry.mode, entry.oid));
        }
    }
    Ok(())
}

pub fn diff_trees(
    repo: &GixRepo,
    old: Option<GitOid>,
    new: GitOid,
) -> Result<Vec<DiffEntry>, GitError> {
    let mut old_files = BTreeMap::new();
    if let Some(old_oid) = old {
        flatten(repo, old_oid, "", &mut old_files)?;
    }
    let mut new_files = BTreeMap::new();
    flatten(repo, new, "", &mut new_files)?;

    let mut out = Vec::new();
    for (path, (_, new_oid)) in &new_files {
        match old_files.get(path) {
            None => out.push(DiffEntry {
                path: path.clone(),
                change_type: ChangeType::Added,
                old_oid: GitOid::ZERO,
                new_oid: *new_oid,
            }),
            Some((_, old_oid)) if old_oid != new_oid => out.push(DiffEntry {
                path: path.clone(),
                change_type: ChangeType::Modified,
                old_oid: *old_oid,
                new_oid: *new_oid,
            }),
            Some(_) => {}
        }
    }
    for (path, (_, old_oid)) in &old_files {
        if !new_files.contains_key(path) {
            out.push(DiffEntry {
                path: path.clone(),
                change_type: ChangeType::Deleted,
                old_oid: *old_oid,
                new_oid: GitOid::ZERO,
            });
        }
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TreeEntry;
    use crate::GitRepo;
    use std::process::Command;
    use tempfile::TempDir;

    fn init_repo() -> (TempDir, GixRepo) {
        let dir = TempDir::new().unwrap();
        Command::new("git")
            .args(["init", "--quiet"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        Command::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        Command::new("git")
            .args(["config", "user.name", "Test"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        let repo = GixRepo::open(dir.path()).unwrap();
        (dir, repo)
    }

    #[test]
    fn diff_against_empty_tree_reports_all_additions() {
        let (_dir, repo) = init_repo();
        let blob = repo.write_blob(b"hello").unwrap();
        let tree = repo
            .write_tree(&[TreeEntry {
                name: "a.txt".into(),
                mode: EntryMode::Blob,
                oid: blob,
            }])
            .unwrap();

        let diff = repo.diff_trees(None, tree).unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].path, "a.txt");
        assert!(matches!(diff[0].change_type, ChangeType::Added));
    }

    #[test]
    fn diff_detects_modify_and_delete() {
        let (_dir, repo) = init_repo();
        let blob_a1 = repo.write_blob(b"v1").unwrap();
        let blob_b = repo.write_blob(b"stays").unwrap();
        let old_tree = repo
            .write_tree(&[
                TreeEntry {
                    name: "a.txt".into(),
                    mode: EntryMode::Blob,
                    oid: blob_a1,
                },
                TreeEntry {
                    name: "b.txt".into(),
                    mode: EntryMode::Blob,
                    oid: blob_b,
                },
            ])
            .unwrap();

        let blob_a2 = repo.write_blob(b"v2").unwrap();
        let new_tree = repo
            .write_tree(&[TreeEntry {
                name: "a.txt".into(),
                mode: EntryMode::Blob,
                oid: blob_a2,
            }])
            .unwrap();

        let mut diff = repo.diff_trees(Some(old_tree), new_tree).unwrap();
        diff.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(diff.len(), 2);
        assert_eq!(diff[0].path, "a.txt");
        assert!(matches!(diff[0].change_type, ChangeType::Modified));
        assert_eq!(diff[1].path, "b.txt");
        assert!(matches!(diff[1].change_type, ChangeType::Deleted));
    }

    #[test]
    fn diff_recurses_into_subtrees() {
        let (_dir, repo) = init_repo();
        let blob = repo.write_blob(b"nested").unwrap();
        let inner = repo
            .write_tree(&[TreeEntry {
                name: "c.txt".into(),
                mode: EntryMode::Blob,
                oid: blob,
            }])
            .unwrap();
        let outer = repo
            .write_tree(&[TreeEntry {
                name: "src".into(),
                mode: EntryMode::Tree,
                oid: inner,
            }])
            .unwrap();

        let diff = repo.diff_trees(None, outer).unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].path, "src/c.txt");
    }
}
