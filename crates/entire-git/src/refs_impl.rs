//! gix-backed ref, rev-parse, and ancestry operations.

use gix::refs::transaction::{Change, LogChange, PreviousValue, RefEdit as GixRefEdit, RefLog};
use gix::refs::Target;

use crate::error::GitError;
use crate::gix_repo::GixRepo;
use crate::objects_impl::{from_gix_oid, to_gix_oid};
use crate::types::*;

pub fn read_ref(repo: &GixRepo, name: &RefName) -> Result<Option<GitOid>, GitError> {
    let reference = match repo.repo.try_find_reference(name.as_str()) {
        Ok(Some(r)) => r,
        Ok(None) => return Ok(None),
        Err(e) => {
            return Err(GitError::BackendError {
                message: format!("failed to look up ref '{name}': {e}"),
            })
        }
    };
    let id = reference
        .into_fully_peeled_id()
        .map_err(|e| GitError::BackendError {
            message: format!("failed to peel ref '{name}': {e}"),
        })?;
    Ok(Some(from_gix_oid(id.detach())))
}

pub fn write_ref(
    repo: &GixRepo,
    name: &RefName,
    oid: GitOid,
    log_message: &str,
) -> Result<(), GitError> {
    repo.repo
        .reference(
            name.as_str(),
            to_gix_oid(oid),
            PreviousValue::Any,
            log_message,
        )
        .map_err(|e| GitError::BackendError {
            message: format!("failed to write ref '{name}': {e}"),
        })?;
    Ok(())
}

pub fn delete_ref(repo: &GixRepo, name: &RefName) -> Result<(), GitError> {
    let reference = match repo.repo.try_find_reference(name.as_str()) {
        Ok(Some(r)) => r,
        Ok(None) => return Ok(()),
        Err(e) => {
            return Err(GitError::BackendError {
                message: format!("failed to look up ref '{name}' for deletion: {e}"),
            })
        }
    };
    reference.delete().map_err(|e| GitError::BackendError {
        message: format!("failed to delete ref '{name}': {e}"),
    })?;
    Ok(())
}

pub fn atomic_ref_update(repo: &GixRepo, edits: &[RefEdit]) -> Result<(), GitError> {
    let gix_edits: Vec<GixRefEdit> = edits
        .iter()
        .map(|edit| {
            let expected = if edit.expected_old_oid.is_zero() {
                PreviousValue::MustNotExist
            } else {
                PreviousValue::MustExistAndMatch(Target::Object(to_gix_oid(
                    edit.expected_old_oid,
                )))
            };
            GixRefEdit {
                change: Change::Update {
                    log: LogChange {
                        mode: RefLog::AndReference,
                        force_create_reflog: false,
                        message: "entire: atomic ref update".into(),
                    },
                    expected,
                    new: Target::Object(to_gix_oid(edit.new_oid)),
                },
                name: edit
                    .name
                    .as_str()
                    .try_into()
                    .expect("RefName already validated"),
                deref: false,
            }
        })
        .collect();

    repo.repo
        .edit_references(gix_edits)
        .map_err(|e| classify_ref_transaction_error(edits, e))?;
    Ok(())
}

/// gix reports CAS mismatches as a generic transaction error; we inspect the
/// message to decide whether this is a [`GitError::RefConflict`] (the caller
/// retries) or an opaque [`GitError::BackendError`] (the caller gives up).
fn classify_ref_transaction_error(edits: &[RefEdit], err: gix::reference::edit::Error) -> GitError {
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("does not match")
        || lowered.contains("out of date")
        || lowered.contains("reference already exists")
    {
        let ref_name = edits
            .first()
            .map(|e| e.name.as_str().to_string())
            .unwrap_or_default();
        GitError::RefConflict { ref_name, message }
    } else {
        GitError::BackendError { message }
    }
}

pub fn list_refs(repo: &GixRepo, prefix: &str) -> Result<Vec<(RefName, GitOid)>, GitError> {
    let platform = repo.repo.references().map_err(|e| GitError::BackendError {
        message: format!("failed to open ref iterator: {e}"),
    })?;

    let iter = platform
        .prefixed(prefix)
        .map_err(|e| GitError::BackendError {
            message: format!("failed to list refs under '{prefix}': {e}"),
        })?;

    let mut out = Vec::new();
    for reference in iter {
        let mut reference = reference.map_err(|e| GitError::BackendError {
            message: format!("failed to read ref entry: {e}"),
        })?;
        let full_name = reference.name().as_bstr().to_string();
        let name = RefName::new(&full_name).map_err(|e| GitError::BackendError {
            message: format!("backend returned unparseable ref name: {e}"),
        })?;
        let id = reference
            .peel_to_id_in_place()
            .map_err(|e| GitError::BackendError {
                message: format!("failed to peel ref '{full_name}': {e}"),
            })?;
        out.push((name, from_gix_oid(id.detach())));
    }
    out.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
    Ok(out)
}

pub fn rev_parse(repo: &GixRepo, spec: &str) -> Result<GitOid, GitError> {
    let id = repo
        .repo
        .rev_parse_single(spec)
        .map_err(|e| GitError::NotFound {
            message: format!("rev-parse '{spec}': {e}"),
        })?;
    Ok(from_gix_oid(id.detach()))
}

pub fn rev_parse_opt(repo: &GixRepo, spec: &str) -> Result<Option<GitOid>, GitError> {
    match repo.repo.rev_parse_single(spec) {
        Ok(id) => Ok(Some(from_gix_oid(id.detach()))),
        Err(_) => Ok(None),
    }
}

pub fn is_ancestor(repo: &GixRepo, ancestor: GitOid, descendant: GitOid) -> Result<bool, GitError> {
    if ancestor == descendant {
        return Ok(true);
    }
    match merge_base(repo, ancestor, descendant)? {
        Some(base) => Ok(base == ancestor),
        None => Ok(false),
    }
}

pub fn merge_base(repo: &GixRepo, a: GitOid, b: GitOid) -> Result<Option<GitOid>, GitError> {
    let one = to_gix_oid(a);
    let two = to_gix_oid(b);
    match repo.repo.merge_base(one, two) {
        Ok(id) => Ok(Some(from_gix_oid(id.detach()))),
        Err(gix::repository::merge_base::Error::NotFound { .. }) => Ok(None),
        Err(e) => Err(GitError::BackendError {
            message: format!("merge-base({a}, {b}) failed: {e}"),
        }),
    }
}
