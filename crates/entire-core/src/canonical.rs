//! Canonical JSON and content-addressed checkpoint hashing.
//!
//! `serde_json`'s default `Map` is backed by a `BTreeMap` (the
//! `preserve_order` feature is not enabled anywhere in this workspace), so
//! `serde_json::to_vec` already emits object keys in sorted order — the same
//! canonical-JSON discipline the teacher's `Operation::to_canonical_json`
//! relies on. This module just names that guarantee and builds the
//! checkpoint hash on top of it.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::EntireError;
use crate::ids::CheckpointId;

/// Serialize `value` to canonical (sorted-key, no whitespace) JSON bytes.
///
/// # Errors
/// Returns [`EntireError::Serde`] if `value` cannot be serialized.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, EntireError> {
    Ok(serde_json::to_vec(value)?)
}

/// Compute the [`CheckpointId`] for a checkpoint from its canonical metadata,
/// the bytes of every modified file (in path-sorted order), and the
/// transcript bytes.
///
/// Identical inputs always hash to the same id; this is what makes
/// `CondenseToMetadataBranch` idempotent under retry.
#[must_use]
pub fn checkpoint_id(
    canonical_metadata: &[u8],
    modified_files: &[(String, Vec<u8>)],
    transcript_bytes: &[u8],
) -> CheckpointId {
    let mut hasher = Sha256::new();
    hasher.update(canonical_metadata);

    let mut sorted = modified_files.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    for (path, contents) in &sorted {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(contents);
    }

    hasher.update(transcript_bytes);

    let digest = hasher.finalize();
    let hex = hex_encode(&digest);
    CheckpointId::from_hex_prefix(&hex)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
