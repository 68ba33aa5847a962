//! Validated identifier types shared across the checkpoint store, state
//! machine, and orchestrator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A 12-hex-character content-derived checkpoint identifier.
///
/// Produced by [`crate::canonical::checkpoint_id`]; never constructed from
/// user input directly except when parsing a rewind target the user typed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CheckpointId([u8; 12]);

impl CheckpointId {
    /// Build a `CheckpointId` from the first 12 hex characters of a digest.
    ///
    /// # Panics
    /// Panics if `hex` is shorter than 12 bytes — callers always derive this
    /// from a full SHA-256 hex digest, which is far longer.
    #[must_use]
    pub fn from_hex_prefix(hex: &str) -> Self {
        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(hex.as_bytes()[..12].as_ref());
        Self(bytes)
    }

    /// Return the shard prefix (first 2 hex chars) used for tree sharding.
    #[must_use]
    pub fn shard(&self) -> &str {
        std::str::from_utf8(&self.0[..2]).expect("hex digits are ASCII")
    }

    /// Return the remainder after the shard prefix (chars 2..12).
    #[must_use]
    pub fn rest(&self) -> &str {
        std::str::from_utf8(&self.0[2..]).expect("hex digits are ASCII")
    }

    /// Return the full 12-character identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).expect("hex digits are ASCII")
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for CheckpointId {
    type Error = IdError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.len() != 12 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(IdError {
                value,
                reason: "checkpoint id must be exactly 12 hex characters".to_owned(),
            });
        }
        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(value.as_bytes());
        Ok(Self(bytes))
    }
}

impl From<CheckpointId> for String {
    fn from(value: CheckpointId) -> Self {
        value.as_str().to_owned()
    }
}

/// Error from validating a path-safe identifier ([`SessionId`], [`ToolUseId`],
/// or [`CheckpointId`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdError {
    /// The rejected value.
    pub value: String,
    /// Why it was rejected.
    pub reason: String,
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid id {:?}: {}", self.value, self.reason)
    }
}

impl std::error::Error for IdError {}

/// An opaque, agent-provided session identifier.
///
/// Validated against a path-safe character set since it is used verbatim in
/// ref names (`refs/heads/entire/session/<id>`) and file paths
/// (`entire-sessions/<id>.json`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

/// An opaque, agent-provided identifier for a subagent invocation.
///
/// Same validation rules as [`SessionId`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolUseId(String);

fn validate_path_safe(value: &str) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError {
            value: value.to_owned(),
            reason: "must not be empty".to_owned(),
        });
    }
    if value == "." || value == ".." {
        return Err(IdError {
            value: value.to_owned(),
            reason: "must not be a path traversal segment".to_owned(),
        });
    }
    let ok = value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if !ok {
        return Err(IdError {
            value: value.to_owned(),
            reason: "must contain only alphanumeric characters, '-', or '_'".to_owned(),
        });
    }
    Ok(())
}

macro_rules! path_safe_id {
    ($name:ident) => {
        impl $name {
            /// Validate and wrap a raw identifier string.
            ///
            /// # Errors
            /// Returns [`IdError`] if the value is empty, a traversal
            /// segment, or contains characters outside `[A-Za-z0-9_-]`.
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                validate_path_safe(&value)?;
                Ok(Self(value))
            }

            /// Return the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

path_safe_id!(SessionId);
path_safe_id!(ToolUseId);
