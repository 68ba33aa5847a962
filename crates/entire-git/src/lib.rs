//! Git abstraction layer for entire.
//!
//! This crate defines the [`GitRepo`] trait — the single interface through
//! which the rest of entire interacts with git. No other entire crate should
//! import gix directly; instead, they depend on `entire-git` and program
//! against the trait.
//!
//! # Crate layout
//!
//! - [`repo`] — the [`GitRepo`] trait definition.
//! - [`types`] — value types used in trait signatures ([`GitOid`], [`RefName`],
//!   [`TreeEntry`], [`DiffEntry`], etc.).
//! - [`error`] — the [`GitError`] enum returned by all trait methods.
//! - [`tree_surgery`] — path-scoped tree rewriting built on top of [`GitRepo`].

pub mod error;
pub mod repo;
pub mod tree_surgery;
pub mod types;

pub use error::GitError;
pub use repo::GitRepo;
pub use tree_surgery::{apply_tree_changes, update_subtree, MergeMode, TreeChange};
pub use types::{
    ChangeType, CommitInfo, DiffEntry, EntryMode, GitOid, OidParseError, RefEdit, RefName,
    RefNameError, TreeEdit, TreeEntry,
};

mod diff_impl;
mod gix_repo;
mod objects_impl;
mod refs_impl;

pub use gix_repo::GixRepo;
