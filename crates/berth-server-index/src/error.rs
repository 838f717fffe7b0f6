// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

/// Fatal-per-operation failures of an indexing run. Per-file failures are not
/// errors; they travel as [`crate::types::FileFailure`] data instead.
#[derive(Error, Debug)]
pub enum IndexError {
	#[error("failed to open repository at {path}: {source}")]
	RepoOpen {
		path: PathBuf,
		source: git2::Error,
	},

	#[error("failed to resolve ref {refname}: {source}")]
	RefResolve {
		refname: String,
		source: git2::Error,
	},

	#[error("failed to parse commit {hash}: {source}")]
	CommitParse {
		hash: String,
		source: git2::Error,
	},

	#[error("git object error: {0}")]
	Object(#[from] git2::Error),

	#[error("db error: {0}")]
	Db(#[from] berth_server_db::DbError),

	#[error("blob store error: {0}")]
	BlobStore(String),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("task join error: {0}")]
	Join(#[from] tokio::task::JoinError),
}
