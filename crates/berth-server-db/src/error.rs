// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

/// Failure surface shared by the index, topology and replication stores.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("query failed: {0}")]
	Sqlx(#[from] sqlx::Error),

	/// The row a state transition requires does not exist.
	#[error("missing row: {0}")]
	NotFound(String),

	/// A concurrent writer got there first.
	#[error("conflicting write: {0}")]
	Conflict(String),

	#[error("internal store error: {0}")]
	Internal(String),

	#[error("bad json payload: {0}")]
	Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;
