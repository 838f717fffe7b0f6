// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReplicationError>;

#[derive(Error, Debug)]
pub enum ReplicationError {
	#[error("db error: {0}")]
	Db(#[from] berth_server_db::DbError),

	#[error("git error: {0}")]
	Git(String),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("task join error: {0}")]
	Join(#[from] tokio::task::JoinError),
}
