// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlacementError>;

#[derive(Error, Debug)]
pub enum PlacementError {
	#[error("db error: {0}")]
	Db(#[from] berth_server_db::DbError),

	#[error("no candidate node available for placement")]
	NoCandidates,
}
