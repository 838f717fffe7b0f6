// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use tracing::{info, warn};

use berth_server_db::{CommitRecord, IndexStore};

use crate::error::Result;
use crate::types::{FileFailure, FinalizeOutcome};

/// Seals one indexed commit: the commit row is always persisted, the branch
/// pointer only moves when the scan was clean and the compare-and-swap wins.
pub struct Finalizer {
	index: Arc<dyn IndexStore>,
}

impl Finalizer {
	pub fn new(index: Arc<dyn IndexStore>) -> Self {
		Self { index }
	}

	#[tracing::instrument(skip(self, commit, failures), fields(repo_id = %commit.repo_id, commit = %commit.hash, branch = %commit.branch))]
	pub async fn finalize(
		&self,
		commit: &CommitRecord,
		expected_old: Option<&str>,
		failures: Vec<FileFailure>,
		advance: bool,
	) -> Result<FinalizeOutcome> {
		self.index.upsert_commit(commit).await?;

		if !failures.is_empty() {
			warn!(
				failed_files = failures.len(),
				"commit indexed with file failures, branch pointer withheld"
			);
			return Ok(FinalizeOutcome::Withheld { failures });
		}

		if !advance {
			return Ok(FinalizeOutcome::Deferred);
		}

		let won = self
			.index
			.compare_and_swap_branch(commit.repo_id, &commit.branch, &commit.hash, expected_old)
			.await?;
		if won {
			info!(expected_old = expected_old.unwrap_or("-"), "branch pointer advanced");
			Ok(FinalizeOutcome::Advanced)
		} else {
			warn!(
				expected_old = expected_old.unwrap_or("-"),
				"branch pointer advance lost to a concurrent writer"
			);
			Ok(FinalizeOutcome::LostRace)
		}
	}
}
