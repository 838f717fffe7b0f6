// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ref value git sends for a non-existent side of a push.
pub const ZERO_REF: &str = "0000000000000000000000000000000000000000";

/// A push notification from the transport layer.
#[derive(Debug, Clone)]
pub struct PushEvent {
	pub repo_id: Uuid,
	pub repo_path: PathBuf,
	pub branch: String,
	/// Previous ref value; `None` or all-zero means branch creation.
	pub old_ref: Option<String>,
	pub new_ref: String,
}

impl PushEvent {
	pub fn is_branch_creation(&self) -> bool {
		match self.old_ref.as_deref() {
			None => true,
			Some(old) => old == ZERO_REF || old.is_empty(),
		}
	}
}

/// One path that could not be indexed. Aggregated per commit; never aborts
/// sibling work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFailure {
	pub path: String,
	pub content_hash: String,
	pub reason: String,
}

/// Result of scanning one commit's tree or diff.
#[derive(Debug, Default)]
pub struct ScanReport {
	pub files_processed: usize,
	pub entries_written: usize,
	pub skipped_deletes: usize,
	pub failures: Vec<FileFailure>,
}

/// Result of the visibility step for one commit.
#[derive(Debug)]
pub enum FinalizeOutcome {
	/// Scan was clean and the branch pointer now references this commit.
	Advanced,
	/// Scan was clean but another writer moved the pointer first. The commit
	/// stays indexed but is not head.
	LostRace,
	/// The scan reported file failures; the commit is durably indexed but the
	/// pointer was not moved.
	Withheld { failures: Vec<FileFailure> },
	/// An earlier commit in the same run was withheld or lost the race, so no
	/// further pointer advances were attempted.
	Deferred,
}

impl FinalizeOutcome {
	pub fn advanced(&self) -> bool {
		matches!(self, FinalizeOutcome::Advanced)
	}
}

#[derive(Debug)]
pub struct CommitResult {
	pub hash: String,
	pub outcome: FinalizeOutcome,
}

/// Per-run summary returned by the orchestrator.
#[derive(Debug, Default)]
pub struct IndexRunReport {
	pub commits: Vec<CommitResult>,
	pub scans_run: usize,
}

impl IndexRunReport {
	pub fn head(&self) -> Option<&str> {
		self
			.commits
			.iter()
			.rev()
			.find(|c| c.outcome.advanced())
			.map(|c| c.hash.as_str())
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
	/// Permits shared by all in-flight scans; bounds concurrent blob work.
	pub max_concurrent_files: usize,
	/// Blobs at or under this size are materialized and classified in full.
	pub small_object_threshold: u64,
	pub upload_attempts: u32,
	pub upload_backoff_base_ms: u64,
	/// Prefix sampled for classifying blobs over the threshold.
	pub sample_bytes: usize,
}

impl Default for IndexerConfig {
	fn default() -> Self {
		Self {
			max_concurrent_files: 20,
			small_object_threshold: 5 * 1024 * 1024,
			upload_attempts: 3,
			upload_backoff_base_ms: 200,
			sample_bytes: 64 * 1024,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn event(old_ref: Option<&str>) -> PushEvent {
		PushEvent {
			repo_id: Uuid::new_v4(),
			repo_path: PathBuf::from("/tmp/repo.git"),
			branch: "main".to_string(),
			old_ref: old_ref.map(|s| s.to_string()),
			new_ref: "a".repeat(40),
		}
	}

	#[test]
	fn test_branch_creation_detection() {
		assert!(event(None).is_branch_creation());
		assert!(event(Some(ZERO_REF)).is_branch_creation());
		assert!(event(Some("")).is_branch_creation());
		assert!(!event(Some(&"b".repeat(40))).is_branch_creation());
	}

	#[test]
	fn test_report_head_is_last_advanced() {
		let report = IndexRunReport {
			commits: vec![
				CommitResult {
					hash: "c1".to_string(),
					outcome: FinalizeOutcome::Advanced,
				},
				CommitResult {
					hash: "c2".to_string(),
					outcome: FinalizeOutcome::Advanced,
				},
				CommitResult {
					hash: "c3".to_string(),
					outcome: FinalizeOutcome::Withheld { failures: vec![] },
				},
			],
			scans_run: 3,
		};
		assert_eq!(report.head(), Some("c2"));
	}

	#[test]
	fn test_config_defaults() {
		let config = IndexerConfig::default();
		assert_eq!(config.max_concurrent_files, 20);
		assert_eq!(config.small_object_threshold, 5 * 1024 * 1024);
		assert_eq!(config.upload_attempts, 3);
	}
}
