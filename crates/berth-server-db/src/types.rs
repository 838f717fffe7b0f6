// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author id recorded when the commit author cannot be resolved against the
/// user directory. The commit row is still written.
pub const UNRESOLVED_AUTHOR: Uuid = Uuid::nil();

/// One indexed commit. Keyed by (repo_id, hash); immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
	pub repo_id: Uuid,
	pub hash: String,
	/// Parent hashes in commit order.
	pub parent_hashes: Vec<String>,
	pub tree_hash: String,
	pub author_name: String,
	pub author_email: String,
	pub author_user_id: Uuid,
	pub authored_at: DateTime<Utc>,
	pub committed_at: DateTime<Utc>,
	pub message: String,
	/// Branch ref this commit was indexed under.
	pub branch: String,
	pub indexed_at: DateTime<Utc>,
}

/// One path within a commit. Full scans write every path; diff scans write
/// only changed paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEntryRecord {
	pub repo_id: Uuid,
	pub commit_hash: String,
	pub path: String,
	pub name: String,
	pub is_dir: bool,
	pub content_hash: String,
	pub size: i64,
	/// Slash count of `path`.
	pub depth: i64,
	pub modified_at: DateTime<Utc>,
}

/// Content-addressed blob metadata. The content hash is the global dedup key,
/// independent of which repository introduced the bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobRecord {
	pub content_hash: String,
	pub size: i64,
	pub mime_type: String,
	pub is_binary: bool,
	/// Text blobs only; NULL for binary or oversized content.
	pub line_count: Option<i64>,
	pub storage_key: String,
	pub extension: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchPointerRecord {
	pub repo_id: Uuid,
	pub branch: String,
	pub head_hash: String,
}

/// A storage node as reported by the heartbeat mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitNodeRecord {
	pub node_id: String,
	pub host: String,
	pub zone: String,
	pub region: String,
	pub healthy: bool,
	pub repo_count: i64,
	pub disk_usage_pct: f64,
	pub iops: f64,
}

/// Repository to primary-node assignment. Created once per repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoLocationRecord {
	pub repo_id: Uuid,
	pub primary_node_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaHealth {
	Healthy,
	Degraded,
	Unknown,
}

impl ReplicaHealth {
	pub fn as_str(&self) -> &'static str {
		match self {
			ReplicaHealth::Healthy => "healthy",
			ReplicaHealth::Degraded => "degraded",
			ReplicaHealth::Unknown => "unknown",
		}
	}
}

impl std::str::FromStr for ReplicaHealth {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"healthy" => Ok(ReplicaHealth::Healthy),
			"degraded" => Ok(ReplicaHealth::Degraded),
			"unknown" => Ok(ReplicaHealth::Unknown),
			other => Err(format!("invalid replica health: {other}")),
		}
	}
}

/// Per-replica lag measurement, upserted by the lag reporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoReplicaRecord {
	pub repo_id: Uuid,
	pub node_id: String,
	pub health: ReplicaHealth,
	pub lag_ms: i64,
	pub lag_commits: i64,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationStatus {
	Pending,
	Running,
	Succeeded,
	Failed,
}

impl ReplicationStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			ReplicationStatus::Pending => "pending",
			ReplicationStatus::Running => "running",
			ReplicationStatus::Succeeded => "succeeded",
			ReplicationStatus::Failed => "failed",
		}
	}
}

impl std::str::FromStr for ReplicationStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"pending" => Ok(ReplicationStatus::Pending),
			"running" => Ok(ReplicationStatus::Running),
			"succeeded" => Ok(ReplicationStatus::Succeeded),
			"failed" => Ok(ReplicationStatus::Failed),
			other => Err(format!("invalid replication status: {other}")),
		}
	}
}

/// One unit of replication work: bring `target_node_id`'s copy of the
/// repository up to date with `source_node_id`'s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationTaskRecord {
	pub id: Uuid,
	pub repo_id: Uuid,
	pub source_node_id: String,
	pub target_node_id: String,
	pub status: ReplicationStatus,
	pub attempts: i64,
	pub last_error: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl ReplicationTaskRecord {
	pub fn new(repo_id: Uuid, source_node_id: &str, target_node_id: &str) -> Self {
		let now = Utc::now();
		Self {
			id: Uuid::new_v4(),
			repo_id,
			source_node_id: source_node_id.to_string(),
			target_node_id: target_node_id.to_string(),
			status: ReplicationStatus::Pending,
			attempts: 0,
			last_error: None,
			created_at: now,
			updated_at: now,
		}
	}
}

/// Append-only record of a permanently failed replication task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationDlqRecord {
	pub task_id: Uuid,
	pub repo_id: Uuid,
	pub source_node_id: String,
	pub target_node_id: String,
	pub attempts: i64,
	pub last_error: Option<String>,
	pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_replica_health_round_trip() {
		for health in [
			ReplicaHealth::Healthy,
			ReplicaHealth::Degraded,
			ReplicaHealth::Unknown,
		] {
			let parsed: ReplicaHealth = health.as_str().parse().unwrap();
			assert_eq!(parsed, health);
		}
	}

	#[test]
	fn test_replica_health_rejects_garbage() {
		assert!("nominal".parse::<ReplicaHealth>().is_err());
	}

	#[test]
	fn test_replication_status_round_trip() {
		for status in [
			ReplicationStatus::Pending,
			ReplicationStatus::Running,
			ReplicationStatus::Succeeded,
			ReplicationStatus::Failed,
		] {
			let parsed: ReplicationStatus = status.as_str().parse().unwrap();
			assert_eq!(parsed, status);
		}
	}

	#[test]
	fn test_new_task_starts_pending() {
		let task = ReplicationTaskRecord::new(Uuid::new_v4(), "node-a", "node-b");
		assert_eq!(task.status, ReplicationStatus::Pending);
		assert_eq!(task.attempts, 0);
		assert!(task.last_error.is_none());
	}
}
