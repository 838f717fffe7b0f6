// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use berth_server_db::{
	ReplicationDlqRecord, ReplicationStatus, ReplicationStore, ReplicationTaskRecord, TopologyStore,
};

use crate::error::{ReplicationError, Result};
use crate::transport::{replica_path, rebuild_replica, source_url, sync_replica};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
	/// Sync attempts per task before the rebuild/dead-letter path.
	pub max_attempts: i64,
	/// Try one delete-and-reclone after the attempt budget is spent.
	pub rebuild_on_exhaustion: bool,
	pub dlq_enabled: bool,
	/// Root directory replicas live under on this node.
	pub data_dir: PathBuf,
}

impl Default for ExecutorConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			rebuild_on_exhaustion: true,
			dlq_enabled: true,
			data_dir: PathBuf::from("/var/lib/berth/repos"),
		}
	}
}

/// Side-effect hook for terminal replication failures. Fired at most once
/// per task, alongside its DLQ row.
#[async_trait]
pub trait Notifier: Send + Sync {
	async fn replication_failed(&self, task: &ReplicationTaskRecord, error: &str);
}

/// Default notifier: an error log line.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
	async fn replication_failed(&self, task: &ReplicationTaskRecord, error: &str) {
		error!(
			task_id = %task.id,
			repo_id = %task.repo_id,
			target = %task.target_node_id,
			attempts = task.attempts,
			error = %error,
			"replication task permanently failed"
		);
	}
}

/// How one executor pass over a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRunOutcome {
	/// Another worker holds the claim, or the task left pending state.
	Skipped,
	Succeeded,
	/// Failed with budget remaining; back in the pending queue.
	Retried,
	/// Sync attempts exhausted but the forced rebuild recovered the replica.
	Rebuilt,
	/// Terminal failure; dead-lettered when the DLQ is enabled.
	Failed,
}

/// Drains the replication queue: claims pending tasks and fetches primary
/// state into the target replica, with bounded retries and dead-letter
/// escalation. Safe to run concurrently with itself; the claim is the gate.
pub struct ReplicationExecutor {
	replication: Arc<dyn ReplicationStore>,
	topology: Arc<dyn TopologyStore>,
	notifier: Arc<dyn Notifier>,
	config: ExecutorConfig,
}

impl ReplicationExecutor {
	pub fn new(
		replication: Arc<dyn ReplicationStore>,
		topology: Arc<dyn TopologyStore>,
		notifier: Arc<dyn Notifier>,
		config: ExecutorConfig,
	) -> Self {
		Self {
			replication,
			topology,
			notifier,
			config,
		}
	}

	/// One scheduler tick: run every currently pending task once.
	#[tracing::instrument(skip(self))]
	pub async fn run_pending(&self) -> Result<Vec<TaskRunOutcome>> {
		let pending = self
			.replication
			.list_by_status(ReplicationStatus::Pending)
			.await?;
		let mut outcomes = Vec::with_capacity(pending.len());
		for task in &pending {
			outcomes.push(self.run_task(task).await?);
		}
		Ok(outcomes)
	}

	#[tracing::instrument(skip(self, task), fields(task_id = %task.id, repo_id = %task.repo_id, target = %task.target_node_id))]
	pub async fn run_task(&self, task: &ReplicationTaskRecord) -> Result<TaskRunOutcome> {
		if !self.replication.claim(task.id).await? {
			debug!("task not claimable, skipping");
			return Ok(TaskRunOutcome::Skipped);
		}

		let sync_result = self.sync(task).await;
		match sync_result {
			Ok(()) => {
				self.replication.mark_succeeded(task.id).await?;
				info!("replication task succeeded");
				Ok(TaskRunOutcome::Succeeded)
			}
			Err(e) => self.handle_failure(task, e).await,
		}
	}

	async fn sync(&self, task: &ReplicationTaskRecord) -> Result<()> {
		let source = self
			.topology
			.get_node(&task.source_node_id)
			.await?
			.ok_or_else(|| {
				ReplicationError::Git(format!("source node {} not registered", task.source_node_id))
			})?;
		let url = source_url(&source, task.repo_id);
		let target = replica_path(&self.config.data_dir, task.repo_id);
		sync_replica(&url, &target).await?;
		Ok(())
	}

	/// Retry while budget remains; then optionally rebuild; then mark failed
	/// and dead-letter exactly once.
	async fn handle_failure(
		&self,
		task: &ReplicationTaskRecord,
		error: ReplicationError,
	) -> Result<TaskRunOutcome> {
		let attempts_used = task.attempts + 1;
		let error_text = error.to_string();

		if attempts_used < self.config.max_attempts {
			warn!(
				attempts = attempts_used,
				max_attempts = self.config.max_attempts,
				error = %error_text,
				"replication attempt failed, requeueing"
			);
			self.replication.mark_retry(task.id, &error_text).await?;
			return Ok(TaskRunOutcome::Retried);
		}

		let final_error = if self.config.rebuild_on_exhaustion {
			warn!(error = %error_text, "attempt budget exhausted, forcing rebuild");
			match self.rebuild(task).await {
				Ok(()) => {
					self.replication.mark_succeeded(task.id).await?;
					info!("replica rebuilt after exhausted sync attempts");
					return Ok(TaskRunOutcome::Rebuilt);
				}
				Err(rebuild_err) => format!("{error_text}; rebuild failed: {rebuild_err}"),
			}
		} else {
			error_text
		};

		self.replication.mark_failed(task.id, &final_error).await?;
		if self.config.dlq_enabled {
			let inserted = self
				.replication
				.push_dlq(&ReplicationDlqRecord {
					task_id: task.id,
					repo_id: task.repo_id,
					source_node_id: task.source_node_id.clone(),
					target_node_id: task.target_node_id.clone(),
					attempts: attempts_used,
					last_error: Some(final_error.clone()),
					created_at: Utc::now(),
				})
				.await?;
			if inserted {
				self.notifier.replication_failed(task, &final_error).await;
			}
		}
		Ok(TaskRunOutcome::Failed)
	}

	async fn rebuild(&self, task: &ReplicationTaskRecord) -> Result<()> {
		let source = self
			.topology
			.get_node(&task.source_node_id)
			.await?
			.ok_or_else(|| {
				ReplicationError::Git(format!("source node {} not registered", task.source_node_id))
			})?;
		let url = source_url(&source, task.repo_id);
		let target = replica_path(&self.config.data_dir, task.repo_id);
		rebuild_replica(&url, &target).await
	}
}
