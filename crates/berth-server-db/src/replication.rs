// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row};
use uuid::Uuid;

use crate::error::DbError;
use crate::types::{ReplicationDlqRecord, ReplicationStatus, ReplicationTaskRecord};

/// Replication task queue and dead-letter store.
///
/// `claim` is the mutual-exclusion gate: the pending→running transition is a
/// single conditional UPDATE, so two workers can never run the same task.
#[async_trait]
pub trait ReplicationStore: Send + Sync {
	async fn enqueue(&self, task: &ReplicationTaskRecord) -> Result<(), DbError>;
	async fn get_task(&self, id: Uuid) -> Result<Option<ReplicationTaskRecord>, DbError>;
	async fn list_by_status(
		&self,
		status: ReplicationStatus,
	) -> Result<Vec<ReplicationTaskRecord>, DbError>;
	/// Atomically move a pending task to running. Returns false when another
	/// worker already claimed it (or it is no longer pending).
	async fn claim(&self, id: Uuid) -> Result<bool, DbError>;
	/// Failed attempt with budget remaining: back to pending, attempts + 1.
	async fn mark_retry(&self, id: Uuid, error: &str) -> Result<(), DbError>;
	async fn mark_succeeded(&self, id: Uuid) -> Result<(), DbError>;
	async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), DbError>;
	/// Append-once: returns true when the row was inserted, false when the
	/// task was already dead-lettered.
	async fn push_dlq(&self, entry: &ReplicationDlqRecord) -> Result<bool, DbError>;
	async fn list_dlq(&self, repo_id: Uuid) -> Result<Vec<ReplicationDlqRecord>, DbError>;
}

#[derive(Clone)]
pub struct SqliteReplicationStore {
	pool: SqlitePool,
}

impl SqliteReplicationStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, DbError> {
	DateTime::parse_from_rfc3339(value)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("invalid timestamp {value}: {e}")))
}

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<ReplicationTaskRecord, DbError> {
	let status: String = row.get("status");
	Ok(ReplicationTaskRecord {
		id: Uuid::parse_str(row.get("id"))
			.map_err(|e| DbError::Internal(format!("invalid uuid: {e}")))?,
		repo_id: Uuid::parse_str(row.get("repo_id"))
			.map_err(|e| DbError::Internal(format!("invalid uuid: {e}")))?,
		source_node_id: row.get("source_node_id"),
		target_node_id: row.get("target_node_id"),
		status: status.parse().map_err(DbError::Internal)?,
		attempts: row.get("attempts"),
		last_error: row.get("last_error"),
		created_at: parse_ts(row.get("created_at"))?,
		updated_at: parse_ts(row.get("updated_at"))?,
	})
}

fn row_to_dlq(row: &sqlx::sqlite::SqliteRow) -> Result<ReplicationDlqRecord, DbError> {
	Ok(ReplicationDlqRecord {
		task_id: Uuid::parse_str(row.get("task_id"))
			.map_err(|e| DbError::Internal(format!("invalid uuid: {e}")))?,
		repo_id: Uuid::parse_str(row.get("repo_id"))
			.map_err(|e| DbError::Internal(format!("invalid uuid: {e}")))?,
		source_node_id: row.get("source_node_id"),
		target_node_id: row.get("target_node_id"),
		attempts: row.get("attempts"),
		last_error: row.get("last_error"),
		created_at: parse_ts(row.get("created_at"))?,
	})
}

#[async_trait]
impl ReplicationStore for SqliteReplicationStore {
	#[tracing::instrument(skip(self, task), fields(task_id = %task.id, repo_id = %task.repo_id))]
	async fn enqueue(&self, task: &ReplicationTaskRecord) -> Result<(), DbError> {
		sqlx::query(
			r#"
			INSERT INTO replication_tasks
				(id, repo_id, source_node_id, target_node_id, status, attempts, last_error, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(task.id.to_string())
		.bind(task.repo_id.to_string())
		.bind(&task.source_node_id)
		.bind(&task.target_node_id)
		.bind(task.status.as_str())
		.bind(task.attempts)
		.bind(&task.last_error)
		.bind(task.created_at.to_rfc3339())
		.bind(task.updated_at.to_rfc3339())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(task_id = %id))]
	async fn get_task(&self, id: Uuid) -> Result<Option<ReplicationTaskRecord>, DbError> {
		let row = sqlx::query(
			r#"
			SELECT id, repo_id, source_node_id, target_node_id, status, attempts, last_error, created_at, updated_at
			FROM replication_tasks
			WHERE id = ?
			"#,
		)
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_task(&r)).transpose()
	}

	#[tracing::instrument(skip(self))]
	async fn list_by_status(
		&self,
		status: ReplicationStatus,
	) -> Result<Vec<ReplicationTaskRecord>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT id, repo_id, source_node_id, target_node_id, status, attempts, last_error, created_at, updated_at
			FROM replication_tasks
			WHERE status = ?
			ORDER BY created_at ASC
			"#,
		)
		.bind(status.as_str())
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_task).collect()
	}

	#[tracing::instrument(skip(self), fields(task_id = %id))]
	async fn claim(&self, id: Uuid) -> Result<bool, DbError> {
		let result = sqlx::query(
			r#"
			UPDATE replication_tasks
			SET status = 'running', updated_at = ?
			WHERE id = ? AND status = 'pending'
			"#,
		)
		.bind(Utc::now().to_rfc3339())
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	#[tracing::instrument(skip(self, error), fields(task_id = %id))]
	async fn mark_retry(&self, id: Uuid, error: &str) -> Result<(), DbError> {
		let result = sqlx::query(
			r#"
			UPDATE replication_tasks
			SET status = 'pending', attempts = attempts + 1, last_error = ?, updated_at = ?
			WHERE id = ? AND status = 'running'
			"#,
		)
		.bind(error)
		.bind(Utc::now().to_rfc3339())
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("running task {id}")));
		}
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(task_id = %id))]
	async fn mark_succeeded(&self, id: Uuid) -> Result<(), DbError> {
		let result = sqlx::query(
			r#"
			UPDATE replication_tasks
			SET status = 'succeeded', last_error = NULL, updated_at = ?
			WHERE id = ? AND status = 'running'
			"#,
		)
		.bind(Utc::now().to_rfc3339())
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("running task {id}")));
		}
		Ok(())
	}

	#[tracing::instrument(skip(self, error), fields(task_id = %id))]
	async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), DbError> {
		let result = sqlx::query(
			r#"
			UPDATE replication_tasks
			SET status = 'failed', attempts = attempts + 1, last_error = ?, updated_at = ?
			WHERE id = ? AND status = 'running'
			"#,
		)
		.bind(error)
		.bind(Utc::now().to_rfc3339())
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("running task {id}")));
		}
		Ok(())
	}

	#[tracing::instrument(skip(self, entry), fields(task_id = %entry.task_id))]
	async fn push_dlq(&self, entry: &ReplicationDlqRecord) -> Result<bool, DbError> {
		let result = sqlx::query(
			r#"
			INSERT OR IGNORE INTO replication_dlq
				(task_id, repo_id, source_node_id, target_node_id, attempts, last_error, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(entry.task_id.to_string())
		.bind(entry.repo_id.to_string())
		.bind(&entry.source_node_id)
		.bind(&entry.target_node_id)
		.bind(entry.attempts)
		.bind(&entry.last_error)
		.bind(entry.created_at.to_rfc3339())
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	#[tracing::instrument(skip(self), fields(repo_id = %repo_id))]
	async fn list_dlq(&self, repo_id: Uuid) -> Result<Vec<ReplicationDlqRecord>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT task_id, repo_id, source_node_id, target_node_id, attempts, last_error, created_at
			FROM replication_dlq
			WHERE repo_id = ?
			ORDER BY created_at ASC
			"#,
		)
		.bind(repo_id.to_string())
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_dlq).collect()
	}
}
