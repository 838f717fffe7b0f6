// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::SqlitePool;

use crate::error::DbError;

/// Create all berth tables if they do not exist. Safe to call on every boot.
#[tracing::instrument(skip(pool))]
pub async fn init_schema(pool: &SqlitePool) -> Result<(), DbError> {
	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS commits (
			repo_id TEXT NOT NULL,
			hash TEXT NOT NULL,
			parent_hashes TEXT NOT NULL,
			tree_hash TEXT NOT NULL,
			author_name TEXT NOT NULL,
			author_email TEXT NOT NULL,
			author_user_id TEXT NOT NULL,
			authored_at TEXT NOT NULL,
			committed_at TEXT NOT NULL,
			message TEXT NOT NULL,
			branch TEXT NOT NULL,
			indexed_at TEXT NOT NULL,
			PRIMARY KEY (repo_id, hash)
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS tree_entries (
			repo_id TEXT NOT NULL,
			commit_hash TEXT NOT NULL,
			path TEXT NOT NULL,
			name TEXT NOT NULL,
			is_dir INTEGER NOT NULL,
			content_hash TEXT NOT NULL,
			size INTEGER NOT NULL,
			depth INTEGER NOT NULL,
			modified_at TEXT NOT NULL,
			PRIMARY KEY (repo_id, commit_hash, path)
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS blobs (
			content_hash TEXT PRIMARY KEY,
			size INTEGER NOT NULL,
			mime_type TEXT NOT NULL,
			is_binary INTEGER NOT NULL,
			line_count INTEGER,
			storage_key TEXT NOT NULL,
			extension TEXT
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS branch_pointers (
			repo_id TEXT NOT NULL,
			branch TEXT NOT NULL,
			head_hash TEXT NOT NULL,
			PRIMARY KEY (repo_id, branch)
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS git_nodes (
			node_id TEXT PRIMARY KEY,
			host TEXT NOT NULL,
			zone TEXT NOT NULL,
			region TEXT NOT NULL,
			healthy INTEGER NOT NULL,
			repo_count INTEGER NOT NULL DEFAULT 0,
			disk_usage_pct REAL NOT NULL DEFAULT 0,
			iops REAL NOT NULL DEFAULT 0
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS repo_locations (
			repo_id TEXT PRIMARY KEY,
			primary_node_id TEXT NOT NULL
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS repo_replicas (
			repo_id TEXT NOT NULL,
			node_id TEXT NOT NULL,
			health TEXT NOT NULL,
			lag_ms INTEGER NOT NULL,
			lag_commits INTEGER NOT NULL,
			updated_at TEXT NOT NULL,
			PRIMARY KEY (repo_id, node_id)
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS replication_tasks (
			id TEXT PRIMARY KEY,
			repo_id TEXT NOT NULL,
			source_node_id TEXT NOT NULL,
			target_node_id TEXT NOT NULL,
			status TEXT NOT NULL,
			attempts INTEGER NOT NULL DEFAULT 0,
			last_error TEXT,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS replication_dlq (
			task_id TEXT PRIMARY KEY,
			repo_id TEXT NOT NULL,
			source_node_id TEXT NOT NULL,
			target_node_id TEXT NOT NULL,
			attempts INTEGER NOT NULL,
			last_error TEXT,
			created_at TEXT NOT NULL
		)
		"#,
	)
	.execute(pool)
	.await?;

	tracing::debug!("schema initialized");
	Ok(())
}
