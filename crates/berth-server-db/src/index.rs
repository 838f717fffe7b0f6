// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row};
use uuid::Uuid;

use crate::error::DbError;
use crate::types::{BlobRecord, CommitRecord, TreeEntryRecord};

/// Metadata index store consumed by the commit indexing engine.
///
/// All writes are upsert-by-key. The branch pointer is the single exception:
/// it only moves through [`IndexStore::compare_and_swap_branch`].
#[async_trait]
pub trait IndexStore: Send + Sync {
	async fn upsert_commit(&self, commit: &CommitRecord) -> Result<(), DbError>;
	async fn commit_exists(&self, repo_id: Uuid, hash: &str) -> Result<bool, DbError>;
	async fn get_commit(&self, repo_id: Uuid, hash: &str) -> Result<Option<CommitRecord>, DbError>;
	async fn upsert_tree_entry(&self, entry: &TreeEntryRecord) -> Result<(), DbError>;
	async fn list_tree_entries(
		&self,
		repo_id: Uuid,
		commit_hash: &str,
	) -> Result<Vec<TreeEntryRecord>, DbError>;
	async fn blob_exists(&self, content_hash: &str) -> Result<bool, DbError>;
	async fn get_blob(&self, content_hash: &str) -> Result<Option<BlobRecord>, DbError>;
	/// Write the blob row and the tree-entry row in one transaction so a
	/// reader never observes an entry pointing at a missing blob row.
	async fn upsert_blob_and_entry(
		&self,
		blob: &BlobRecord,
		entry: &TreeEntryRecord,
	) -> Result<(), DbError>;
	async fn get_branch_head(&self, repo_id: Uuid, branch: &str) -> Result<Option<String>, DbError>;
	/// Head hashes of every branch pointer the repository currently has.
	async fn list_branch_heads(&self, repo_id: Uuid) -> Result<Vec<String>, DbError>;
	/// Advance the branch pointer iff it still holds `expected_old`
	/// (`None` = the branch must not exist yet). Returns whether the swap won.
	async fn compare_and_swap_branch(
		&self,
		repo_id: Uuid,
		branch: &str,
		new_hash: &str,
		expected_old: Option<&str>,
	) -> Result<bool, DbError>;
}

#[derive(Clone)]
pub struct SqliteIndexStore {
	pool: SqlitePool,
}

impl SqliteIndexStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, DbError> {
	DateTime::parse_from_rfc3339(value)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("invalid timestamp {value}: {e}")))
}

fn parse_uuid(value: &str) -> Result<Uuid, DbError> {
	Uuid::parse_str(value).map_err(|e| DbError::Internal(format!("invalid uuid {value}: {e}")))
}

fn row_to_commit(row: &sqlx::sqlite::SqliteRow) -> Result<CommitRecord, DbError> {
	let parents: String = row.get("parent_hashes");
	Ok(CommitRecord {
		repo_id: parse_uuid(row.get("repo_id"))?,
		hash: row.get("hash"),
		parent_hashes: serde_json::from_str(&parents)?,
		tree_hash: row.get("tree_hash"),
		author_name: row.get("author_name"),
		author_email: row.get("author_email"),
		author_user_id: parse_uuid(row.get("author_user_id"))?,
		authored_at: parse_ts(row.get("authored_at"))?,
		committed_at: parse_ts(row.get("committed_at"))?,
		message: row.get("message"),
		branch: row.get("branch"),
		indexed_at: parse_ts(row.get("indexed_at"))?,
	})
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<TreeEntryRecord, DbError> {
	Ok(TreeEntryRecord {
		repo_id: parse_uuid(row.get("repo_id"))?,
		commit_hash: row.get("commit_hash"),
		path: row.get("path"),
		name: row.get("name"),
		is_dir: row.get::<i64, _>("is_dir") != 0,
		content_hash: row.get("content_hash"),
		size: row.get("size"),
		depth: row.get("depth"),
		modified_at: parse_ts(row.get("modified_at"))?,
	})
}

fn row_to_blob(row: &sqlx::sqlite::SqliteRow) -> BlobRecord {
	BlobRecord {
		content_hash: row.get("content_hash"),
		size: row.get("size"),
		mime_type: row.get("mime_type"),
		is_binary: row.get::<i64, _>("is_binary") != 0,
		line_count: row.get("line_count"),
		storage_key: row.get("storage_key"),
		extension: row.get("extension"),
	}
}

async fn insert_entry<'e, E>(executor: E, entry: &TreeEntryRecord) -> Result<(), DbError>
where
	E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
	sqlx::query(
		r#"
		INSERT OR REPLACE INTO tree_entries
			(repo_id, commit_hash, path, name, is_dir, content_hash, size, depth, modified_at)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(entry.repo_id.to_string())
	.bind(&entry.commit_hash)
	.bind(&entry.path)
	.bind(&entry.name)
	.bind(entry.is_dir as i64)
	.bind(&entry.content_hash)
	.bind(entry.size)
	.bind(entry.depth)
	.bind(entry.modified_at.to_rfc3339())
	.execute(executor)
	.await?;

	Ok(())
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
	#[tracing::instrument(skip(self, commit), fields(repo_id = %commit.repo_id, hash = %commit.hash))]
	async fn upsert_commit(&self, commit: &CommitRecord) -> Result<(), DbError> {
		// Commit rows are immutable: a second index run of the same commit
		// must be a no-op, so conflicts are ignored rather than replaced.
		sqlx::query(
			r#"
			INSERT OR IGNORE INTO commits
				(repo_id, hash, parent_hashes, tree_hash, author_name, author_email,
				 author_user_id, authored_at, committed_at, message, branch, indexed_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(commit.repo_id.to_string())
		.bind(&commit.hash)
		.bind(serde_json::to_string(&commit.parent_hashes)?)
		.bind(&commit.tree_hash)
		.bind(&commit.author_name)
		.bind(&commit.author_email)
		.bind(commit.author_user_id.to_string())
		.bind(commit.authored_at.to_rfc3339())
		.bind(commit.committed_at.to_rfc3339())
		.bind(&commit.message)
		.bind(&commit.branch)
		.bind(commit.indexed_at.to_rfc3339())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(repo_id = %repo_id, hash = %hash))]
	async fn commit_exists(&self, repo_id: Uuid, hash: &str) -> Result<bool, DbError> {
		let row = sqlx::query("SELECT 1 FROM commits WHERE repo_id = ? AND hash = ?")
			.bind(repo_id.to_string())
			.bind(hash)
			.fetch_optional(&self.pool)
			.await?;

		Ok(row.is_some())
	}

	#[tracing::instrument(skip(self), fields(repo_id = %repo_id, hash = %hash))]
	async fn get_commit(&self, repo_id: Uuid, hash: &str) -> Result<Option<CommitRecord>, DbError> {
		let row = sqlx::query(
			r#"
			SELECT repo_id, hash, parent_hashes, tree_hash, author_name, author_email,
			       author_user_id, authored_at, committed_at, message, branch, indexed_at
			FROM commits
			WHERE repo_id = ? AND hash = ?
			"#,
		)
		.bind(repo_id.to_string())
		.bind(hash)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| row_to_commit(&r)).transpose()
	}

	#[tracing::instrument(skip(self, entry), fields(repo_id = %entry.repo_id, path = %entry.path))]
	async fn upsert_tree_entry(&self, entry: &TreeEntryRecord) -> Result<(), DbError> {
		insert_entry(&self.pool, entry).await
	}

	#[tracing::instrument(skip(self), fields(repo_id = %repo_id, commit_hash = %commit_hash))]
	async fn list_tree_entries(
		&self,
		repo_id: Uuid,
		commit_hash: &str,
	) -> Result<Vec<TreeEntryRecord>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT repo_id, commit_hash, path, name, is_dir, content_hash, size, depth, modified_at
			FROM tree_entries
			WHERE repo_id = ? AND commit_hash = ?
			ORDER BY path ASC
			"#,
		)
		.bind(repo_id.to_string())
		.bind(commit_hash)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_entry).collect()
	}

	#[tracing::instrument(skip(self), fields(content_hash = %content_hash))]
	async fn blob_exists(&self, content_hash: &str) -> Result<bool, DbError> {
		let row = sqlx::query("SELECT 1 FROM blobs WHERE content_hash = ?")
			.bind(content_hash)
			.fetch_optional(&self.pool)
			.await?;

		Ok(row.is_some())
	}

	#[tracing::instrument(skip(self), fields(content_hash = %content_hash))]
	async fn get_blob(&self, content_hash: &str) -> Result<Option<BlobRecord>, DbError> {
		let row = sqlx::query(
			r#"
			SELECT content_hash, size, mime_type, is_binary, line_count, storage_key, extension
			FROM blobs
			WHERE content_hash = ?
			"#,
		)
		.bind(content_hash)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|r| row_to_blob(&r)))
	}

	#[tracing::instrument(skip(self, blob, entry), fields(content_hash = %blob.content_hash, path = %entry.path))]
	async fn upsert_blob_and_entry(
		&self,
		blob: &BlobRecord,
		entry: &TreeEntryRecord,
	) -> Result<(), DbError> {
		let mut tx = self.pool.begin().await?;

		// Blob rows are written at most once per content hash.
		sqlx::query(
			r#"
			INSERT OR IGNORE INTO blobs
				(content_hash, size, mime_type, is_binary, line_count, storage_key, extension)
			VALUES (?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&blob.content_hash)
		.bind(blob.size)
		.bind(&blob.mime_type)
		.bind(blob.is_binary as i64)
		.bind(blob.line_count)
		.bind(&blob.storage_key)
		.bind(&blob.extension)
		.execute(&mut *tx)
		.await?;

		insert_entry(&mut *tx, entry).await?;

		tx.commit().await?;
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(repo_id = %repo_id, branch = %branch))]
	async fn get_branch_head(&self, repo_id: Uuid, branch: &str) -> Result<Option<String>, DbError> {
		let row = sqlx::query("SELECT head_hash FROM branch_pointers WHERE repo_id = ? AND branch = ?")
			.bind(repo_id.to_string())
			.bind(branch)
			.fetch_optional(&self.pool)
			.await?;

		Ok(row.map(|r| r.get("head_hash")))
	}

	#[tracing::instrument(skip(self), fields(repo_id = %repo_id))]
	async fn list_branch_heads(&self, repo_id: Uuid) -> Result<Vec<String>, DbError> {
		let rows = sqlx::query("SELECT head_hash FROM branch_pointers WHERE repo_id = ?")
			.bind(repo_id.to_string())
			.fetch_all(&self.pool)
			.await?;

		Ok(rows.iter().map(|r| r.get("head_hash")).collect())
	}

	#[tracing::instrument(skip(self), fields(repo_id = %repo_id, branch = %branch, new_hash = %new_hash))]
	async fn compare_and_swap_branch(
		&self,
		repo_id: Uuid,
		branch: &str,
		new_hash: &str,
		expected_old: Option<&str>,
	) -> Result<bool, DbError> {
		match expected_old {
			None => {
				// Branch creation: the INSERT's primary key is the gate. A
				// concurrent creator hitting the unique violation lost the race.
				let result = sqlx::query(
					"INSERT INTO branch_pointers (repo_id, branch, head_hash) VALUES (?, ?, ?)",
				)
				.bind(repo_id.to_string())
				.bind(branch)
				.bind(new_hash)
				.execute(&self.pool)
				.await;

				match result {
					Ok(_) => Ok(true),
					Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => Ok(false),
					Err(e) => Err(DbError::Sqlx(e)),
				}
			}
			Some(old) => {
				let result = sqlx::query(
					r#"
					UPDATE branch_pointers
					SET head_hash = ?
					WHERE repo_id = ? AND branch = ? AND head_hash = ?
					"#,
				)
				.bind(new_hash)
				.bind(repo_id.to_string())
				.bind(branch)
				.bind(old)
				.execute(&self.pool)
				.await?;

				Ok(result.rows_affected() == 1)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_index_test_pool;
	use chrono::Utc;

	fn commit(repo_id: Uuid, hash: &str, parents: &[&str]) -> CommitRecord {
		CommitRecord {
			repo_id,
			hash: hash.to_string(),
			parent_hashes: parents.iter().map(|p| p.to_string()).collect(),
			tree_hash: format!("tree-{hash}"),
			author_name: "Test".to_string(),
			author_email: "test@example.com".to_string(),
			author_user_id: Uuid::new_v4(),
			authored_at: Utc::now(),
			committed_at: Utc::now(),
			message: "msg".to_string(),
			branch: "main".to_string(),
			indexed_at: Utc::now(),
		}
	}

	fn entry(repo_id: Uuid, commit_hash: &str, path: &str, content_hash: &str) -> TreeEntryRecord {
		TreeEntryRecord {
			repo_id,
			commit_hash: commit_hash.to_string(),
			path: path.to_string(),
			name: path.rsplit('/').next().unwrap_or(path).to_string(),
			is_dir: false,
			content_hash: content_hash.to_string(),
			size: 42,
			depth: path.matches('/').count() as i64,
			modified_at: Utc::now(),
		}
	}

	fn blob(content_hash: &str) -> BlobRecord {
		BlobRecord {
			content_hash: content_hash.to_string(),
			size: 42,
			mime_type: "text/plain".to_string(),
			is_binary: false,
			line_count: Some(3),
			storage_key: format!("blobs/{content_hash}"),
			extension: Some("txt".to_string()),
		}
	}

	#[tokio::test]
	async fn test_commit_upsert_is_idempotent() {
		let store = SqliteIndexStore::new(create_index_test_pool().await);
		let repo_id = Uuid::new_v4();

		let first = commit(repo_id, "c1", &[]);
		store.upsert_commit(&first).await.unwrap();

		let mut second = commit(repo_id, "c1", &[]);
		second.message = "rewritten".to_string();
		store.upsert_commit(&second).await.unwrap();

		let stored = store.get_commit(repo_id, "c1").await.unwrap().unwrap();
		assert_eq!(stored.message, "msg", "first write wins");
		assert!(store.commit_exists(repo_id, "c1").await.unwrap());
	}

	#[tokio::test]
	async fn test_commit_parents_preserve_order() {
		let store = SqliteIndexStore::new(create_index_test_pool().await);
		let repo_id = Uuid::new_v4();

		store
			.upsert_commit(&commit(repo_id, "merge", &["p1", "p2"]))
			.await
			.unwrap();

		let stored = store.get_commit(repo_id, "merge").await.unwrap().unwrap();
		assert_eq!(stored.parent_hashes, vec!["p1", "p2"]);
	}

	#[tokio::test]
	async fn test_blob_and_entry_written_together() {
		let store = SqliteIndexStore::new(create_index_test_pool().await);
		let repo_id = Uuid::new_v4();

		store
			.upsert_blob_and_entry(&blob("b1"), &entry(repo_id, "c1", "src/lib.rs", "b1"))
			.await
			.unwrap();

		assert!(store.blob_exists("b1").await.unwrap());
		let entries = store.list_tree_entries(repo_id, "c1").await.unwrap();
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].path, "src/lib.rs");
		assert_eq!(entries[0].depth, 1);
	}

	#[tokio::test]
	async fn test_blob_row_written_once_per_hash() {
		let store = SqliteIndexStore::new(create_index_test_pool().await);
		let repo_id = Uuid::new_v4();

		store
			.upsert_blob_and_entry(&blob("b1"), &entry(repo_id, "c1", "a.txt", "b1"))
			.await
			.unwrap();

		let mut changed = blob("b1");
		changed.mime_type = "application/json".to_string();
		store
			.upsert_blob_and_entry(&changed, &entry(repo_id, "c2", "b.txt", "b1"))
			.await
			.unwrap();

		let stored = store.get_blob("b1").await.unwrap().unwrap();
		assert_eq!(stored.mime_type, "text/plain");
	}

	#[tokio::test]
	async fn test_cas_branch_creation() {
		let store = SqliteIndexStore::new(create_index_test_pool().await);
		let repo_id = Uuid::new_v4();

		assert!(store
			.compare_and_swap_branch(repo_id, "main", "c1", None)
			.await
			.unwrap());
		assert_eq!(
			store.get_branch_head(repo_id, "main").await.unwrap(),
			Some("c1".to_string())
		);

		// Second creation of the same branch loses.
		assert!(!store
			.compare_and_swap_branch(repo_id, "main", "c2", None)
			.await
			.unwrap());
		assert_eq!(
			store.get_branch_head(repo_id, "main").await.unwrap(),
			Some("c1".to_string())
		);
	}

	#[tokio::test]
	async fn test_cas_exactly_one_winner() {
		let store = SqliteIndexStore::new(create_index_test_pool().await);
		let repo_id = Uuid::new_v4();

		store
			.compare_and_swap_branch(repo_id, "main", "c1", None)
			.await
			.unwrap();

		let first = store
			.compare_and_swap_branch(repo_id, "main", "c2", Some("c1"))
			.await
			.unwrap();
		let second = store
			.compare_and_swap_branch(repo_id, "main", "c3", Some("c1"))
			.await
			.unwrap();

		assert!(first);
		assert!(!second, "stale expected value must lose");
		assert_eq!(
			store.get_branch_head(repo_id, "main").await.unwrap(),
			Some("c2".to_string())
		);
	}

	#[tokio::test]
	async fn test_cas_update_on_missing_branch_fails() {
		let store = SqliteIndexStore::new(create_index_test_pool().await);
		let repo_id = Uuid::new_v4();

		assert!(!store
			.compare_and_swap_branch(repo_id, "main", "c2", Some("c1"))
			.await
			.unwrap());
	}

	#[tokio::test]
	async fn test_list_branch_heads_scoped_to_repo() {
		let store = SqliteIndexStore::new(create_index_test_pool().await);
		let repo_id = Uuid::new_v4();
		let other_repo = Uuid::new_v4();

		store
			.compare_and_swap_branch(repo_id, "main", "c1", None)
			.await
			.unwrap();
		store
			.compare_and_swap_branch(repo_id, "feature", "c2", None)
			.await
			.unwrap();
		store
			.compare_and_swap_branch(other_repo, "main", "c9", None)
			.await
			.unwrap();

		let mut heads = store.list_branch_heads(repo_id).await.unwrap();
		heads.sort();
		assert_eq!(heads, vec!["c1".to_string(), "c2".to_string()]);
		assert!(store.list_branch_heads(Uuid::new_v4()).await.unwrap().is_empty());
	}
}
