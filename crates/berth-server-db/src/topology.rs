// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use sqlx::{sqlite::SqlitePool, Row};
use uuid::Uuid;

use crate::error::DbError;
use crate::types::{GitNodeRecord, RepoLocationRecord, RepoReplicaRecord};

/// Storage topology: nodes, primary assignments, and replica lag state.
///
/// Node rows are populated by the heartbeat mechanism; the placement service
/// and the lag reporter only read and upsert through this trait.
#[async_trait]
pub trait TopologyStore: Send + Sync {
	async fn upsert_node(&self, node: &GitNodeRecord) -> Result<(), DbError>;
	async fn get_node(&self, node_id: &str) -> Result<Option<GitNodeRecord>, DbError>;
	async fn list_nodes(&self) -> Result<Vec<GitNodeRecord>, DbError>;
	async fn list_healthy_nodes(&self) -> Result<Vec<GitNodeRecord>, DbError>;
	async fn get_location(&self, repo_id: Uuid) -> Result<Option<RepoLocationRecord>, DbError>;
	/// Insert-once: a second assignment for the same repository is a conflict.
	async fn create_location(&self, location: &RepoLocationRecord) -> Result<(), DbError>;
	async fn upsert_replica(&self, replica: &RepoReplicaRecord) -> Result<(), DbError>;
	async fn list_replicas(&self, repo_id: Uuid) -> Result<Vec<RepoReplicaRecord>, DbError>;
}

#[derive(Clone)]
pub struct SqliteTopologyStore {
	pool: SqlitePool,
}

impl SqliteTopologyStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

fn row_to_node(row: &sqlx::sqlite::SqliteRow) -> GitNodeRecord {
	GitNodeRecord {
		node_id: row.get("node_id"),
		host: row.get("host"),
		zone: row.get("zone"),
		region: row.get("region"),
		healthy: row.get::<i64, _>("healthy") != 0,
		repo_count: row.get("repo_count"),
		disk_usage_pct: row.get("disk_usage_pct"),
		iops: row.get("iops"),
	}
}

fn row_to_replica(row: &sqlx::sqlite::SqliteRow) -> Result<RepoReplicaRecord, DbError> {
	let health: String = row.get("health");
	let updated_at: String = row.get("updated_at");
	Ok(RepoReplicaRecord {
		repo_id: Uuid::parse_str(row.get("repo_id"))
			.map_err(|e| DbError::Internal(format!("invalid uuid: {e}")))?,
		node_id: row.get("node_id"),
		health: health
			.parse()
			.map_err(|e: String| DbError::Internal(e))?,
		lag_ms: row.get("lag_ms"),
		lag_commits: row.get("lag_commits"),
		updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
			.map(|dt| dt.with_timezone(&chrono::Utc))
			.map_err(|e| DbError::Internal(format!("invalid timestamp: {e}")))?,
	})
}

#[async_trait]
impl TopologyStore for SqliteTopologyStore {
	#[tracing::instrument(skip(self, node), fields(node_id = %node.node_id))]
	async fn upsert_node(&self, node: &GitNodeRecord) -> Result<(), DbError> {
		sqlx::query(
			r#"
			INSERT INTO git_nodes (node_id, host, zone, region, healthy, repo_count, disk_usage_pct, iops)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(node_id) DO UPDATE SET
				host = excluded.host,
				zone = excluded.zone,
				region = excluded.region,
				healthy = excluded.healthy,
				repo_count = excluded.repo_count,
				disk_usage_pct = excluded.disk_usage_pct,
				iops = excluded.iops
			"#,
		)
		.bind(&node.node_id)
		.bind(&node.host)
		.bind(&node.zone)
		.bind(&node.region)
		.bind(node.healthy as i64)
		.bind(node.repo_count)
		.bind(node.disk_usage_pct)
		.bind(node.iops)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(node_id = %node_id))]
	async fn get_node(&self, node_id: &str) -> Result<Option<GitNodeRecord>, DbError> {
		let row = sqlx::query(
			r#"
			SELECT node_id, host, zone, region, healthy, repo_count, disk_usage_pct, iops
			FROM git_nodes
			WHERE node_id = ?
			"#,
		)
		.bind(node_id)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|r| row_to_node(&r)))
	}

	#[tracing::instrument(skip(self))]
	async fn list_nodes(&self) -> Result<Vec<GitNodeRecord>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT node_id, host, zone, region, healthy, repo_count, disk_usage_pct, iops
			FROM git_nodes
			ORDER BY node_id ASC
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows.iter().map(row_to_node).collect())
	}

	#[tracing::instrument(skip(self))]
	async fn list_healthy_nodes(&self) -> Result<Vec<GitNodeRecord>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT node_id, host, zone, region, healthy, repo_count, disk_usage_pct, iops
			FROM git_nodes
			WHERE healthy = 1
			ORDER BY node_id ASC
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows.iter().map(row_to_node).collect())
	}

	#[tracing::instrument(skip(self), fields(repo_id = %repo_id))]
	async fn get_location(&self, repo_id: Uuid) -> Result<Option<RepoLocationRecord>, DbError> {
		let row = sqlx::query("SELECT repo_id, primary_node_id FROM repo_locations WHERE repo_id = ?")
			.bind(repo_id.to_string())
			.fetch_optional(&self.pool)
			.await?;

		row
			.map(|r| {
				Ok(RepoLocationRecord {
					repo_id: Uuid::parse_str(r.get("repo_id"))
						.map_err(|e| DbError::Internal(format!("invalid uuid: {e}")))?,
					primary_node_id: r.get("primary_node_id"),
				})
			})
			.transpose()
	}

	#[tracing::instrument(skip(self, location), fields(repo_id = %location.repo_id, node_id = %location.primary_node_id))]
	async fn create_location(&self, location: &RepoLocationRecord) -> Result<(), DbError> {
		sqlx::query("INSERT INTO repo_locations (repo_id, primary_node_id) VALUES (?, ?)")
			.bind(location.repo_id.to_string())
			.bind(&location.primary_node_id)
			.execute(&self.pool)
			.await
			.map_err(|e| match e {
				sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
					DbError::Conflict("Repository already placed".to_string())
				}
				_ => DbError::Sqlx(e),
			})?;

		Ok(())
	}

	#[tracing::instrument(skip(self, replica), fields(repo_id = %replica.repo_id, node_id = %replica.node_id))]
	async fn upsert_replica(&self, replica: &RepoReplicaRecord) -> Result<(), DbError> {
		sqlx::query(
			r#"
			INSERT INTO repo_replicas (repo_id, node_id, health, lag_ms, lag_commits, updated_at)
			VALUES (?, ?, ?, ?, ?, ?)
			ON CONFLICT(repo_id, node_id) DO UPDATE SET
				health = excluded.health,
				lag_ms = excluded.lag_ms,
				lag_commits = excluded.lag_commits,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(replica.repo_id.to_string())
		.bind(&replica.node_id)
		.bind(replica.health.as_str())
		.bind(replica.lag_ms)
		.bind(replica.lag_commits)
		.bind(replica.updated_at.to_rfc3339())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(repo_id = %repo_id))]
	async fn list_replicas(&self, repo_id: Uuid) -> Result<Vec<RepoReplicaRecord>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT repo_id, node_id, health, lag_ms, lag_commits, updated_at
			FROM repo_replicas
			WHERE repo_id = ?
			ORDER BY node_id ASC
			"#,
		)
		.bind(repo_id.to_string())
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(row_to_replica).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_index_test_pool;
	use crate::types::ReplicaHealth;
	use chrono::Utc;

	fn node(id: &str, healthy: bool) -> GitNodeRecord {
		GitNodeRecord {
			node_id: id.to_string(),
			host: format!("{id}.internal"),
			zone: "z1".to_string(),
			region: "r1".to_string(),
			healthy,
			repo_count: 0,
			disk_usage_pct: 0.0,
			iops: 0.0,
		}
	}

	#[tokio::test]
	async fn test_node_upsert_and_healthy_filter() {
		let store = SqliteTopologyStore::new(create_index_test_pool().await);

		store.upsert_node(&node("node-a", true)).await.unwrap();
		store.upsert_node(&node("node-b", false)).await.unwrap();

		assert_eq!(store.list_nodes().await.unwrap().len(), 2);
		let healthy = store.list_healthy_nodes().await.unwrap();
		assert_eq!(healthy.len(), 1);
		assert_eq!(healthy[0].node_id, "node-a");

		// Heartbeat update flows through the upsert.
		let mut updated = node("node-b", true);
		updated.repo_count = 7;
		store.upsert_node(&updated).await.unwrap();
		assert_eq!(store.list_healthy_nodes().await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn test_location_is_insert_once() {
		let store = SqliteTopologyStore::new(create_index_test_pool().await);
		let repo_id = Uuid::new_v4();

		store
			.create_location(&RepoLocationRecord {
				repo_id,
				primary_node_id: "node-a".to_string(),
			})
			.await
			.unwrap();

		let err = store
			.create_location(&RepoLocationRecord {
				repo_id,
				primary_node_id: "node-b".to_string(),
			})
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::Conflict(_)));

		let location = store.get_location(repo_id).await.unwrap().unwrap();
		assert_eq!(location.primary_node_id, "node-a");
	}

	#[tokio::test]
	async fn test_replica_upsert_overwrites_lag() {
		let store = SqliteTopologyStore::new(create_index_test_pool().await);
		let repo_id = Uuid::new_v4();

		store
			.upsert_replica(&RepoReplicaRecord {
				repo_id,
				node_id: "node-b".to_string(),
				health: ReplicaHealth::Unknown,
				lag_ms: i64::MAX,
				lag_commits: i64::MAX,
				updated_at: Utc::now(),
			})
			.await
			.unwrap();

		store
			.upsert_replica(&RepoReplicaRecord {
				repo_id,
				node_id: "node-b".to_string(),
				health: ReplicaHealth::Healthy,
				lag_ms: 0,
				lag_commits: 0,
				updated_at: Utc::now(),
			})
			.await
			.unwrap();

		let replicas = store.list_replicas(repo_id).await.unwrap();
		assert_eq!(replicas.len(), 1);
		assert_eq!(replicas[0].health, ReplicaHealth::Healthy);
		assert_eq!(replicas[0].lag_commits, 0);
	}
}
