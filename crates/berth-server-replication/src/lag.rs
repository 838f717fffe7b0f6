// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use git2::{Oid, Repository, Sort};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use berth_server_db::{RepoReplicaRecord, ReplicaHealth, TopologyStore};

use crate::error::{ReplicationError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LagReporterConfig {
	/// When set, the reporter fetches the primary's branch head into the
	/// local namespace before measuring instead of trusting a cached value.
	pub probe_primary: bool,
	/// Local ref namespace the primary's head is fetched into.
	pub primary_ref_namespace: String,
}

impl Default for LagReporterConfig {
	fn default() -> Self {
		Self {
			probe_primary: true,
			primary_ref_namespace: "refs/berth/primary".to_string(),
		}
	}
}

/// Last known head of the primary for one branch. The timestamp is the
/// fallback for time-lag when the commit object is not available locally.
#[derive(Debug, Clone)]
pub struct PrimaryHead {
	pub hash: String,
	pub committed_at: Option<DateTime<Utc>>,
}

/// One replica measurement request: which local copy to examine and where
/// the primary's state comes from.
#[derive(Debug, Clone)]
pub struct ReplicaProbe {
	pub repo_id: Uuid,
	pub node_id: String,
	pub local_path: PathBuf,
	pub branch: String,
	/// Primary URL to fetch from when active probing is enabled.
	pub primary_url: Option<String>,
	/// Cached primary head used when probing is disabled or the fetched
	/// object cannot be timestamped locally.
	pub cached_primary: Option<PrimaryHead>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LagMeasurement {
	lag_commits: i64,
	lag_ms: i64,
	health: ReplicaHealth,
}

/// Measures how far a local replica trails the primary, in commits and in
/// wall-clock time, and records the result on the replica row. Measurement
/// failures degrade the replica; they never leave stale healthy state.
pub struct LagReporter {
	topology: Arc<dyn TopologyStore>,
	config: LagReporterConfig,
}

impl LagReporter {
	pub fn new(topology: Arc<dyn TopologyStore>, config: LagReporterConfig) -> Self {
		Self { topology, config }
	}

	#[tracing::instrument(skip(self, probe), fields(repo_id = %probe.repo_id, node_id = %probe.node_id, branch = %probe.branch))]
	pub async fn report(&self, probe: &ReplicaProbe) -> Result<RepoReplicaRecord> {
		let measurement = match self.measure(probe).await {
			Ok(measurement) => measurement,
			Err(e) => {
				warn!(error = %e, "lag measurement failed, degrading replica");
				LagMeasurement {
					lag_commits: i64::MAX,
					lag_ms: i64::MAX,
					health: ReplicaHealth::Degraded,
				}
			}
		};

		let record = RepoReplicaRecord {
			repo_id: probe.repo_id,
			node_id: probe.node_id.clone(),
			health: measurement.health,
			lag_ms: measurement.lag_ms,
			lag_commits: measurement.lag_commits,
			updated_at: Utc::now(),
		};
		self.topology.upsert_replica(&record).await?;
		debug!(
			lag_commits = record.lag_commits,
			lag_ms = record.lag_ms,
			health = %record.health.as_str(),
			"replica lag recorded"
		);
		Ok(record)
	}

	async fn measure(&self, probe: &ReplicaProbe) -> Result<LagMeasurement> {
		let primary = self.primary_head(probe).await?;
		let local_path = probe.local_path.clone();
		let branch = probe.branch.clone();

		tokio::task::spawn_blocking(move || compare_heads(&local_path, &branch, &primary)).await?
	}

	/// Resolve the primary's head: fetched into the local namespace when
	/// probing is on, otherwise taken from the cached value.
	async fn primary_head(&self, probe: &ReplicaProbe) -> Result<PrimaryHead> {
		if self.config.probe_primary {
			if let Some(url) = &probe.primary_url {
				let primary_ref = format!("{}/{}", self.config.primary_ref_namespace, probe.branch);
				fetch_primary_ref(&probe.local_path, url, &probe.branch, &primary_ref).await?;
				let local_path = probe.local_path.clone();
				let hash = tokio::task::spawn_blocking(move || resolve_ref(&local_path, &primary_ref))
					.await??;
				return Ok(PrimaryHead {
					hash,
					committed_at: probe.cached_primary.as_ref().and_then(|p| p.committed_at),
				});
			}
		}
		probe
			.cached_primary
			.clone()
			.ok_or_else(|| ReplicationError::Git("no primary head available".to_string()))
	}
}

/// Fetch the primary's branch head into a local tracking ref via the git
/// CLI; forced so a rewound primary still updates the ref.
async fn fetch_primary_ref(
	local_path: &Path,
	primary_url: &str,
	branch: &str,
	primary_ref: &str,
) -> Result<()> {
	let refspec = format!("+refs/heads/{branch}:{primary_ref}");
	let output = tokio::process::Command::new("git")
		.arg("fetch")
		.arg(primary_url)
		.arg(&refspec)
		.current_dir(local_path)
		.output()
		.await?;

	if !output.status.success() {
		return Err(ReplicationError::Git(format!(
			"primary fetch failed: {}",
			String::from_utf8_lossy(&output.stderr).trim()
		)));
	}
	Ok(())
}

fn resolve_ref(repo_path: &Path, refname: &str) -> Result<String> {
	let repo = open_repo(repo_path)?;
	let commit = repo
		.revparse_single(refname)
		.and_then(|obj| obj.peel_to_commit())
		.map_err(|e| ReplicationError::Git(format!("failed to resolve {refname}: {e}")))?;
	Ok(commit.id().to_string())
}

fn open_repo(repo_path: &Path) -> Result<Repository> {
	Repository::open(repo_path)
		.map_err(|e| ReplicationError::Git(format!("failed to open {}: {e}", repo_path.display())))
}

fn commit_time(repo: &Repository, oid: Oid) -> Result<DateTime<Utc>> {
	let commit = repo
		.find_commit(oid)
		.map_err(|e| ReplicationError::Git(format!("failed to read commit {oid}: {e}")))?;
	Ok(DateTime::from_timestamp(commit.time().seconds(), 0).unwrap_or(DateTime::UNIX_EPOCH))
}

fn compare_heads(local_path: &Path, branch: &str, primary: &PrimaryHead) -> Result<LagMeasurement> {
	let repo = open_repo(local_path)?;
	let local_hash = resolve_ref(local_path, &format!("refs/heads/{branch}"))?;

	if local_hash == primary.hash {
		return Ok(LagMeasurement {
			lag_commits: 0,
			lag_ms: 0,
			health: ReplicaHealth::Healthy,
		});
	}

	let primary_oid = Oid::from_str(&primary.hash)
		.map_err(|e| ReplicationError::Git(format!("invalid primary hash: {e}")))?;
	let local_oid = Oid::from_str(&local_hash)
		.map_err(|e| ReplicationError::Git(format!("invalid local hash: {e}")))?;

	if repo.find_commit(primary_oid).is_err() {
		// The primary's head has not replicated here yet; the commit-count
		// distance is unknowable locally.
		let lag_ms = match primary.committed_at {
			Some(primary_time) => {
				let local_time = commit_time(&repo, local_oid)?;
				(primary_time - local_time).num_milliseconds().max(0)
			}
			None => i64::MAX,
		};
		return Ok(LagMeasurement {
			lag_commits: i64::MAX,
			lag_ms,
			health: ReplicaHealth::Degraded,
		});
	}

	let mut walk = repo
		.revwalk()
		.map_err(|e| ReplicationError::Git(format!("revwalk failed: {e}")))?;
	walk
		.push(primary_oid)
		.and_then(|_| walk.hide(local_oid))
		.and_then(|_| walk.set_sorting(Sort::TOPOLOGICAL))
		.map_err(|e| ReplicationError::Git(format!("revwalk setup failed: {e}")))?;
	let mut lag_commits = 0i64;
	for oid in walk {
		oid.map_err(|e| ReplicationError::Git(format!("revwalk failed: {e}")))?;
		lag_commits += 1;
	}

	let primary_time = commit_time(&repo, primary_oid)?;
	let local_time = commit_time(&repo, local_oid)?;
	let lag_ms = (primary_time - local_time).num_milliseconds().max(0);

	Ok(LagMeasurement {
		lag_commits,
		lag_ms,
		health: ReplicaHealth::Healthy,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use berth_server_db::{testing::create_index_test_pool, SqliteTopologyStore};
	use std::process::Command;

	fn git(dir: &Path, args: &[&str]) -> String {
		let output = Command::new("git").args(args).current_dir(dir).output().unwrap();
		assert!(
			output.status.success(),
			"git {:?} failed: {}",
			args,
			String::from_utf8_lossy(&output.stderr)
		);
		String::from_utf8_lossy(&output.stdout).trim().to_string()
	}

	struct Fixture {
		_temp: tempfile::TempDir,
		primary: PathBuf,
		replica: PathBuf,
	}

	/// Primary work tree plus a replica clone that can be left behind.
	fn fixture() -> Fixture {
		let temp = tempfile::tempdir().unwrap();
		let primary = temp.path().join("primary");
		std::fs::create_dir_all(&primary).unwrap();
		git(&primary, &["init", "--initial-branch=main"]);
		git(&primary, &["config", "user.name", "Test"]);
		git(&primary, &["config", "user.email", "test@test.com"]);
		std::fs::write(primary.join("file.txt"), "one").unwrap();
		git(&primary, &["add", "-A"]);
		git(&primary, &["commit", "-m", "c1"]);

		let replica = temp.path().join("replica");
		let output = Command::new("git")
			.args(["clone"])
			.arg(&primary)
			.arg(&replica)
			.output()
			.unwrap();
		assert!(output.status.success());

		Fixture {
			_temp: temp,
			primary,
			replica,
		}
	}

	fn advance_primary(fixture: &Fixture, n: usize) -> String {
		for i in 0..n {
			std::fs::write(fixture.primary.join("file.txt"), format!("rev-{i}")).unwrap();
			git(&fixture.primary, &["add", "-A"]);
			git(&fixture.primary, &["commit", "-m", &format!("advance {i}")]);
		}
		git(&fixture.primary, &["rev-parse", "HEAD"])
	}

	async fn reporter(config: LagReporterConfig) -> (LagReporter, Arc<SqliteTopologyStore>) {
		let topology = Arc::new(SqliteTopologyStore::new(create_index_test_pool().await));
		(
			LagReporter::new(Arc::clone(&topology) as Arc<dyn TopologyStore>, config),
			topology,
		)
	}

	fn probe(fixture: &Fixture, repo_id: Uuid, cached: Option<PrimaryHead>) -> ReplicaProbe {
		ReplicaProbe {
			repo_id,
			node_id: "replica-node".to_string(),
			local_path: fixture.replica.clone(),
			branch: "main".to_string(),
			primary_url: Some(format!("file://{}", fixture.primary.display())),
			cached_primary: cached,
		}
	}

	#[tokio::test]
	async fn test_replica_at_head_has_zero_lag() {
		let fixture = fixture();
		let (reporter, topology) = reporter(LagReporterConfig::default()).await;
		let repo_id = Uuid::new_v4();

		let record = reporter.report(&probe(&fixture, repo_id, None)).await.unwrap();

		assert_eq!(record.health, ReplicaHealth::Healthy);
		assert_eq!(record.lag_commits, 0);
		assert_eq!(record.lag_ms, 0);

		let stored = topology.list_replicas(repo_id).await.unwrap();
		assert_eq!(stored.len(), 1);
		assert_eq!(stored[0].lag_commits, 0);
	}

	#[tokio::test]
	async fn test_probe_counts_commits_behind() {
		let fixture = fixture();
		advance_primary(&fixture, 3);
		let (reporter, _) = reporter(LagReporterConfig::default()).await;

		let record = reporter
			.report(&probe(&fixture, Uuid::new_v4(), None))
			.await
			.unwrap();

		// The probe fetch makes the primary commits locally reachable.
		assert_eq!(record.health, ReplicaHealth::Healthy);
		assert_eq!(record.lag_commits, 3);
		assert!(record.lag_ms >= 0);
	}

	#[tokio::test]
	async fn test_cached_head_unavailable_locally_degrades() {
		let fixture = fixture();
		let head = advance_primary(&fixture, 1);
		let config = LagReporterConfig {
			probe_primary: false,
			..LagReporterConfig::default()
		};
		let (reporter, _) = reporter(config).await;

		// No probe fetch: the replica never saw the new commit object.
		let cached = PrimaryHead {
			hash: head,
			committed_at: Some(Utc::now()),
		};
		let record = reporter
			.report(&probe(&fixture, Uuid::new_v4(), Some(cached)))
			.await
			.unwrap();

		assert_eq!(record.health, ReplicaHealth::Degraded);
		assert_eq!(record.lag_commits, i64::MAX);
		// Time lag fell back to the cached primary timestamp.
		assert!(record.lag_ms < i64::MAX);
		assert!(record.lag_ms >= 0);
	}

	#[tokio::test]
	async fn test_measurement_error_degrades_with_infinite_lag() {
		let fixture = fixture();
		let (reporter, topology) = reporter(LagReporterConfig::default()).await;
		let repo_id = Uuid::new_v4();

		let mut bad_probe = probe(&fixture, repo_id, None);
		bad_probe.local_path = fixture.primary.join("not-a-repo");
		let record = reporter.report(&bad_probe).await.unwrap();

		assert_eq!(record.health, ReplicaHealth::Degraded);
		assert_eq!(record.lag_commits, i64::MAX);
		assert_eq!(record.lag_ms, i64::MAX);

		// The degraded state is durable, not just returned.
		let stored = topology.list_replicas(repo_id).await.unwrap();
		assert_eq!(stored[0].health, ReplicaHealth::Degraded);
	}

	#[tokio::test]
	async fn test_no_probe_and_no_cache_degrades() {
		let fixture = fixture();
		let config = LagReporterConfig {
			probe_primary: false,
			..LagReporterConfig::default()
		};
		let (reporter, _) = reporter(config).await;

		let record = reporter
			.report(&probe(&fixture, Uuid::new_v4(), None))
			.await
			.unwrap();
		assert_eq!(record.health, ReplicaHealth::Degraded);
		assert_eq!(record.lag_commits, i64::MAX);
	}
}
