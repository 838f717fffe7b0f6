// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use gix::progress::Discard;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use berth_server_db::GitNodeRecord;

use crate::error::{ReplicationError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
	Updated,
	NoChanges,
}

/// URL of a repository on a storage node. Hosts that already carry a scheme
/// (file://, https://) are used verbatim; bare hosts get the git protocol.
pub fn source_url(node: &GitNodeRecord, repo_id: Uuid) -> String {
	if node.host.contains("://") {
		format!("{}/{}.git", node.host.trim_end_matches('/'), repo_id)
	} else {
		format!("git://{}/{}.git", node.host, repo_id)
	}
}

/// On-disk path of a replica under a node's data directory.
pub fn replica_path(data_dir: &Path, repo_id: Uuid) -> PathBuf {
	data_dir.join(format!("{repo_id}.git"))
}

/// Bring `target_path` up to date with the source: bare clone when the
/// replica does not exist yet, fetch otherwise.
#[instrument(fields(url = %source_url, path = ?target_path))]
pub async fn sync_replica(source_url: &str, target_path: &Path) -> Result<SyncOutcome> {
	if !target_path.exists() {
		clone_bare(target_path, source_url).await?;
		return Ok(SyncOutcome::Updated);
	}

	let before = refs_digest(target_path)?;
	fetch_updates(target_path, source_url).await?;
	let after = refs_digest(target_path)?;
	if before != after {
		Ok(SyncOutcome::Updated)
	} else {
		Ok(SyncOutcome::NoChanges)
	}
}

/// Last-resort recovery: drop the replica entirely and re-clone from the
/// source. Used after the retry budget is exhausted.
#[instrument(fields(url = %source_url, path = ?target_path))]
pub async fn rebuild_replica(source_url: &str, target_path: &Path) -> Result<()> {
	if target_path.exists() {
		warn!("removing replica for forced rebuild");
		tokio::fs::remove_dir_all(target_path).await?;
	}
	clone_bare(target_path, source_url).await?;
	info!("replica rebuilt from source");
	Ok(())
}

async fn clone_bare(target_path: &Path, clone_url: &str) -> Result<()> {
	info!(url = %clone_url, path = ?target_path, "cloning bare replica");

	if let Some(parent) = target_path.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}

	let url = clone_url.to_string();
	let path = target_path.to_path_buf();

	tokio::task::spawn_blocking(move || {
		let interrupt = AtomicBool::new(false);
		let url = gix::url::parse(url.as_str().into())
			.map_err(|e| ReplicationError::Git(format!("invalid URL: {e}")))?;

		let mut prepare = gix::prepare_clone_bare(url, &path)
			.map_err(|e| ReplicationError::Git(format!("clone prepare failed: {e}")))?;

		prepare
			.fetch_only(Discard, &interrupt)
			.map_err(|e| ReplicationError::Git(format!("clone fetch failed: {e}")))?;

		debug!("clone completed");
		Ok(())
	})
	.await?
}

async fn fetch_updates(target_path: &Path, clone_url: &str) -> Result<()> {
	info!(url = %clone_url, path = ?target_path, "fetching replica updates");

	let url = clone_url.to_string();
	let path = target_path.to_path_buf();

	tokio::task::spawn_blocking(move || {
		let repo =
			gix::open(&path).map_err(|e| ReplicationError::Git(format!("failed to open replica: {e}")))?;

		let remote_url = gix::url::parse(url.as_str().into())
			.map_err(|e| ReplicationError::Git(format!("invalid URL: {e}")))?;

		let remote = repo
			.remote_at(remote_url)
			.map_err(|e| ReplicationError::Git(format!("failed to create remote: {e}")))?
			.with_refspecs(["+refs/heads/*:refs/heads/*"], gix::remote::Direction::Fetch)
			.map_err(|e| ReplicationError::Git(format!("invalid refspec: {e}")))?;

		let interrupt = AtomicBool::new(false);

		remote
			.connect(gix::remote::Direction::Fetch)
			.map_err(|e| ReplicationError::Git(format!("failed to connect: {e}")))?
			.prepare_fetch(Discard, Default::default())
			.map_err(|e| ReplicationError::Git(format!("failed to prepare fetch: {e}")))?
			.receive(Discard, &interrupt)
			.map_err(|e| ReplicationError::Git(format!("fetch failed: {e}")))?;

		debug!("fetch completed");
		Ok(())
	})
	.await?
}

/// Sorted ref-name/id digest used to detect whether a fetch changed anything.
fn refs_digest(repo_path: &Path) -> Result<String> {
	let repo = gix::open(repo_path)
		.map_err(|e| ReplicationError::Git(format!("failed to open replica: {e}")))?;

	let refs = repo
		.references()
		.map_err(|e| ReplicationError::Git(format!("failed to read refs: {e}")))?;

	let mut lines = Vec::new();
	for r in refs
		.all()
		.map_err(|e| ReplicationError::Git(e.to_string()))?
		.flatten()
	{
		if let Some(id) = r.try_id() {
			lines.push(format!("{} {}", id.detach(), r.name().as_bstr()));
		}
	}

	lines.sort();
	Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::process::Command;

	fn git(dir: &Path, args: &[&str]) {
		let output = Command::new("git").args(args).current_dir(dir).output().unwrap();
		assert!(
			output.status.success(),
			"git {:?} failed: {}",
			args,
			String::from_utf8_lossy(&output.stderr)
		);
	}

	fn seed_source(root: &Path) -> PathBuf {
		let source = root.join("source.git");
		let work = root.join("work");
		Command::new("git")
			.args(["init", "--bare"])
			.arg(&source)
			.output()
			.unwrap();
		Command::new("git")
			.args(["clone"])
			.arg(&source)
			.arg(&work)
			.output()
			.unwrap();
		git(&work, &["config", "user.name", "Test"]);
		git(&work, &["config", "user.email", "test@test.com"]);
		std::fs::write(work.join("file.txt"), "initial").unwrap();
		git(&work, &["add", "."]);
		git(&work, &["commit", "-m", "initial"]);
		git(&work, &["push"]);
		source
	}

	#[test]
	fn test_source_url_formats() {
		let mut node = GitNodeRecord {
			node_id: "n1".to_string(),
			host: "storage-1.internal".to_string(),
			zone: "z1".to_string(),
			region: "r1".to_string(),
			healthy: true,
			repo_count: 0,
			disk_usage_pct: 0.0,
			iops: 0.0,
		};
		let repo_id = Uuid::nil();
		assert_eq!(
			source_url(&node, repo_id),
			format!("git://storage-1.internal/{repo_id}.git")
		);

		node.host = "file:///srv/repos".to_string();
		assert_eq!(
			source_url(&node, repo_id),
			format!("file:///srv/repos/{repo_id}.git")
		);
	}

	#[tokio::test]
	async fn test_sync_clones_then_reports_no_changes() {
		let temp = tempfile::tempdir().unwrap();
		let source = seed_source(temp.path());
		let target = temp.path().join("replica.git");
		let url = format!("file://{}", source.display());

		assert_eq!(sync_replica(&url, &target).await.unwrap(), SyncOutcome::Updated);
		assert!(target.exists());
		assert_eq!(
			sync_replica(&url, &target).await.unwrap(),
			SyncOutcome::NoChanges
		);
	}

	#[tokio::test]
	async fn test_sync_picks_up_new_commits() {
		let temp = tempfile::tempdir().unwrap();
		let source = seed_source(temp.path());
		let work = temp.path().join("work");
		let target = temp.path().join("replica.git");
		let url = format!("file://{}", source.display());

		sync_replica(&url, &target).await.unwrap();

		std::fs::write(work.join("file.txt"), "updated").unwrap();
		git(&work, &["add", "."]);
		git(&work, &["commit", "-m", "update"]);
		git(&work, &["push"]);

		assert_eq!(sync_replica(&url, &target).await.unwrap(), SyncOutcome::Updated);
	}

	#[tokio::test]
	async fn test_sync_missing_source_fails() {
		let temp = tempfile::tempdir().unwrap();
		let target = temp.path().join("replica.git");
		let url = format!("file://{}/does-not-exist.git", temp.path().display());

		let err = sync_replica(&url, &target).await.unwrap_err();
		assert!(matches!(err, ReplicationError::Git(_)));
	}

	#[tokio::test]
	async fn test_rebuild_replaces_replica() {
		let temp = tempfile::tempdir().unwrap();
		let source = seed_source(temp.path());
		let target = temp.path().join("replica.git");
		let url = format!("file://{}", source.display());

		sync_replica(&url, &target).await.unwrap();
		// Corrupt the replica; a plain fetch cannot recover this.
		std::fs::remove_dir_all(target.join("objects")).unwrap();

		rebuild_replica(&url, &target).await.unwrap();
		let repo = gix::open(&target).unwrap();
		assert!(repo.is_bare());
	}
}
