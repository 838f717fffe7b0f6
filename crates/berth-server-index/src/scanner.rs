// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use berth_server_db::{IndexStore, TreeEntryRecord};

use crate::error::Result;
use crate::graph::{path_depth, CommitInfo, EntryInfo, GraphReader, TreeChange};
use crate::processor::BlobProcessor;
use crate::publisher::FailurePublisher;
use crate::types::{FileFailure, ScanReport};

type FileResult = std::result::Result<(), FileFailure>;

/// Enumerates the paths to index for one commit and fans file work out onto
/// the shared permit pool. Waits for all dispatched work before returning, so
/// a commit is fully scanned (or has its failures counted) before sealing.
pub struct Scanner {
	graph: Arc<dyn GraphReader>,
	processor: Arc<BlobProcessor>,
	index: Arc<dyn IndexStore>,
	publisher: Arc<dyn FailurePublisher>,
	permits: Arc<Semaphore>,
}

impl Scanner {
	pub fn new(
		graph: Arc<dyn GraphReader>,
		processor: Arc<BlobProcessor>,
		index: Arc<dyn IndexStore>,
		publisher: Arc<dyn FailurePublisher>,
		permits: Arc<Semaphore>,
	) -> Self {
		Self {
			graph,
			processor,
			index,
			publisher,
			permits,
		}
	}

	/// Recursive walk of the commit's whole tree. Used for parentless commits
	/// and as the root-anchored snapshot for read-path queries.
	#[tracing::instrument(skip(self, commit), fields(repo_id = %repo_id, commit = %commit.hash))]
	pub async fn full_scan(&self, repo_id: Uuid, commit: &CommitInfo) -> Result<ScanReport> {
		let entries = self.graph.list_tree(&commit.tree_hash).await?;
		let mut report = ScanReport::default();
		let mut handles = Vec::new();

		for entry in entries {
			if entry.kind.needs_blob() {
				handles.push(self.dispatch(repo_id, commit, entry));
			} else {
				self
					.index
					.upsert_tree_entry(&metadata_row(repo_id, &commit.hash, commit.committed_at, &entry))
					.await?;
				report.entries_written += 1;
			}
		}

		self.barrier(repo_id, &commit.hash, handles, &mut report).await;
		Ok(report)
	}

	/// Two-tree diff against the parent, rename detection on. Deleted paths
	/// are skipped: the tree model is snapshot-oriented and tombstones are
	/// not projected.
	#[tracing::instrument(skip(self, commit), fields(repo_id = %repo_id, commit = %commit.hash))]
	pub async fn diff_scan(
		&self,
		repo_id: Uuid,
		commit: &CommitInfo,
		parent_tree: &str,
	) -> Result<ScanReport> {
		let changes = self.graph.diff_trees(parent_tree, &commit.tree_hash).await?;
		let mut report = ScanReport::default();
		let mut handles = Vec::new();

		for change in changes {
			let entry = match change {
				TreeChange::Deleted { .. } => {
					report.skipped_deletes += 1;
					continue;
				}
				TreeChange::Added(entry) | TreeChange::Modified(entry) => entry,
				TreeChange::Renamed { entry, .. } => entry,
			};

			if entry.kind.needs_blob() {
				handles.push(self.dispatch(repo_id, commit, entry));
			} else {
				self
					.index
					.upsert_tree_entry(&metadata_row(repo_id, &commit.hash, commit.committed_at, &entry))
					.await?;
				report.entries_written += 1;
			}
		}

		self.barrier(repo_id, &commit.hash, handles, &mut report).await;
		Ok(report)
	}

	fn dispatch(
		&self,
		repo_id: Uuid,
		commit: &CommitInfo,
		entry: EntryInfo,
	) -> (String, String, JoinHandle<FileResult>) {
		let processor = Arc::clone(&self.processor);
		let permits = Arc::clone(&self.permits);
		let commit_hash = commit.hash.clone();
		let committed_at = commit.committed_at;
		let path = entry.path.clone();
		let content_hash = entry.content_hash.clone();

		// Tasks run off the caller's logical thread, so the log context is
		// rebound into a fresh span rather than inherited.
		let span = tracing::info_span!(
			"index_file",
			repo_id = %repo_id,
			commit = %commit_hash,
			path = %entry.path
		);
		let handle = tokio::spawn(
			async move {
				let _permit = match permits.acquire_owned().await {
					Ok(permit) => permit,
					Err(_) => {
						return Err(FileFailure {
							path: entry.path.clone(),
							content_hash: entry.content_hash.clone(),
							reason: "scanner permit pool closed".to_string(),
						})
					}
				};
				processor
					.process(repo_id, &commit_hash, committed_at, &entry)
					.await
					.map_err(|e| FileFailure {
						path: entry.path.clone(),
						content_hash: entry.content_hash.clone(),
						reason: e.to_string(),
					})
			}
			.instrument(span),
		);
		(path, content_hash, handle)
	}

	/// Wait for every dispatched file before returning; collect failures
	/// without letting any of them abort sibling work.
	async fn barrier(
		&self,
		repo_id: Uuid,
		commit_hash: &str,
		handles: Vec<(String, String, JoinHandle<FileResult>)>,
		report: &mut ScanReport,
	) {
		for (path, content_hash, handle) in handles {
			let failure = match handle.await {
				Ok(Ok(())) => {
					report.files_processed += 1;
					report.entries_written += 1;
					continue;
				}
				Ok(Err(failure)) => failure,
				Err(join_err) => FileFailure {
					path,
					content_hash,
					reason: format!("worker panicked: {join_err}"),
				},
			};
			self
				.publisher
				.publish_file_failure(repo_id, commit_hash, &failure)
				.await;
			report.failures.push(failure);
		}
	}
}

fn metadata_row(
	repo_id: Uuid,
	commit_hash: &str,
	committed_at: DateTime<Utc>,
	entry: &EntryInfo,
) -> TreeEntryRecord {
	TreeEntryRecord {
		repo_id,
		commit_hash: commit_hash.to_string(),
		path: entry.path.clone(),
		name: entry.name.clone(),
		is_dir: entry.kind.is_dir(),
		content_hash: entry.content_hash.clone(),
		size: entry.size as i64,
		depth: path_depth(&entry.path),
		modified_at: committed_at,
	}
}
