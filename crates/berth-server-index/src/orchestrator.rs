// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, info};
use uuid::Uuid;

use berth_server_db::{CommitRecord, IndexStore, UNRESOLVED_AUTHOR};

use crate::blobstore::BlobStore;
use crate::error::Result;
use crate::finalizer::Finalizer;
use crate::graph::{CommitInfo, Git2GraphReader, GraphReader};
use crate::processor::BlobProcessor;
use crate::publisher::{FailurePublisher, UserDirectory};
use crate::scanner::Scanner;
use crate::types::{CommitResult, FinalizeOutcome, IndexRunReport, IndexerConfig, PushEvent};

/// Drives indexing for one repository push: decides which commits need work,
/// picks full vs diff scans, and seals each commit through the finalizer.
pub struct Indexer {
	index: Arc<dyn IndexStore>,
	store: Arc<dyn BlobStore>,
	users: Arc<dyn UserDirectory>,
	publisher: Arc<dyn FailurePublisher>,
	config: IndexerConfig,
	permits: Arc<Semaphore>,
}

impl Indexer {
	pub fn new(
		index: Arc<dyn IndexStore>,
		store: Arc<dyn BlobStore>,
		users: Arc<dyn UserDirectory>,
		publisher: Arc<dyn FailurePublisher>,
		config: IndexerConfig,
	) -> Self {
		let permits = Arc::new(Semaphore::new(config.max_concurrent_files));
		Self {
			index,
			store,
			users,
			publisher,
			config,
			permits,
		}
	}

	/// Index everything a push made reachable on its branch.
	pub async fn handle_push(&self, event: &PushEvent) -> Result<IndexRunReport> {
		let graph: Arc<dyn GraphReader> = Arc::new(Git2GraphReader::new(&event.repo_path));
		self.handle_push_with(graph, event).await
	}

	/// Re-derive a push event from the repository's current head and index it.
	/// Used by reconciliation sweeps when the original notification was lost.
	pub async fn index_head(
		&self,
		repo_id: Uuid,
		repo_path: &Path,
		branch: &str,
	) -> Result<IndexRunReport> {
		let graph: Arc<dyn GraphReader> = Arc::new(Git2GraphReader::new(repo_path));
		let new_ref = graph.resolve_ref(&format!("refs/heads/{branch}")).await?;
		let old_ref = self.index.get_branch_head(repo_id, branch).await?;
		if old_ref.as_deref() == Some(new_ref.as_str()) {
			debug!(repo_id = %repo_id, branch, "index already at head");
			return Ok(IndexRunReport::default());
		}
		let event = PushEvent {
			repo_id,
			repo_path: repo_path.to_path_buf(),
			branch: branch.to_string(),
			old_ref,
			new_ref,
		};
		self.handle_push_with(graph, &event).await
	}

	#[tracing::instrument(skip(self, graph, event), fields(repo_id = %event.repo_id, branch = %event.branch, new_ref = %event.new_ref))]
	pub async fn handle_push_with(
		&self,
		graph: Arc<dyn GraphReader>,
		event: &PushEvent,
	) -> Result<IndexRunReport> {
		if event.is_branch_creation() {
			self.index_branch_creation(graph, event).await
		} else {
			// Branch advance: everything in (old, new] is new to this branch.
			let old = event.old_ref.as_deref().unwrap_or_default();
			let pending = graph.walk_range(old, &event.new_ref).await?;
			self.process_commits(graph, event, pending).await
		}
	}

	/// New branches may point at history that is already indexed (branched off
	/// an existing head). That case is pointer-only; otherwise walk only the
	/// history no existing branch pointer already covers. Indexed commits a
	/// pointer never reached (withheld, lost races) can still come back from
	/// the walk; [`Self::process_commits`] skips them individually.
	async fn index_branch_creation(
		&self,
		graph: Arc<dyn GraphReader>,
		event: &PushEvent,
	) -> Result<IndexRunReport> {
		if self.index.commit_exists(event.repo_id, &event.new_ref).await? {
			info!("branch created on indexed commit, writing pointer only");
			let expected = self
				.index
				.get_branch_head(event.repo_id, &event.branch)
				.await?;
			let won = self
				.index
				.compare_and_swap_branch(
					event.repo_id,
					&event.branch,
					&event.new_ref,
					expected.as_deref(),
				)
				.await?;
			let outcome = if won {
				FinalizeOutcome::Advanced
			} else {
				FinalizeOutcome::LostRace
			};
			return Ok(IndexRunReport {
				commits: vec![CommitResult {
					hash: event.new_ref.clone(),
					outcome,
				}],
				scans_run: 0,
			});
		}

		let known = self.index.list_branch_heads(event.repo_id).await?;
		let pending = graph.walk_since(&event.new_ref, &known).await?;
		self.process_commits(graph, event, pending).await
	}

	/// Index `pending` oldest first. The pointer is advanced per commit with a
	/// compare-and-swap against the last value this run installed; once any
	/// commit is withheld or loses the race, later commits are still indexed
	/// but no further advances are attempted.
	async fn process_commits(
		&self,
		graph: Arc<dyn GraphReader>,
		event: &PushEvent,
		pending: Vec<String>,
	) -> Result<IndexRunReport> {
		let processor = Arc::new(BlobProcessor::new(
			Arc::clone(&graph),
			Arc::clone(&self.store),
			Arc::clone(&self.index),
			self.config.clone(),
		));
		let scanner = Scanner::new(
			Arc::clone(&graph),
			processor,
			Arc::clone(&self.index),
			Arc::clone(&self.publisher),
			Arc::clone(&self.permits),
		);
		let finalizer = Finalizer::new(Arc::clone(&self.index));

		let mut report = IndexRunReport::default();
		let mut expected = self
			.index
			.get_branch_head(event.repo_id, &event.branch)
			.await?;
		let mut advance = true;

		for hash in pending {
			if self.index.commit_exists(event.repo_id, &hash).await? {
				debug!(commit = %hash, "commit already indexed, skipping");
				continue;
			}

			let info = graph.commit_info(&hash).await?;
			let scan = match info.parents.first() {
				Some(parent) => {
					let parent_tree = graph.commit_info(parent).await?.tree_hash;
					scanner.diff_scan(event.repo_id, &info, &parent_tree).await?
				}
				None => scanner.full_scan(event.repo_id, &info).await?,
			};
			report.scans_run += 1;
			debug!(
				commit = %hash,
				files = scan.files_processed,
				entries = scan.entries_written,
				skipped_deletes = scan.skipped_deletes,
				failed = scan.failures.len(),
				"commit scan complete"
			);

			let record = self.commit_record(event, &info).await;
			let outcome = finalizer
				.finalize(&record, expected.as_deref(), scan.failures, advance)
				.await?;
			if outcome.advanced() {
				expected = Some(hash.clone());
			} else {
				advance = false;
			}
			report.commits.push(CommitResult { hash, outcome });
		}

		info!(
			commits = report.commits.len(),
			scans = report.scans_run,
			head = report.head().unwrap_or("-"),
			"index run complete"
		);
		Ok(report)
	}

	async fn commit_record(&self, event: &PushEvent, info: &CommitInfo) -> CommitRecord {
		let author_user_id = self
			.users
			.resolve_author(&info.author_email)
			.await
			.unwrap_or(UNRESOLVED_AUTHOR);
		CommitRecord {
			repo_id: event.repo_id,
			hash: info.hash.clone(),
			parent_hashes: info.parents.clone(),
			tree_hash: info.tree_hash.clone(),
			author_name: info.author_name.clone(),
			author_email: info.author_email.clone(),
			author_user_id,
			authored_at: info.authored_at,
			committed_at: info.committed_at,
			message: info.message.clone(),
			branch: event.branch.clone(),
			indexed_at: Utc::now(),
		}
	}
}
