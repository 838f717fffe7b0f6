// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use berth_server_db::{
	DbError, GitNodeRecord, RepoLocationRecord, ReplicationStore, ReplicationTaskRecord,
	TopologyStore,
};

use crate::error::{PlacementError, Result};
use crate::score::{load_score, min_by_score, ScoreWeights};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
	/// Replicas to select when no explicit list is configured.
	pub replica_count: usize,
	/// Explicit replica node ids; overrides affinity-ranked selection.
	pub replica_nodes: Vec<String>,
	pub prefer_same_zone: bool,
	pub prefer_same_region: bool,
	/// Node registered and used as primary when no healthy node exists.
	/// Keeps single-node deployments making progress.
	pub local_node: Option<GitNodeRecord>,
	pub weights: ScoreWeights,
}

impl Default for PlacementConfig {
	fn default() -> Self {
		Self {
			replica_count: 2,
			replica_nodes: Vec::new(),
			prefer_same_zone: true,
			prefer_same_region: true,
			local_node: None,
			weights: ScoreWeights::default(),
		}
	}
}

#[derive(Debug)]
pub struct PlacementOutcome {
	pub primary_node_id: String,
	pub replica_node_ids: Vec<String>,
	pub tasks_enqueued: usize,
	pub already_placed: bool,
}

/// Assigns a primary node and replica set to new repositories and seeds the
/// replication queue with one task per replica.
pub struct PlacementService {
	topology: Arc<dyn TopologyStore>,
	replication: Arc<dyn ReplicationStore>,
	config: PlacementConfig,
}

impl PlacementService {
	pub fn new(
		topology: Arc<dyn TopologyStore>,
		replication: Arc<dyn ReplicationStore>,
		config: PlacementConfig,
	) -> Self {
		Self {
			topology,
			replication,
			config,
		}
	}

	#[tracing::instrument(skip(self), fields(repo_id = %repo_id))]
	pub async fn assign_repository(&self, repo_id: Uuid) -> Result<PlacementOutcome> {
		if let Some(existing) = self.topology.get_location(repo_id).await? {
			return Ok(PlacementOutcome {
				primary_node_id: existing.primary_node_id,
				replica_node_ids: Vec::new(),
				tasks_enqueued: 0,
				already_placed: true,
			});
		}

		let healthy = self.topology.list_healthy_nodes().await?;
		let primary = match min_by_score(&healthy, &self.config.weights) {
			Some(node) => node.clone(),
			None => self.register_local_node().await?,
		};

		match self
			.topology
			.create_location(&RepoLocationRecord {
				repo_id,
				primary_node_id: primary.node_id.clone(),
			})
			.await
		{
			Ok(()) => {}
			// Lost a concurrent placement race; the winner's assignment stands.
			Err(DbError::Conflict(_)) => {
				let existing = self
					.topology
					.get_location(repo_id)
					.await?
					.ok_or(PlacementError::NoCandidates)?;
				warn!(primary = %existing.primary_node_id, "repository placed concurrently");
				return Ok(PlacementOutcome {
					primary_node_id: existing.primary_node_id,
					replica_node_ids: Vec::new(),
					tasks_enqueued: 0,
					already_placed: true,
				});
			}
			Err(e) => return Err(e.into()),
		}

		let replicas = self.select_replicas(&primary, &healthy);
		let mut tasks_enqueued = 0;
		for target in &replicas {
			self
				.replication
				.enqueue(&ReplicationTaskRecord::new(repo_id, &primary.node_id, target))
				.await?;
			tasks_enqueued += 1;
		}

		info!(
			primary = %primary.node_id,
			replicas = replicas.len(),
			tasks = tasks_enqueued,
			"repository placed"
		);
		Ok(PlacementOutcome {
			primary_node_id: primary.node_id,
			replica_node_ids: replicas,
			tasks_enqueued,
			already_placed: false,
		})
	}

	async fn register_local_node(&self) -> Result<GitNodeRecord> {
		let mut node = self
			.config
			.local_node
			.clone()
			.ok_or(PlacementError::NoCandidates)?;
		node.healthy = true;
		warn!(node_id = %node.node_id, "no healthy node available, registering local node");
		self.topology.upsert_node(&node).await?;
		Ok(node)
	}

	/// Replica candidates ranked same-zone, then same-region, then the rest,
	/// with the load score ordering within each band.
	fn select_replicas(&self, primary: &GitNodeRecord, healthy: &[GitNodeRecord]) -> Vec<String> {
		if !self.config.replica_nodes.is_empty() {
			return self
				.config
				.replica_nodes
				.iter()
				.filter(|id| **id != primary.node_id)
				.cloned()
				.collect();
		}

		let mut candidates: Vec<&GitNodeRecord> = healthy
			.iter()
			.filter(|node| node.node_id != primary.node_id)
			.collect();
		candidates.sort_by(|a, b| {
			let band_a = self.affinity_band(primary, a);
			let band_b = self.affinity_band(primary, b);
			band_a
				.cmp(&band_b)
				.then_with(|| {
					load_score(a, &self.config.weights)
						.partial_cmp(&load_score(b, &self.config.weights))
						.unwrap_or(std::cmp::Ordering::Equal)
				})
		});

		candidates
			.into_iter()
			.take(self.config.replica_count)
			.map(|node| node.node_id.clone())
			.collect()
	}

	fn affinity_band(&self, primary: &GitNodeRecord, candidate: &GitNodeRecord) -> u8 {
		if self.config.prefer_same_zone && candidate.zone == primary.zone {
			0
		} else if self.config.prefer_same_region && candidate.region == primary.region {
			1
		} else {
			2
		}
	}
}
