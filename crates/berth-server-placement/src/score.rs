// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

use berth_server_db::GitNodeRecord;

/// Weights for the load score. Disk pressure dominates with the defaults;
/// IOPS is a tiebreaker-scale signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
	pub repo_count: f64,
	pub disk_usage: f64,
	pub iops: f64,
}

impl Default for ScoreWeights {
	fn default() -> Self {
		Self {
			repo_count: 1.0,
			disk_usage: 2.0,
			iops: 0.5,
		}
	}
}

/// Weighted load score; lower is a better placement target.
pub fn load_score(node: &GitNodeRecord, weights: &ScoreWeights) -> f64 {
	weights.repo_count * node.repo_count as f64
		+ weights.disk_usage * node.disk_usage_pct
		+ weights.iops * node.iops
}

/// Node with the minimum load score. Ties keep the first node in input
/// order, so repeated calls over the same list are deterministic.
pub fn min_by_score<'a>(
	nodes: &'a [GitNodeRecord],
	weights: &ScoreWeights,
) -> Option<&'a GitNodeRecord> {
	let mut best: Option<(&GitNodeRecord, f64)> = None;
	for node in nodes {
		let score = load_score(node, weights);
		match best {
			Some((_, best_score)) if score >= best_score => {}
			_ => best = Some((node, score)),
		}
	}
	best.map(|(node, _)| node)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn node(id: &str, repo_count: i64, disk_usage_pct: f64, iops: f64) -> GitNodeRecord {
		GitNodeRecord {
			node_id: id.to_string(),
			host: format!("{id}.internal"),
			zone: "z1".to_string(),
			region: "r1".to_string(),
			healthy: true,
			repo_count,
			disk_usage_pct,
			iops,
		}
	}

	#[test]
	fn test_default_weights() {
		let weights = ScoreWeights::default();
		let score = load_score(&node("a", 10, 50.0, 100.0), &weights);
		assert_eq!(score, 10.0 + 100.0 + 50.0);
	}

	#[test]
	fn test_min_by_score_prefers_lowest() {
		let nodes = vec![
			node("busy", 100, 90.0, 500.0),
			node("idle", 2, 10.0, 5.0),
			node("mid", 50, 40.0, 50.0),
		];
		let best = min_by_score(&nodes, &ScoreWeights::default()).unwrap();
		assert_eq!(best.node_id, "idle");
	}

	#[test]
	fn test_min_by_score_tie_keeps_first() {
		let nodes = vec![node("first", 1, 1.0, 1.0), node("second", 1, 1.0, 1.0)];
		let best = min_by_score(&nodes, &ScoreWeights::default()).unwrap();
		assert_eq!(best.node_id, "first");
	}

	#[test]
	fn test_min_by_score_empty() {
		assert!(min_by_score(&[], &ScoreWeights::default()).is_none());
	}
}
