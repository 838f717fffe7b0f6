// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use berth_server_db::{RepoReplicaRecord, ReplicaHealth};

/// Which lag dimension a read routing decision is budgeted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagMetric {
	Commits,
	Time,
}

fn lag(replica: &RepoReplicaRecord, metric: LagMetric) -> i64 {
	match metric {
		LagMetric::Commits => replica.lag_commits,
		LagMetric::Time => replica.lag_ms,
	}
}

/// Pick the replica to serve a read from: healthy, within the lag budget,
/// minimum lag, first-in-input-order on ties. `None` means no replica
/// qualifies and the caller must fall back to the primary.
pub fn route_read(
	replicas: &[RepoReplicaRecord],
	metric: LagMetric,
	threshold: i64,
) -> Option<&RepoReplicaRecord> {
	let mut best: Option<&RepoReplicaRecord> = None;
	for replica in replicas {
		if replica.health != ReplicaHealth::Healthy {
			continue;
		}
		let value = lag(replica, metric);
		if value > threshold {
			continue;
		}
		match best {
			Some(current) if lag(current, metric) <= value => {}
			_ => best = Some(replica),
		}
	}
	best
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;
	use proptest::prelude::*;
	use uuid::Uuid;

	fn replica(node_id: &str, health: ReplicaHealth, lag_ms: i64, lag_commits: i64) -> RepoReplicaRecord {
		RepoReplicaRecord {
			repo_id: Uuid::nil(),
			node_id: node_id.to_string(),
			health,
			lag_ms,
			lag_commits,
			updated_at: Utc::now(),
		}
	}

	#[test]
	fn test_route_picks_minimum_lag() {
		let replicas = vec![
			replica("a", ReplicaHealth::Healthy, 500, 5),
			replica("b", ReplicaHealth::Healthy, 100, 1),
			replica("c", ReplicaHealth::Healthy, 300, 3),
		];
		let chosen = route_read(&replicas, LagMetric::Commits, 10).unwrap();
		assert_eq!(chosen.node_id, "b");
		let chosen = route_read(&replicas, LagMetric::Time, 1000).unwrap();
		assert_eq!(chosen.node_id, "b");
	}

	#[test]
	fn test_route_excludes_unhealthy_and_over_budget() {
		let replicas = vec![
			replica("degraded", ReplicaHealth::Degraded, 0, 0),
			replica("unknown", ReplicaHealth::Unknown, 0, 0),
			replica("behind", ReplicaHealth::Healthy, 10_000, 100),
		];
		assert!(route_read(&replicas, LagMetric::Commits, 10).is_none());
		assert!(route_read(&replicas, LagMetric::Time, 500).is_none());
	}

	#[test]
	fn test_route_tie_keeps_first() {
		let replicas = vec![
			replica("first", ReplicaHealth::Healthy, 100, 2),
			replica("second", ReplicaHealth::Healthy, 100, 2),
		];
		let chosen = route_read(&replicas, LagMetric::Time, 100).unwrap();
		assert_eq!(chosen.node_id, "first");
	}

	#[test]
	fn test_route_empty_is_none() {
		assert!(route_read(&[], LagMetric::Commits, i64::MAX).is_none());
	}

	fn arb_health() -> impl Strategy<Value = ReplicaHealth> {
		prop_oneof![
			Just(ReplicaHealth::Healthy),
			Just(ReplicaHealth::Degraded),
			Just(ReplicaHealth::Unknown),
		]
	}

	fn arb_replicas() -> impl Strategy<Value = Vec<RepoReplicaRecord>> {
		prop::collection::vec((arb_health(), 0i64..100_000, 0i64..1_000), 0..8).prop_map(|raw| {
			raw
				.into_iter()
				.enumerate()
				.map(|(i, (health, lag_ms, lag_commits))| {
					replica(&format!("node-{i}"), health, lag_ms, lag_commits)
				})
				.collect()
		})
	}

	proptest! {
		#[test]
		fn prop_choice_is_healthy_within_budget(replicas in arb_replicas(), threshold in 0i64..50_000) {
			if let Some(chosen) = route_read(&replicas, LagMetric::Time, threshold) {
				prop_assert_eq!(chosen.health, ReplicaHealth::Healthy);
				prop_assert!(chosen.lag_ms <= threshold);
			}
		}

		#[test]
		fn prop_choice_minimizes_lag(replicas in arb_replicas(), threshold in 0i64..50_000) {
			if let Some(chosen) = route_read(&replicas, LagMetric::Time, threshold) {
				for other in &replicas {
					if other.health == ReplicaHealth::Healthy && other.lag_ms <= threshold {
						prop_assert!(chosen.lag_ms <= other.lag_ms);
					}
				}
			}
		}

		#[test]
		fn prop_none_means_no_qualifier(replicas in arb_replicas(), threshold in 0i64..50_000) {
			if route_read(&replicas, LagMetric::Commits, threshold).is_none() {
				for replica in &replicas {
					let qualifies =
						replica.health == ReplicaHealth::Healthy && replica.lag_commits <= threshold;
					prop_assert!(!qualifies);
				}
			}
		}
	}
}
