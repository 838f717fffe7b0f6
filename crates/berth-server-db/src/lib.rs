// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite-backed metadata index store for Berth.
//!
//! Holds the queryable projection of every repository (commits, tree entries,
//! blobs, branch pointers) and the control-plane state for placement and
//! replication (nodes, locations, replicas, the task queue and its DLQ).

pub mod error;
pub mod index;
pub mod pool;
pub mod replication;
pub mod schema;
pub mod testing;
pub mod topology;
pub mod types;

pub use error::{DbError, Result};
pub use index::{IndexStore, SqliteIndexStore};
pub use pool::create_pool;
pub use replication::{ReplicationStore, SqliteReplicationStore};
pub use schema::init_schema;
pub use topology::{SqliteTopologyStore, TopologyStore};
pub use types::{
	BlobRecord, BranchPointerRecord, CommitRecord, GitNodeRecord, RepoLocationRecord,
	RepoReplicaRecord, ReplicaHealth, ReplicationDlqRecord, ReplicationStatus,
	ReplicationTaskRecord, TreeEntryRecord, UNRESOLVED_AUTHOR,
};
