// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Replication control loop: replica lag measurement and the retrying task
//! queue that copies primary repository state onto replica nodes.

pub mod error;
pub mod executor;
pub mod lag;
pub mod transport;

pub use error::{ReplicationError, Result};
pub use executor::{
	ExecutorConfig, LogNotifier, Notifier, ReplicationExecutor, TaskRunOutcome,
};
pub use lag::{LagReporter, LagReporterConfig, PrimaryHead, ReplicaProbe};
pub use transport::{replica_path, rebuild_replica, source_url, sync_replica, SyncOutcome};
