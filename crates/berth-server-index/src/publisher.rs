// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::types::FileFailure;

/// Fire-and-forget sink for per-file indexing failures. Delivery guarantees
/// are the event bus's problem, not the indexer's.
#[async_trait]
pub trait FailurePublisher: Send + Sync {
	async fn publish_file_failure(&self, repo_id: Uuid, commit_hash: &str, failure: &FileFailure);
}

/// Default publisher: structured warning logs only.
pub struct LogPublisher;

#[async_trait]
impl FailurePublisher for LogPublisher {
	async fn publish_file_failure(&self, repo_id: Uuid, commit_hash: &str, failure: &FileFailure) {
		warn!(
			repo_id = %repo_id,
			commit = %commit_hash,
			path = %failure.path,
			content_hash = %failure.content_hash,
			reason = %failure.reason,
			"file indexing failure"
		);
	}
}

/// Resolves commit author emails to platform user ids. A miss is not an
/// error; the commit is recorded with the sentinel author id.
#[async_trait]
pub trait UserDirectory: Send + Sync {
	async fn resolve_author(&self, email: &str) -> Option<Uuid>;
}

/// Fixed email→user mapping, used in tests and single-tenant setups.
#[derive(Default)]
pub struct StaticUserDirectory {
	users: HashMap<String, Uuid>,
}

impl StaticUserDirectory {
	pub fn new(users: HashMap<String, Uuid>) -> Self {
		Self { users }
	}

	pub fn empty() -> Self {
		Self::default()
	}
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
	async fn resolve_author(&self, email: &str) -> Option<Uuid> {
		self.users.get(email).copied()
	}
}
