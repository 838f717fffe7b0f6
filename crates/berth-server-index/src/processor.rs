// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use berth_server_db::{BlobRecord, IndexStore, TreeEntryRecord};

use crate::blobstore::{storage_key, BlobStore};
use crate::classify::{classify, extension};
use crate::error::Result;
use crate::graph::{path_depth, EntryInfo, GraphReader};
use crate::types::IndexerConfig;

/// Content-addressed ingestion of one file: classify, upload once per hash,
/// then write the blob row and tree-entry row together.
pub struct BlobProcessor {
	graph: Arc<dyn GraphReader>,
	store: Arc<dyn BlobStore>,
	index: Arc<dyn IndexStore>,
	config: IndexerConfig,
}

fn backoff_delay(config: &IndexerConfig, attempt: u32) -> Duration {
	// 200ms, 400ms, 800ms... for the default config.
	Duration::from_millis(config.upload_backoff_base_ms << (attempt - 1))
}

impl BlobProcessor {
	pub fn new(
		graph: Arc<dyn GraphReader>,
		store: Arc<dyn BlobStore>,
		index: Arc<dyn IndexStore>,
		config: IndexerConfig,
	) -> Self {
		Self {
			graph,
			store,
			index,
			config,
		}
	}

	pub async fn process(
		&self,
		repo_id: Uuid,
		commit_hash: &str,
		committed_at: DateTime<Utc>,
		entry: &EntryInfo,
	) -> Result<()> {
		let hash = &entry.content_hash;
		let already_stored = self.store.exists(hash).await?;

		let (classification, key) = if entry.size <= self.config.small_object_threshold {
			let content = Bytes::from(self.graph.blob_bytes(hash).await?);
			let classification = classify(&entry.path, &content, true);
			let key = if already_stored {
				storage_key(hash)
			} else {
				self.upload_bytes_with_retry(hash, &content).await?
			};
			(classification, key)
		} else {
			// Too large to materialize for classification; sample a prefix.
			let sample = self.graph.blob_prefix(hash, self.config.sample_bytes).await?;
			let classification = classify(&entry.path, &sample, false);
			let key = if already_stored {
				storage_key(hash)
			} else {
				self.upload_stream_with_retry(hash, entry.size).await?
			};
			(classification, key)
		};

		if already_stored {
			debug!(content_hash = %hash, "blob already stored, skipping upload");
		}

		let blob = BlobRecord {
			content_hash: hash.clone(),
			size: entry.size as i64,
			mime_type: classification.mime_type,
			is_binary: classification.is_binary,
			line_count: classification.line_count,
			storage_key: key,
			extension: extension(&entry.path),
		};
		let record = TreeEntryRecord {
			repo_id,
			commit_hash: commit_hash.to_string(),
			path: entry.path.clone(),
			name: entry.name.clone(),
			is_dir: false,
			content_hash: hash.clone(),
			size: entry.size as i64,
			depth: path_depth(&entry.path),
			modified_at: committed_at,
		};

		self.index.upsert_blob_and_entry(&blob, &record).await?;
		Ok(())
	}

	async fn upload_bytes_with_retry(&self, hash: &str, content: &Bytes) -> Result<String> {
		let mut attempt = 1u32;
		loop {
			match self.store.put_bytes(hash, content).await {
				Ok(key) => return Ok(key),
				Err(e) if attempt < self.config.upload_attempts => {
					let delay = backoff_delay(&self.config, attempt);
					warn!(
						content_hash = %hash,
						attempt,
						delay_ms = delay.as_millis() as u64,
						error = %e,
						"blob upload failed, retrying"
					);
					tokio::time::sleep(delay).await;
					attempt += 1;
				}
				Err(e) => return Err(e),
			}
		}
	}

	async fn upload_stream_with_retry(&self, hash: &str, size: u64) -> Result<String> {
		let mut attempt = 1u32;
		loop {
			// The attempt consumes the reader; a retry opens a fresh one.
			let reader = self.graph.blob_reader(hash).await?;
			match self.store.put_stream(hash, reader, size).await {
				Ok(key) => return Ok(key),
				Err(e) if attempt < self.config.upload_attempts => {
					let delay = backoff_delay(&self.config, attempt);
					warn!(
						content_hash = %hash,
						attempt,
						delay_ms = delay.as_millis() as u64,
						error = %e,
						"blob stream upload failed, retrying"
					);
					tokio::time::sleep(delay).await;
					attempt += 1;
				}
				Err(e) => return Err(e),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_backoff_doubles_from_base() {
		let config = IndexerConfig::default();
		assert_eq!(backoff_delay(&config, 1), Duration::from_millis(200));
		assert_eq!(backoff_delay(&config, 2), Duration::from_millis(400));
		assert_eq!(backoff_delay(&config, 3), Duration::from_millis(800));
	}
}
