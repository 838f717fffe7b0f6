// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::error::{IndexError, Result};

/// Canonical storage key for a content hash.
pub fn storage_key(content_hash: &str) -> String {
	format!("blobs/{content_hash}")
}

#[derive(Debug, Clone)]
pub struct PresignedDownload {
	pub url: String,
	pub expires_at: DateTime<Utc>,
}

/// Content-addressable blob storage. Keys follow `blobs/<content-hash>`;
/// a hash that already exists is never written again.
#[async_trait]
pub trait BlobStore: Send + Sync {
	async fn exists(&self, content_hash: &str) -> Result<bool>;
	async fn put_bytes(&self, content_hash: &str, content: &[u8]) -> Result<String>;
	async fn put_stream(
		&self,
		content_hash: &str,
		content: Box<dyn AsyncRead + Send + Unpin>,
		size: u64,
	) -> Result<String>;
	async fn read_to_string(&self, content_hash: &str) -> Result<Option<String>>;
	async fn presign_download(
		&self,
		content_hash: &str,
		filename: &str,
		mime_type: &str,
		ttl: Duration,
	) -> Result<PresignedDownload>;
}

/// Filesystem-backed blob store for single-node deployments and tests.
/// Download URLs are plain `file://` handles; the expiry is advisory.
pub struct FsBlobStore {
	root: PathBuf,
}

impl FsBlobStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	fn blob_path(&self, content_hash: &str) -> PathBuf {
		self.root.join("blobs").join(content_hash)
	}
}

#[async_trait]
impl BlobStore for FsBlobStore {
	async fn exists(&self, content_hash: &str) -> Result<bool> {
		Ok(tokio::fs::try_exists(self.blob_path(content_hash)).await?)
	}

	#[tracing::instrument(skip(self, content), fields(content_hash = %content_hash, size = content.len()))]
	async fn put_bytes(&self, content_hash: &str, content: &[u8]) -> Result<String> {
		let path = self.blob_path(content_hash);
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		tokio::fs::write(&path, content).await?;
		Ok(storage_key(content_hash))
	}

	#[tracing::instrument(skip(self, content), fields(content_hash = %content_hash, size = size))]
	async fn put_stream(
		&self,
		content_hash: &str,
		mut content: Box<dyn AsyncRead + Send + Unpin>,
		size: u64,
	) -> Result<String> {
		let path = self.blob_path(content_hash);
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		let mut file = tokio::fs::File::create(&path).await?;
		let written = tokio::io::copy(&mut content, &mut file).await?;
		file.flush().await?;
		if written != size {
			return Err(IndexError::BlobStore(format!(
				"short write for {content_hash}: expected {size} bytes, wrote {written}"
			)));
		}
		Ok(storage_key(content_hash))
	}

	async fn read_to_string(&self, content_hash: &str) -> Result<Option<String>> {
		match tokio::fs::read_to_string(self.blob_path(content_hash)).await {
			Ok(content) => Ok(Some(content)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(IndexError::Io(e)),
		}
	}

	async fn presign_download(
		&self,
		content_hash: &str,
		_filename: &str,
		_mime_type: &str,
		ttl: Duration,
	) -> Result<PresignedDownload> {
		if !self.exists(content_hash).await? {
			return Err(IndexError::BlobStore(format!(
				"blob {content_hash} not in store"
			)));
		}
		Ok(PresignedDownload {
			url: format!("file://{}", self.blob_path(content_hash).display()),
			expires_at: Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[tokio::test]
	async fn test_put_and_read_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let store = FsBlobStore::new(dir.path());

		assert!(!store.exists("abc123").await.unwrap());
		let key = store.put_bytes("abc123", b"hello world").await.unwrap();
		assert_eq!(key, "blobs/abc123");
		assert!(store.exists("abc123").await.unwrap());
		assert_eq!(
			store.read_to_string("abc123").await.unwrap(),
			Some("hello world".to_string())
		);
	}

	#[tokio::test]
	async fn test_read_missing_blob_is_none() {
		let dir = tempfile::tempdir().unwrap();
		let store = FsBlobStore::new(dir.path());
		assert_eq!(store.read_to_string("missing").await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_put_stream_checks_length() {
		let dir = tempfile::tempdir().unwrap();
		let store = FsBlobStore::new(dir.path());

		let content = b"streamed content".to_vec();
		let size = content.len() as u64;
		store
			.put_stream("s1", Box::new(Cursor::new(content.clone())), size)
			.await
			.unwrap();

		let err = store
			.put_stream("s2", Box::new(Cursor::new(content)), size + 1)
			.await
			.unwrap_err();
		assert!(matches!(err, IndexError::BlobStore(_)));
	}

	#[tokio::test]
	async fn test_presign_requires_existing_blob() {
		let dir = tempfile::tempdir().unwrap();
		let store = FsBlobStore::new(dir.path());

		assert!(store
			.presign_download("nope", "f.txt", "text/plain", Duration::from_secs(60))
			.await
			.is_err());

		store.put_bytes("yes", b"data").await.unwrap();
		let presigned = store
			.presign_download("yes", "f.txt", "text/plain", Duration::from_secs(60))
			.await
			.unwrap();
		assert!(presigned.url.starts_with("file://"));
		assert!(presigned.expires_at > Utc::now());
	}
}
