// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use git2::{ObjectType, Oid, Repository, Sort, TreeWalkMode, TreeWalkResult};
use tokio::io::AsyncRead;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

use crate::error::{IndexError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
	File,
	Dir,
	Symlink,
	Submodule,
}

impl EntryKind {
	pub fn is_dir(&self) -> bool {
		matches!(self, EntryKind::Dir)
	}

	/// Only regular files carry uploadable blob content.
	pub fn needs_blob(&self) -> bool {
		matches!(self, EntryKind::File)
	}
}

#[derive(Debug, Clone)]
pub struct EntryInfo {
	pub path: String,
	pub name: String,
	pub kind: EntryKind,
	pub content_hash: String,
	pub size: u64,
}

#[derive(Debug, Clone)]
pub struct CommitInfo {
	pub hash: String,
	pub parents: Vec<String>,
	pub tree_hash: String,
	pub author_name: String,
	pub author_email: String,
	pub authored_at: DateTime<Utc>,
	pub committed_at: DateTime<Utc>,
	pub message: String,
}

/// Entry-level difference between two trees. Deletions carry only the path;
/// they are recorded by the scanner as skipped, not projected into rows.
#[derive(Debug, Clone)]
pub enum TreeChange {
	Added(EntryInfo),
	Modified(EntryInfo),
	Renamed { from: String, entry: EntryInfo },
	Deleted { path: String },
}

/// Read-only view of a repository's object graph. The core never mutates the
/// underlying repository.
#[async_trait]
pub trait GraphReader: Send + Sync {
	/// Resolve a ref name to a commit hash.
	async fn resolve_ref(&self, refname: &str) -> Result<String>;
	async fn commit_info(&self, hash: &str) -> Result<CommitInfo>;
	/// Commits in the topological range (old, new], oldest first.
	async fn walk_range(&self, old: &str, new: &str) -> Result<Vec<String>>;
	/// Commits reachable from `from` (inclusive) but from none of `known`,
	/// oldest first. Tips in `known` absent from the repository are ignored,
	/// so the walk stops at whatever known history the repository does hold.
	async fn walk_since(&self, from: &str, known: &[String]) -> Result<Vec<String>>;
	/// Every entry under a tree, recursively, directories included.
	async fn list_tree(&self, tree_hash: &str) -> Result<Vec<EntryInfo>>;
	/// Entry-level diff with rename detection enabled.
	async fn diff_trees(&self, old_tree: &str, new_tree: &str) -> Result<Vec<TreeChange>>;
	async fn blob_bytes(&self, hash: &str) -> Result<Vec<u8>>;
	async fn blob_prefix(&self, hash: &str, max_len: usize) -> Result<Vec<u8>>;
	/// Chunked read of a blob's full content, never materialized in one
	/// allocation. Each call opens a fresh read from the object database.
	async fn blob_reader(&self, hash: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// [`GraphReader`] over an on-disk repository via libgit2. Every call opens
/// the repository inside `spawn_blocking`; libgit2 handles are not Sync.
pub struct Git2GraphReader {
	repo_path: PathBuf,
}

impl Git2GraphReader {
	pub fn new(repo_path: impl Into<PathBuf>) -> Self {
		Self {
			repo_path: repo_path.into(),
		}
	}

	async fn with_repo<T, F>(&self, f: F) -> Result<T>
	where
		T: Send + 'static,
		F: FnOnce(&Repository) -> Result<T> + Send + 'static,
	{
		let path = self.repo_path.clone();
		tokio::task::spawn_blocking(move || {
			let repo = Repository::open(&path).map_err(|source| IndexError::RepoOpen {
				path: path.clone(),
				source,
			})?;
			f(&repo)
		})
		.await?
	}
}

fn parse_oid(hash: &str) -> Result<Oid> {
	Oid::from_str(hash).map_err(IndexError::Object)
}

fn timestamp(time: git2::Time) -> DateTime<Utc> {
	DateTime::from_timestamp(time.seconds(), 0).unwrap_or(DateTime::UNIX_EPOCH)
}

fn entry_kind(kind: Option<ObjectType>, filemode: i32) -> EntryKind {
	const LINK_MODE: i32 = 0o120000;
	match kind {
		Some(ObjectType::Tree) => EntryKind::Dir,
		Some(ObjectType::Commit) => EntryKind::Submodule,
		_ if filemode == LINK_MODE => EntryKind::Symlink,
		_ => EntryKind::File,
	}
}

fn object_size(repo: &Repository, oid: Oid) -> u64 {
	// Header read only; does not inflate the object body.
	repo
		.odb()
		.and_then(|odb| odb.read_header(oid))
		.map(|(size, _)| size as u64)
		.unwrap_or(0)
}

fn delta_kind(mode: git2::FileMode) -> EntryKind {
	match mode {
		git2::FileMode::Tree => EntryKind::Dir,
		git2::FileMode::Link => EntryKind::Symlink,
		git2::FileMode::Commit => EntryKind::Submodule,
		_ => EntryKind::File,
	}
}

fn delta_entry(repo: &Repository, file: &git2::DiffFile<'_>) -> Option<EntryInfo> {
	let path = file.path()?.to_string_lossy().into_owned();
	let name = path.rsplit('/').next().unwrap_or(&path).to_string();
	let kind = delta_kind(file.mode());
	let size = if kind.needs_blob() {
		object_size(repo, file.id())
	} else {
		0
	};
	Some(EntryInfo {
		path,
		name,
		kind,
		content_hash: file.id().to_string(),
		size,
	})
}

#[async_trait]
impl GraphReader for Git2GraphReader {
	async fn resolve_ref(&self, refname: &str) -> Result<String> {
		let refname = refname.to_string();
		self
			.with_repo(move |repo| {
				let commit = repo
					.revparse_single(&refname)
					.and_then(|obj| obj.peel_to_commit())
					.map_err(|source| IndexError::RefResolve {
						refname: refname.clone(),
						source,
					})?;
				Ok(commit.id().to_string())
			})
			.await
	}

	async fn commit_info(&self, hash: &str) -> Result<CommitInfo> {
		let hash = hash.to_string();
		self
			.with_repo(move |repo| {
				let oid = parse_oid(&hash)?;
				let commit = repo.find_commit(oid).map_err(|source| IndexError::CommitParse {
					hash: hash.clone(),
					source,
				})?;

				let author = commit.author();
				let committer = commit.committer();
				Ok(CommitInfo {
					hash: commit.id().to_string(),
					parents: commit.parent_ids().map(|id| id.to_string()).collect(),
					tree_hash: commit.tree_id().to_string(),
					author_name: author.name().unwrap_or("").to_string(),
					author_email: author.email().unwrap_or("").to_string(),
					authored_at: timestamp(author.when()),
					committed_at: timestamp(committer.when()),
					message: commit.message().unwrap_or("").to_string(),
				})
			})
			.await
	}

	async fn walk_range(&self, old: &str, new: &str) -> Result<Vec<String>> {
		let old = old.to_string();
		let new = new.to_string();
		self
			.with_repo(move |repo| {
				let mut walk = repo.revwalk()?;
				walk.push(parse_oid(&new)?)?;
				walk.hide(parse_oid(&old)?)?;
				walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
				let mut hashes = Vec::new();
				for oid in walk {
					hashes.push(oid?.to_string());
				}
				Ok(hashes)
			})
			.await
	}

	async fn walk_since(&self, from: &str, known: &[String]) -> Result<Vec<String>> {
		let from = from.to_string();
		let known = known.to_vec();
		self
			.with_repo(move |repo| {
				let mut walk = repo.revwalk()?;
				walk.push(parse_oid(&from)?)?;
				for tip in &known {
					let oid = parse_oid(tip)?;
					if repo.find_commit(oid).is_ok() {
						walk.hide(oid)?;
					}
				}
				walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
				let mut hashes = Vec::new();
				for oid in walk {
					hashes.push(oid?.to_string());
				}
				Ok(hashes)
			})
			.await
	}

	async fn list_tree(&self, tree_hash: &str) -> Result<Vec<EntryInfo>> {
		let tree_hash = tree_hash.to_string();
		self
			.with_repo(move |repo| {
				let tree = repo.find_tree(parse_oid(&tree_hash)?)?;
				let mut entries = Vec::new();
				tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
					let name = entry.name().unwrap_or("").to_string();
					let path = format!("{dir}{name}");
					let kind = entry_kind(entry.kind(), entry.filemode());
					let size = if kind.needs_blob() {
						object_size(repo, entry.id())
					} else {
						0
					};
					entries.push(EntryInfo {
						path,
						name,
						kind,
						content_hash: entry.id().to_string(),
						size,
					});
					TreeWalkResult::Ok
				})?;
				Ok(entries)
			})
			.await
	}

	async fn diff_trees(&self, old_tree: &str, new_tree: &str) -> Result<Vec<TreeChange>> {
		let old_tree = old_tree.to_string();
		let new_tree = new_tree.to_string();
		self
			.with_repo(move |repo| {
				let old = repo.find_tree(parse_oid(&old_tree)?)?;
				let new = repo.find_tree(parse_oid(&new_tree)?)?;

				let mut diff = repo.diff_tree_to_tree(Some(&old), Some(&new), None)?;
				let mut find_opts = git2::DiffFindOptions::new();
				find_opts.renames(true);
				diff.find_similar(Some(&mut find_opts))?;

				let mut changes = Vec::new();
				for delta in diff.deltas() {
					match delta.status() {
						git2::Delta::Added | git2::Delta::Copied => {
							if let Some(entry) = delta_entry(repo, &delta.new_file()) {
								changes.push(TreeChange::Added(entry));
							}
						}
						git2::Delta::Modified | git2::Delta::Typechange => {
							if let Some(entry) = delta_entry(repo, &delta.new_file()) {
								changes.push(TreeChange::Modified(entry));
							}
						}
						git2::Delta::Renamed => {
							let from = delta
								.old_file()
								.path()
								.map(|p| p.to_string_lossy().into_owned())
								.unwrap_or_default();
							if let Some(entry) = delta_entry(repo, &delta.new_file()) {
								changes.push(TreeChange::Renamed { from, entry });
							}
						}
						git2::Delta::Deleted => {
							if let Some(path) = delta.old_file().path() {
								changes.push(TreeChange::Deleted {
									path: path.to_string_lossy().into_owned(),
								});
							}
						}
						_ => {}
					}
				}
				Ok(changes)
			})
			.await
	}

	async fn blob_bytes(&self, hash: &str) -> Result<Vec<u8>> {
		let hash = hash.to_string();
		self
			.with_repo(move |repo| {
				let blob = repo.find_blob(parse_oid(&hash)?)?;
				Ok(blob.content().to_vec())
			})
			.await
	}

	async fn blob_prefix(&self, hash: &str, max_len: usize) -> Result<Vec<u8>> {
		let hash = hash.to_string();
		self
			.with_repo(move |repo| {
				let blob = repo.find_blob(parse_oid(&hash)?)?;
				let content = blob.content();
				Ok(content[..content.len().min(max_len)].to_vec())
			})
			.await
	}

	async fn blob_reader(&self, hash: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
		let oid = parse_oid(hash)?;
		let path = self.repo_path.clone();
		let (tx, rx) = tokio::sync::mpsc::channel::<std::io::Result<Bytes>>(8);

		// Producer runs on the blocking pool and pushes fixed-size chunks;
		// a dropped consumer ends it through the failed send.
		tokio::task::spawn_blocking(move || {
			let io_err = |e: git2::Error| std::io::Error::new(std::io::ErrorKind::Other, e);
			let repo = match Repository::open(&path) {
				Ok(repo) => repo,
				Err(e) => {
					let _ = tx.blocking_send(Err(io_err(e)));
					return;
				}
			};
			let odb = match repo.odb() {
				Ok(odb) => odb,
				Err(e) => {
					let _ = tx.blocking_send(Err(io_err(e)));
					return;
				}
			};
			let mut reader = match odb.reader(oid) {
				Ok((reader, _, _)) => reader,
				Err(e) => {
					let _ = tx.blocking_send(Err(io_err(e)));
					return;
				}
			};
			let mut buf = [0u8; 64 * 1024];
			loop {
				match std::io::Read::read(&mut reader, &mut buf) {
					Ok(0) => break,
					Ok(n) => {
						if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
							break;
						}
					}
					Err(e) => {
						let _ = tx.blocking_send(Err(e));
						break;
					}
				}
			}
		});

		Ok(Box::new(StreamReader::new(ReceiverStream::new(rx))))
	}
}

/// Path helper shared by scanners: slash count of a repository-relative path.
pub fn path_depth(path: &str) -> i64 {
	path.matches('/').count() as i64
}

/// Open check used by callers that want the fatal error early.
pub async fn verify_repository(path: &Path) -> Result<()> {
	let path = path.to_path_buf();
	tokio::task::spawn_blocking(move || {
		Repository::open(&path)
			.map(|_| ())
			.map_err(|source| IndexError::RepoOpen { path, source })
	})
	.await?
}
