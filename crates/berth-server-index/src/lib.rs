// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Commit indexing: turns pushed git history into queryable commit, tree and
//! blob rows, with branch visibility gated on clean scans.

pub mod blobstore;
pub mod classify;
pub mod error;
pub mod finalizer;
pub mod graph;
pub mod orchestrator;
pub mod processor;
pub mod publisher;
pub mod scanner;
pub mod types;

pub use blobstore::{storage_key, BlobStore, FsBlobStore, PresignedDownload};
pub use error::{IndexError, Result};
pub use finalizer::Finalizer;
pub use graph::{
	path_depth, verify_repository, CommitInfo, EntryInfo, EntryKind, Git2GraphReader, GraphReader,
	TreeChange,
};
pub use orchestrator::Indexer;
pub use processor::BlobProcessor;
pub use publisher::{FailurePublisher, LogPublisher, StaticUserDirectory, UserDirectory};
pub use scanner::Scanner;
pub use types::{
	CommitResult, FileFailure, FinalizeOutcome, IndexRunReport, IndexerConfig, PushEvent,
	ScanReport, ZERO_REF,
};
