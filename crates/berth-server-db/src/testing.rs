// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::SqlitePool;

use crate::schema::init_schema;

pub async fn create_test_pool() -> SqlitePool {
	SqlitePool::connect(":memory:").await.unwrap()
}

/// In-memory pool with the full berth schema, shared by tests across crates.
pub async fn create_index_test_pool() -> SqlitePool {
	let pool = create_test_pool().await;
	init_schema(&pool).await.unwrap();
	pool
}
