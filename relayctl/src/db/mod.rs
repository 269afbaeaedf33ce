//! Database layer for data persistence and access.
//!
//! Two backends sit behind the same repositories:
//!
//! - **PostgreSQL** via SQLx, for deployments with more than one replica. Counter updates are
//!   single statements so concurrent admissions cannot race.
//! - **In-memory**, backed by [`dashmap`], for local development and tests. Counter updates
//!   happen under the map's shard lock.
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  (API request handlers, rate limiter, session persistence)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┬──────────────┐
//! │  PostgreSQL │  MemoryStore │
//! └─────────────┴──────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```ignore
//! use relayctl::db::{Database, handlers::{Flows, Repository}};
//!
//! let db = Database::in_memory();
//! let flow = Flows::new(&db).create(&request).await?;
//! ```
//!
//! # Migrations
//!
//! PostgreSQL migrations live in the `migrations/` directory and run on startup through
//! [`crate::migrator`].

pub mod errors;
pub mod handlers;
pub mod memory;
pub mod models;

use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::config::DatabaseConfig;
pub use memory::MemoryStore;

/// Handle to the configured storage backend. Cheap to clone.
#[derive(Debug, Clone)]
pub enum Database {
    Postgres(PgPool),
    Memory(Arc<MemoryStore>),
}

impl Database {
    /// Connect to the configured backend and run migrations where applicable.
    pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Self> {
        match config {
            DatabaseConfig::Memory => {
                info!("Using in-memory store; data will be lost on shutdown");
                Ok(Self::in_memory())
            }
            DatabaseConfig::External { url, pool } => {
                info!("Using external database");
                let pg = PgPoolOptions::new()
                    .max_connections(pool.max_connections)
                    .min_connections(pool.min_connections)
                    .acquire_timeout(pool.acquire_timeout)
                    .connect(url)
                    .await?;
                crate::migrator().run(&pg).await?;
                Ok(Self::Postgres(pg))
            }
        }
    }

    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(MemoryStore::default()))
    }

    pub async fn close(&self) {
        if let Database::Postgres(pool) = self {
            pool.close().await;
        }
    }
}
