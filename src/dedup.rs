// src/dedup.rs
//! Seen-item store.
//!
//! Items are identified by the SHA-256 of their title. The store only ever
//! grows: `insert_batch` is idempotent and nothing is evicted.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Hex SHA-256 of a title. Same title, same fingerprint.
pub fn fingerprint(title: &str) -> String {
    let digest = Sha256::digest(title.as_bytes());
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Whether `title` was accepted by an earlier committed batch.
    async fn exists(&self, title: &str) -> Result<bool>;

    /// Record all titles in one batch. Returns how many were new.
    async fn insert_batch(&self, titles: &[String]) -> Result<u64>;
}

const BUSY_TIMEOUT_MS: u64 = 30_000;

/// SQLite-backed store. Reads go through a small pool; writes go through a
/// single-connection pool so batches from concurrent callers serialize.
pub struct SqliteDedupStore {
    read_pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqliteDedupStore {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating store directory {}", dir.display()))?;
                tracing::info!(dir = %dir.display(), "created store directory");
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

        let write_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await
            .with_context(|| format!("opening store {}", path.display()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS article_hashes (
                title_hash TEXT PRIMARY KEY NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&write_pool)
        .await
        .context("creating article_hashes table")?;

        let read_pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("opening store {} for reading", path.display()))?;

        tracing::info!(path = %path.display(), "dedup store ready");
        Ok(Self {
            read_pool,
            write_pool,
        })
    }

    /// Number of fingerprints stored.
    pub async fn len(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM article_hashes")
            .fetch_one(&self.read_pool)
            .await
            .context("counting fingerprints")?;
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl DedupStore for SqliteDedupStore {
    async fn exists(&self, title: &str) -> Result<bool> {
        let hit: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM article_hashes WHERE title_hash = ?")
                .bind(fingerprint(title))
                .fetch_optional(&self.read_pool)
                .await
                .context("looking up fingerprint")?;
        Ok(hit.is_some())
    }

    async fn insert_batch(&self, titles: &[String]) -> Result<u64> {
        if titles.is_empty() {
            return Ok(0);
        }
        let mut tx = self
            .write_pool
            .begin()
            .await
            .context("starting insert batch")?;
        let mut inserted = 0u64;
        for title in titles {
            let res = sqlx::query("INSERT OR IGNORE INTO article_hashes (title_hash) VALUES (?)")
                .bind(fingerprint(title))
                .execute(&mut *tx)
                .await
                .context("inserting fingerprint")?;
            inserted += res.rows_affected();
        }
        tx.commit().await.context("committing insert batch")?;
        tracing::debug!(inserted, batch = titles.len(), "fingerprints committed");
        Ok(inserted)
    }
}

/// In-process store, for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    seen: RwLock<HashSet<String>>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.read().is_empty()
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn exists(&self, title: &str) -> Result<bool> {
        Ok(self.seen.read().contains(&fingerprint(title)))
    }

    async fn insert_batch(&self, titles: &[String]) -> Result<u64> {
        let mut seen = self.seen.write();
        let inserted = titles
            .iter()
            .filter(|t| seen.insert(fingerprint(t)))
            .count();
        Ok(inserted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_distinct() {
        assert_eq!(fingerprint("BTC listed"), fingerprint("BTC listed"));
        assert_ne!(fingerprint("BTC listed"), fingerprint("ETH listed"));
        assert_eq!(fingerprint("").len(), 64);
        // known SHA-256 of "abc"
        assert_eq!(
            fingerprint("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn memory_store_is_idempotent() {
        let store = MemoryDedupStore::new();
        assert!(!store.exists("a").await.unwrap());
        let n = store
            .insert_batch(&["a".to_string(), "a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert!(store.exists("a").await.unwrap());
        assert_eq!(store.insert_batch(&["a".to_string()]).await.unwrap(), 0);
        assert_eq!(store.len(), 2);
    }
}
