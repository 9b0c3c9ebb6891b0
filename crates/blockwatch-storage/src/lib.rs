//! SQLite persistence for blockwatch.
//!
//! A single local database file holds the block window, the notifier
//! subscriptions, and the active-set history. Uses `sqlx` with WAL mode.
//! Writes go through [`blockwatch_core::store::Store`], so the state
//! engine never sees SQL.
//!
//! # Usage
//! ```rust,no_run
//! use blockwatch_storage::Database;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let db = Database::open("./blockwatch.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let db = Database::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::DateTime;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use blockwatch_core::error::StoreError;
use blockwatch_core::store::Store;
use blockwatch_core::types::Block;

/// SQLite-backed store for blocks, notifiers, and active sets.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database at `path`.
    ///
    /// The path may be a plain file path (`"./blockwatch.db"`) or a full
    /// SQLite URL (`"sqlite:./blockwatch.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let database = Self { pool };
        database.init_schema().await?;
        Ok(database)
    }

    /// Open an in-memory database. All data is lost when the pool is
    /// dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let database = Self { pool };
        database.init_schema().await?;
        Ok(database)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blocks (
                height     INTEGER PRIMARY KEY,
                time       INTEGER NOT NULL,
                proposer   TEXT    NOT NULL,
                signatures TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS notifiers (
                operator_address TEXT NOT NULL,
                reporter         TEXT NOT NULL,
                notifier         TEXT NOT NULL,
                PRIMARY KEY (operator_address, reporter, notifier)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS active_sets (
                height            INTEGER NOT NULL,
                consensus_address TEXT    NOT NULL,
                PRIMARY KEY (height, consensus_address)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl Store for Database {
    async fn insert_block(&self, block: &Block) -> Result<(), StoreError> {
        let signatures = serde_json::to_string(&block.signatures)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query(
            "INSERT OR REPLACE INTO blocks (height, time, proposer, signatures)
             VALUES (?, ?, ?, ?)",
        )
        .bind(block.height)
        .bind(block.time.timestamp())
        .bind(&block.proposer)
        .bind(&signatures)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        debug!(height = block.height, "block stored");
        Ok(())
    }

    async fn get_all_blocks(&self) -> Result<Vec<Block>, StoreError> {
        let rows = sqlx::query(
            "SELECT height, time, proposer, signatures FROM blocks ORDER BY height",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut blocks = Vec::with_capacity(rows.len());
        for row in rows {
            let height: i64 = row.get("height");
            let timestamp: i64 = row.get("time");
            let signatures_raw: String = row.get("signatures");

            let time = DateTime::from_timestamp(timestamp, 0)
                .ok_or_else(|| StoreError::Corrupt(format!(
                    "block {height} has invalid timestamp {timestamp}"
                )))?;
            let signatures: Vec<String> = serde_json::from_str(&signatures_raw)
                .map_err(|e| StoreError::Corrupt(format!(
                    "block {height} has invalid signatures: {e}"
                )))?;

            blocks.push(Block {
                height,
                time,
                proposer: row.get("proposer"),
                signatures,
            });
        }
        Ok(blocks)
    }

    async fn trim_blocks_before(&self, height: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM blocks WHERE height < ?")
            .bind(height)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn insert_notifier(
        &self,
        operator_address: &str,
        reporter: &str,
        notifier: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO notifiers (operator_address, reporter, notifier)
             VALUES (?, ?, ?)",
        )
        .bind(operator_address)
        .bind(reporter)
        .bind(notifier)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_notifier(
        &self,
        operator_address: &str,
        reporter: &str,
        notifier: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM notifiers
             WHERE operator_address = ? AND reporter = ? AND notifier = ?",
        )
        .bind(operator_address)
        .bind(reporter)
        .bind(notifier)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_all_notifiers(&self) -> Result<Vec<(String, String, String)>, StoreError> {
        let rows = sqlx::query(
            "SELECT operator_address, reporter, notifier FROM notifiers
             ORDER BY operator_address, reporter, notifier",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get("operator_address"),
                    row.get("reporter"),
                    row.get("notifier"),
                )
            })
            .collect())
    }

    async fn insert_active_set(
        &self,
        height: i64,
        set: &HashSet<String>,
    ) -> Result<(), StoreError> {
        for consensus_address in set {
            sqlx::query(
                "INSERT OR REPLACE INTO active_sets (height, consensus_address)
                 VALUES (?, ?)",
            )
            .bind(height)
            .bind(consensus_address)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    async fn get_all_active_sets(&self) -> Result<Vec<(i64, HashSet<String>)>, StoreError> {
        let rows = sqlx::query(
            "SELECT height, consensus_address FROM active_sets ORDER BY height",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut sets: BTreeMap<i64, HashSet<String>> = BTreeMap::new();
        for row in rows {
            let height: i64 = row.get("height");
            let consensus_address: String = row.get("consensus_address");
            sets.entry(height).or_default().insert(consensus_address);
        }
        Ok(sets.into_iter().collect())
    }

    async fn trim_active_sets_before(&self, height: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM active_sets WHERE height < ?")
            .bind(height)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_block(height: i64) -> Block {
        Block {
            height,
            time: Utc.timestamp_opt(1_700_000_000 + height * 6, 0).unwrap(),
            proposer: "PROPOSER".into(),
            signatures: vec!["AAAA".into(), "BBBB".into()],
        }
    }

    // ── Blocks ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn block_roundtrip() {
        let db = Database::in_memory().await.unwrap();

        db.insert_block(&sample_block(100)).await.unwrap();
        db.insert_block(&sample_block(102)).await.unwrap();
        db.insert_block(&sample_block(101)).await.unwrap();

        let blocks = db.get_all_blocks().await.unwrap();
        let heights: Vec<i64> = blocks.iter().map(|b| b.height).collect();
        assert_eq!(heights, vec![100, 101, 102]);
        assert_eq!(blocks[0].signatures, vec!["AAAA", "BBBB"]);
        assert_eq!(blocks[0].time, sample_block(100).time);
    }

    #[tokio::test]
    async fn block_insert_is_idempotent_on_height() {
        let db = Database::in_memory().await.unwrap();

        db.insert_block(&sample_block(100)).await.unwrap();
        db.insert_block(&sample_block(100)).await.unwrap();

        assert_eq!(db.get_all_blocks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn trim_removes_strictly_below() {
        let db = Database::in_memory().await.unwrap();

        for height in 1..=15 {
            db.insert_block(&sample_block(height)).await.unwrap();
        }
        db.trim_blocks_before(5).await.unwrap();

        let heights: Vec<i64> = db
            .get_all_blocks()
            .await
            .unwrap()
            .iter()
            .map(|b| b.height)
            .collect();
        assert_eq!(heights, (5..=15).collect::<Vec<i64>>());
    }

    // ── Notifiers ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn notifier_triple_is_unique() {
        let db = Database::in_memory().await.unwrap();

        assert!(db.insert_notifier("valoper1", "telegram", "alice").await.unwrap());
        assert!(!db.insert_notifier("valoper1", "telegram", "alice").await.unwrap());
        assert!(db.remove_notifier("valoper1", "telegram", "alice").await.unwrap());
        assert!(!db.remove_notifier("valoper1", "telegram", "alice").await.unwrap());
        assert!(db.insert_notifier("valoper1", "telegram", "alice").await.unwrap());
    }

    #[tokio::test]
    async fn notifiers_roundtrip() {
        let db = Database::in_memory().await.unwrap();

        db.insert_notifier("valoper2", "telegram", "bob").await.unwrap();
        db.insert_notifier("valoper1", "discord", "alice").await.unwrap();

        let rows = db.get_all_notifiers().await.unwrap();
        assert_eq!(
            rows,
            vec![
                ("valoper1".into(), "discord".into(), "alice".into()),
                ("valoper2".into(), "telegram".into(), "bob".into()),
            ]
        );
    }

    // ── Active sets ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn active_sets_roundtrip_and_trim() {
        let db = Database::in_memory().await.unwrap();

        let set_a: HashSet<String> = ["AAAA".to_string(), "BBBB".to_string()].into();
        let set_b: HashSet<String> = ["AAAA".to_string()].into();
        db.insert_active_set(100, &set_a).await.unwrap();
        db.insert_active_set(101, &set_b).await.unwrap();

        let sets = db.get_all_active_sets().await.unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0], (100, set_a));
        assert_eq!(sets[1], (101, set_b.clone()));

        db.trim_active_sets_before(101).await.unwrap();
        let sets = db.get_all_active_sets().await.unwrap();
        assert_eq!(sets, vec![(101, set_b)]);
    }
}
