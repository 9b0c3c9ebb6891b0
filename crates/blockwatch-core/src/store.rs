//! The persistence seam between the state engine and its backing database.
//!
//! `blockwatch-storage` provides the SQLite implementation; the in-memory
//! store here backs tests and ephemeral runs.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::Block;

/// Durable store for blocks, subscriptions, and active-set history.
///
/// Every mutation on [`crate::manager::StateManager`] writes through a
/// `Store` before the caller is acknowledged; on startup the full contents
/// are read back to rebuild in-memory state.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_block(&self, block: &Block) -> Result<(), StoreError>;
    async fn get_all_blocks(&self) -> Result<Vec<Block>, StoreError>;
    async fn trim_blocks_before(&self, height: i64) -> Result<(), StoreError>;

    /// Returns `false` when the triple already exists.
    async fn insert_notifier(
        &self,
        operator_address: &str,
        reporter: &str,
        notifier: &str,
    ) -> Result<bool, StoreError>;
    async fn remove_notifier(
        &self,
        operator_address: &str,
        reporter: &str,
        notifier: &str,
    ) -> Result<bool, StoreError>;
    async fn get_all_notifiers(&self) -> Result<Vec<(String, String, String)>, StoreError>;

    async fn insert_active_set(
        &self,
        height: i64,
        set: &HashSet<String>,
    ) -> Result<(), StoreError>;
    async fn get_all_active_sets(&self) -> Result<Vec<(i64, HashSet<String>)>, StoreError>;
    async fn trim_active_sets_before(&self, height: i64) -> Result<(), StoreError>;
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    blocks: Mutex<HashMap<i64, Block>>,
    notifiers: Mutex<HashSet<(String, String, String)>>,
    active_sets: Mutex<HashMap<i64, HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_block(&self, block: &Block) -> Result<(), StoreError> {
        self.blocks
            .lock()
            .unwrap()
            .insert(block.height, block.clone());
        Ok(())
    }

    async fn get_all_blocks(&self) -> Result<Vec<Block>, StoreError> {
        let mut blocks: Vec<Block> = self.blocks.lock().unwrap().values().cloned().collect();
        blocks.sort_by_key(|b| b.height);
        Ok(blocks)
    }

    async fn trim_blocks_before(&self, height: i64) -> Result<(), StoreError> {
        self.blocks.lock().unwrap().retain(|h, _| *h >= height);
        Ok(())
    }

    async fn insert_notifier(
        &self,
        operator_address: &str,
        reporter: &str,
        notifier: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.notifiers.lock().unwrap().insert((
            operator_address.to_string(),
            reporter.to_string(),
            notifier.to_string(),
        )))
    }

    async fn remove_notifier(
        &self,
        operator_address: &str,
        reporter: &str,
        notifier: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.notifiers.lock().unwrap().remove(&(
            operator_address.to_string(),
            reporter.to_string(),
            notifier.to_string(),
        )))
    }

    async fn get_all_notifiers(&self) -> Result<Vec<(String, String, String)>, StoreError> {
        let mut rows: Vec<_> = self.notifiers.lock().unwrap().iter().cloned().collect();
        rows.sort();
        Ok(rows)
    }

    async fn insert_active_set(
        &self,
        height: i64,
        set: &HashSet<String>,
    ) -> Result<(), StoreError> {
        self.active_sets.lock().unwrap().insert(height, set.clone());
        Ok(())
    }

    async fn get_all_active_sets(&self) -> Result<Vec<(i64, HashSet<String>)>, StoreError> {
        let mut rows: Vec<_> = self
            .active_sets
            .lock()
            .unwrap()
            .iter()
            .map(|(height, set)| (*height, set.clone()))
            .collect();
        rows.sort_by_key(|(height, _)| *height);
        Ok(rows)
    }

    async fn trim_active_sets_before(&self, height: i64) -> Result<(), StoreError> {
        self.active_sets.lock().unwrap().retain(|h, _| *h >= height);
        Ok(())
    }
}
