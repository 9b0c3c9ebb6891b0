//! Write-through facade over [`State`] and a [`Store`].
//!
//! The app loop is the only writer; reporters and the dispatch pipeline
//! read through short-lived read locks or snapshots. No lock is ever held
//! across an await: state mutation happens first, then the store write.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::Duration;
use tracing::debug;

use crate::error::StoreError;
use crate::snapshot::{Snapshot, SnapshotEntry};
use crate::state::{SlashingParams, State};
use crate::store::Store;
use crate::types::{Block, SignatureInfo, Validator};

pub struct StateManager {
    state: RwLock<State>,
    store: Arc<dyn Store>,
    blocks_window: i64,
    store_blocks: i64,
}

impl StateManager {
    pub fn new(store: Arc<dyn Store>, blocks_window: i64, store_blocks: i64) -> Self {
        Self {
            state: RwLock::new(State::new()),
            store,
            blocks_window,
            store_blocks,
        }
    }

    /// Rebuild in-memory state from the store. Called once at startup.
    pub async fn init(&self) -> Result<(), StoreError> {
        let blocks = self.store.get_all_blocks().await?;
        let notifiers = self.store.get_all_notifiers().await?;
        let active_sets = self.store.get_all_active_sets().await?;

        let mut state = self.state.write().unwrap();
        debug!(
            blocks = blocks.len(),
            notifiers = notifiers.len(),
            active_sets = active_sets.len(),
            "restored state from store"
        );
        state.set_blocks(blocks);
        state.set_notifiers(notifiers);
        state.set_active_sets(active_sets);
        Ok(())
    }

    // ─── Blocks ──────────────────────────────────────────────────────────────

    /// Insert a block, persist it, and trim the window when the max height
    /// advances. Inserting the same height twice is idempotent.
    pub async fn add_block(&self, block: Block) -> Result<(), StoreError> {
        let height = block.height;
        let trim_height = {
            let mut state = self.state.write().unwrap();
            state.add_block(block.clone());
            if state.last_height() == height {
                let trim_height = height - self.store_blocks;
                state.trim_blocks_before(trim_height);
                Some(trim_height)
            } else {
                None
            }
        };

        self.store.insert_block(&block).await?;
        if let Some(trim_height) = trim_height {
            debug!(height, trim_height, "trimming blocks below window");
            self.store.trim_blocks_before(trim_height).await?;
            self.store.trim_active_sets_before(trim_height).await?;
        }
        Ok(())
    }

    pub fn last_height(&self) -> i64 {
        self.state.read().unwrap().last_height()
    }

    pub fn blocks_count(&self) -> usize {
        self.state.read().unwrap().blocks_count()
    }

    // ─── Validators ──────────────────────────────────────────────────────────

    pub fn set_validators(&self, validators: HashMap<String, Validator>) {
        self.state.write().unwrap().set_validators(validators);
    }

    pub fn get_validator(&self, operator_address: &str) -> Option<Validator> {
        self.state
            .read()
            .unwrap()
            .get_validator(operator_address)
            .cloned()
    }

    pub fn set_slashing_params(&self, params: SlashingParams) {
        self.state.write().unwrap().set_slashing_params(params);
    }

    pub async fn set_active_set(
        &self,
        height: i64,
        set: HashSet<String>,
    ) -> Result<(), StoreError> {
        self.state
            .write()
            .unwrap()
            .set_active_set(height, set.clone());
        self.store.insert_active_set(height, &set).await
    }

    pub fn missed_blocks(&self, validator: &Validator) -> SignatureInfo {
        self.state
            .read()
            .unwrap()
            .validator_missed_blocks(validator, self.blocks_window)
    }

    pub fn time_till_jail(&self, validator: &Validator) -> Option<Duration> {
        self.state.read().unwrap().time_till_jail(validator)
    }

    // ─── Notifiers ───────────────────────────────────────────────────────────

    /// Returns `false` when the subscription already existed.
    pub async fn add_notifier(
        &self,
        operator_address: &str,
        reporter: &str,
        notifier: &str,
    ) -> Result<bool, StoreError> {
        let added = self
            .state
            .write()
            .unwrap()
            .add_notifier(operator_address, reporter, notifier);
        if !added {
            return Ok(false);
        }
        self.store
            .insert_notifier(operator_address, reporter, notifier)
            .await?;
        Ok(true)
    }

    /// Returns `false` when there was nothing to remove.
    pub async fn remove_notifier(
        &self,
        operator_address: &str,
        reporter: &str,
        notifier: &str,
    ) -> Result<bool, StoreError> {
        let removed = self
            .state
            .write()
            .unwrap()
            .remove_notifier(operator_address, reporter, notifier);
        if !removed {
            return Ok(false);
        }
        self.store
            .remove_notifier(operator_address, reporter, notifier)
            .await?;
        Ok(true)
    }

    pub fn notifiers_for_reporter(&self, operator_address: &str, reporter: &str) -> Vec<String> {
        self.state
            .read()
            .unwrap()
            .notifiers_for_reporter(operator_address, reporter)
    }

    pub fn validators_for_notifier(&self, reporter: &str, notifier: &str) -> Vec<String> {
        self.state
            .read()
            .unwrap()
            .validators_for_notifier(reporter, notifier)
    }

    // ─── Snapshots ───────────────────────────────────────────────────────────

    /// Capture every validator with its signature window. The read lock is
    /// held for the whole construction, so entries are mutually consistent.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.read().unwrap();
        let entries = state
            .validators()
            .values()
            .map(|validator| {
                (
                    validator.operator_address.clone(),
                    SnapshotEntry {
                        validator: validator.clone(),
                        signature_info: state
                            .validator_missed_blocks(validator, self.blocks_window),
                    },
                )
            })
            .collect();
        Snapshot::new(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn block_at(height: i64) -> Block {
        Block {
            height,
            time: Utc.timestamp_opt(1_700_000_000 + height * 6, 0).unwrap(),
            proposer: "PROP".into(),
            signatures: vec!["V".into()],
        }
    }

    fn manager_with(store: Arc<MemoryStore>) -> StateManager {
        StateManager::new(store, 100, 10)
    }

    #[tokio::test]
    async fn trim_applies_to_state_and_store() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager_with(Arc::clone(&store));

        for height in 1..=15 {
            manager.add_block(block_at(height)).await.unwrap();
        }

        // storeBlocks = 10: after inserting 15, exactly 5..=15 survive.
        let stored = store.get_all_blocks().await.unwrap();
        let heights: Vec<i64> = stored.iter().map(|b| b.height).collect();
        assert_eq!(heights, (5..=15).collect::<Vec<i64>>());
        assert_eq!(manager.blocks_count(), 11);
        assert_eq!(manager.last_height(), 15);
    }

    #[tokio::test]
    async fn init_restores_from_store() {
        let store = Arc::new(MemoryStore::new());
        {
            let manager = manager_with(Arc::clone(&store));
            for height in 1..=3 {
                manager.add_block(block_at(height)).await.unwrap();
            }
            manager
                .add_notifier("valoper1", "telegram", "alice")
                .await
                .unwrap();
        }

        // A fresh manager over the same store sees everything back.
        let manager = manager_with(Arc::clone(&store));
        manager.init().await.unwrap();
        assert_eq!(manager.blocks_count(), 3);
        assert_eq!(
            manager.notifiers_for_reporter("valoper1", "telegram"),
            vec!["alice".to_string()]
        );
    }

    #[tokio::test]
    async fn notifier_write_through_uniqueness() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager_with(Arc::clone(&store));

        assert!(manager
            .add_notifier("valoper1", "telegram", "alice")
            .await
            .unwrap());
        assert!(!manager
            .add_notifier("valoper1", "telegram", "alice")
            .await
            .unwrap());
        assert!(manager
            .remove_notifier("valoper1", "telegram", "alice")
            .await
            .unwrap());
        assert!(manager
            .add_notifier("valoper1", "telegram", "alice")
            .await
            .unwrap());

        assert_eq!(store.get_all_notifiers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn snapshot_captures_signature_windows() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager_with(store);

        for height in 1..=5 {
            manager.add_block(block_at(height)).await.unwrap();
        }

        let signer = Validator {
            operator_address: "valoper1".into(),
            consensus_address: "V".into(),
            moniker: "v".into(),
            jailed: false,
            tombstoned: false,
            active: true,
            signatory: true,
            consensus_pubkey: vec![],
            missed_blocks_counter: 0,
        };
        let mut missing = signer.clone();
        missing.operator_address = "valoper2".into();
        missing.consensus_address = "M".into();

        manager.set_validators(HashMap::from([
            (signer.operator_address.clone(), signer),
            (missing.operator_address.clone(), missing),
        ]));

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.entries["valoper1"].signature_info.signed, 5);
        assert_eq!(snapshot.entries["valoper2"].signature_info.not_signed, 5);
    }
}
