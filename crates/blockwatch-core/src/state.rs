//! In-memory validator and block-window state.
//!
//! A single writer (the app loop) mutates this; everyone else reads through
//! snapshots. Blocks live in a height-ordered map dense over the retention
//! window; trimming happens whenever the max height advances.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::Duration;

use crate::types::{Block, SignatureInfo, Validator};

/// Downtime-slashing parameters fetched from the chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlashingParams {
    pub signed_blocks_window: i64,
    pub min_signed_per_window: f64,
}

/// operator_address → reporter → recipients.
type NotifierIndex = HashMap<String, HashMap<String, BTreeSet<String>>>;

#[derive(Debug, Default)]
pub struct State {
    blocks: BTreeMap<i64, Block>,
    validators: HashMap<String, Validator>,
    cons_to_oper: HashMap<String, String>,
    notifiers: NotifierIndex,
    active_sets: BTreeMap<i64, HashSet<String>>,
    slashing_params: Option<SlashingParams>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Blocks ──────────────────────────────────────────────────────────────

    /// Insert a block. Out-of-order inserts are accepted; duplicates by
    /// height overwrite, which is a no-op for identical observations.
    pub fn add_block(&mut self, block: Block) {
        self.blocks.insert(block.height, block);
    }

    pub fn set_blocks(&mut self, blocks: Vec<Block>) {
        self.blocks = blocks.into_iter().map(|b| (b.height, b)).collect();
    }

    pub fn last_height(&self) -> i64 {
        self.blocks.keys().next_back().copied().unwrap_or(0)
    }

    pub fn earliest_height(&self) -> i64 {
        self.blocks.keys().next().copied().unwrap_or(0)
    }

    pub fn blocks_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn has_block(&self, height: i64) -> bool {
        self.blocks.contains_key(&height)
    }

    /// Drop all blocks (and cached active sets) strictly below `height`.
    pub fn trim_blocks_before(&mut self, height: i64) {
        self.blocks = self.blocks.split_off(&height);
        self.active_sets = self.active_sets.split_off(&height);
    }

    /// Mean spacing of the blocks currently in state, if at least two.
    pub fn avg_block_time(&self) -> Option<Duration> {
        let first = self.blocks.values().next()?;
        let last = self.blocks.values().next_back()?;
        let spans = self.blocks.len().saturating_sub(1) as i32;
        if spans == 0 {
            return None;
        }
        Some((last.time - first.time) / spans)
    }

    // ─── Validators ──────────────────────────────────────────────────────────

    /// Replace the validator set wholesale and rebuild the reverse index.
    pub fn set_validators(&mut self, validators: HashMap<String, Validator>) {
        self.cons_to_oper = validators
            .values()
            .map(|v| (v.consensus_address.clone(), v.operator_address.clone()))
            .collect();
        self.validators = validators;
    }

    pub fn get_validator(&self, operator_address: &str) -> Option<&Validator> {
        self.validators.get(operator_address)
    }

    pub fn get_validator_by_consensus(&self, consensus_address: &str) -> Option<&Validator> {
        self.cons_to_oper
            .get(consensus_address)
            .and_then(|oper| self.validators.get(oper))
    }

    pub fn validators(&self) -> &HashMap<String, Validator> {
        &self.validators
    }

    // ─── Active sets ─────────────────────────────────────────────────────────

    pub fn set_active_set(&mut self, height: i64, set: HashSet<String>) {
        self.active_sets.insert(height, set);
    }

    pub fn set_active_sets(&mut self, sets: Vec<(i64, HashSet<String>)>) {
        self.active_sets = sets.into_iter().collect();
    }

    /// Whether a consensus address was required to sign at `height`.
    ///
    /// Heights with no recorded active set fall back to the caller-supplied
    /// current flag — the conservative proxy for pre-tracking history.
    fn active_at(&self, height: i64, consensus_address: &str, fallback: bool) -> bool {
        match self.active_sets.get(&height) {
            Some(set) => set.contains(consensus_address),
            None => fallback,
        }
    }

    // ─── Notifiers ───────────────────────────────────────────────────────────

    pub fn set_notifiers(&mut self, rows: Vec<(String, String, String)>) {
        self.notifiers.clear();
        for (operator_address, reporter, notifier) in rows {
            self.notifiers
                .entry(operator_address)
                .or_default()
                .entry(reporter)
                .or_default()
                .insert(notifier);
        }
    }

    /// Returns `false` if the exact triple is already present.
    pub fn add_notifier(&mut self, operator_address: &str, reporter: &str, notifier: &str) -> bool {
        self.notifiers
            .entry(operator_address.to_string())
            .or_default()
            .entry(reporter.to_string())
            .or_default()
            .insert(notifier.to_string())
    }

    /// Returns `false` if the triple was not present.
    pub fn remove_notifier(
        &mut self,
        operator_address: &str,
        reporter: &str,
        notifier: &str,
    ) -> bool {
        self.notifiers
            .get_mut(operator_address)
            .and_then(|reporters| reporters.get_mut(reporter))
            .map(|set| set.remove(notifier))
            .unwrap_or(false)
    }

    pub fn notifiers_for_reporter(&self, operator_address: &str, reporter: &str) -> Vec<String> {
        self.notifiers
            .get(operator_address)
            .and_then(|reporters| reporters.get(reporter))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn validators_for_notifier(&self, reporter: &str, notifier: &str) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .notifiers
            .iter()
            .filter(|(_, reporters)| {
                reporters
                    .get(reporter)
                    .map(|set| set.contains(notifier))
                    .unwrap_or(false)
            })
            .map(|(operator_address, _)| operator_address.clone())
            .collect();
        addresses.sort();
        addresses
    }

    // ─── Signature counting ──────────────────────────────────────────────────

    /// Classify each slot of the trailing `window` as proposed, signed, or
    /// not signed. Slots where the validator was not in the active set at
    /// that height are excluded from the count entirely.
    pub fn validator_missed_blocks(&self, validator: &Validator, window: i64) -> SignatureInfo {
        let mut info = SignatureInfo::default();
        let last = self.last_height();
        if last == 0 {
            return info;
        }

        let from = (last - window + 1).max(self.earliest_height());
        for height in from..=last {
            let Some(block) = self.blocks.get(&height) else {
                // Gap from temporarily offline ingestion; nothing to classify.
                continue;
            };

            if !self.active_at(height, &validator.consensus_address, validator.active) {
                continue;
            }

            if block.proposer == validator.consensus_address {
                info.proposed += 1;
            } else if block.signed_by(&validator.consensus_address) {
                info.signed += 1;
            } else {
                info.not_signed += 1;
            }
        }

        info
    }

    // ─── Jail projection ─────────────────────────────────────────────────────

    pub fn set_slashing_params(&mut self, params: SlashingParams) {
        self.slashing_params = Some(params);
    }

    pub fn slashing_params(&self) -> Option<SlashingParams> {
        self.slashing_params
    }

    /// Project how long until downtime slashing jails the validator, from
    /// its on-chain missed counter and the measured block cadence.
    ///
    /// Returns `None` for unbonded or already-jailed validators, when the
    /// allowance is already exhausted, or when params/cadence are unknown.
    pub fn time_till_jail(&self, validator: &Validator) -> Option<Duration> {
        if !validator.active || validator.jailed {
            return None;
        }

        let params = self.slashing_params?;
        let avg = self.avg_block_time()?;

        let allowed =
            (params.signed_blocks_window as f64 * (1.0 - params.min_signed_per_window)) as i64;
        let remaining = allowed - validator.missed_blocks_counter;
        if remaining <= 0 {
            return None;
        }

        avg.checked_mul(i32::try_from(remaining).ok()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    pub(crate) fn block_at(height: i64, proposer: &str, signatures: &[&str]) -> Block {
        Block {
            height,
            // 6-second cadence starting at an arbitrary epoch
            time: Utc.timestamp_opt(1_700_000_000 + height * 6, 0).unwrap(),
            proposer: proposer.into(),
            signatures: signatures.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub(crate) fn validator(consensus_address: &str) -> Validator {
        Validator {
            operator_address: format!("valoper-{consensus_address}"),
            consensus_address: consensus_address.into(),
            moniker: consensus_address.into(),
            jailed: false,
            tombstoned: false,
            active: true,
            signatory: true,
            consensus_pubkey: vec![],
            missed_blocks_counter: 0,
        }
    }

    #[test]
    fn missed_blocks_classification() {
        let mut state = State::new();
        // V proposes block 1, signs 2 and 3, misses 4 and 5.
        state.add_block(block_at(1, "V", &["V", "W"]));
        state.add_block(block_at(2, "W", &["V", "W"]));
        state.add_block(block_at(3, "W", &["V", "W"]));
        state.add_block(block_at(4, "W", &["W"]));
        state.add_block(block_at(5, "W", &["W"]));

        let info = state.validator_missed_blocks(&validator("V"), 5);
        assert_eq!(info.proposed, 1);
        assert_eq!(info.signed, 2);
        assert_eq!(info.not_signed, 2);
        assert_eq!(info.total(), 5);
    }

    #[test]
    fn missed_blocks_skips_heights_outside_active_set() {
        let mut state = State::new();
        for height in 1..=4 {
            state.add_block(block_at(height, "W", &["W"]));
        }
        // V only joined the active set at height 3.
        for height in 1..=2 {
            state.set_active_set(height, HashSet::from(["W".to_string()]));
        }
        for height in 3..=4 {
            state.set_active_set(height, HashSet::from(["W".to_string(), "V".to_string()]));
        }

        let info = state.validator_missed_blocks(&validator("V"), 4);
        assert_eq!(info.not_signed, 2);
        assert_eq!(info.total(), 2);
    }

    #[test]
    fn missed_blocks_uses_current_flag_when_set_unknown() {
        let mut state = State::new();
        state.add_block(block_at(1, "W", &["W"]));
        state.add_block(block_at(2, "W", &["W"]));

        let bonded = validator("V");
        assert_eq!(state.validator_missed_blocks(&bonded, 2).not_signed, 2);

        let mut unbonded = validator("V");
        unbonded.active = false;
        assert_eq!(state.validator_missed_blocks(&unbonded, 2).total(), 0);
    }

    #[test]
    fn trim_keeps_window_bound() {
        let mut state = State::new();
        let store_blocks = 10;
        for height in 1..=15 {
            state.add_block(block_at(height, "P", &[]));
            state.trim_blocks_before(state.last_height() - store_blocks);
        }
        assert_eq!(state.earliest_height(), 5);
        assert_eq!(state.last_height(), 15);
        assert_eq!(state.blocks_count(), 11);
        assert!(state.last_height() - state.earliest_height() <= store_blocks);
    }

    #[test]
    fn out_of_order_insert_only_trims_on_new_max() {
        let mut state = State::new();
        state.add_block(block_at(10, "P", &[]));
        // A lagging peer delivers an older block; nothing is trimmed.
        state.add_block(block_at(7, "P", &[]));
        assert_eq!(state.blocks_count(), 2);
        assert_eq!(state.last_height(), 10);
    }

    #[test]
    fn avg_block_time_measures_cadence() {
        let mut state = State::new();
        for height in 1..=11 {
            state.add_block(block_at(height, "P", &[]));
        }
        assert_eq!(state.avg_block_time(), Some(Duration::seconds(6)));
    }

    #[test]
    fn avg_block_time_needs_two_blocks() {
        let mut state = State::new();
        assert!(state.avg_block_time().is_none());
        state.add_block(block_at(1, "P", &[]));
        assert!(state.avg_block_time().is_none());
    }

    #[test]
    fn notifier_uniqueness() {
        let mut state = State::new();
        assert!(state.add_notifier("valoper1", "telegram", "alice"));
        assert!(!state.add_notifier("valoper1", "telegram", "alice"));
        assert!(state.remove_notifier("valoper1", "telegram", "alice"));
        assert!(!state.remove_notifier("valoper1", "telegram", "alice"));
        assert!(state.add_notifier("valoper1", "telegram", "alice"));
    }

    #[test]
    fn notifier_lookup_is_scoped_by_reporter() {
        let mut state = State::new();
        state.add_notifier("valoper1", "telegram", "alice");
        state.add_notifier("valoper1", "discord", "bob");
        state.add_notifier("valoper2", "telegram", "alice");

        assert_eq!(
            state.notifiers_for_reporter("valoper1", "telegram"),
            vec!["alice".to_string()]
        );
        assert_eq!(
            state.validators_for_notifier("telegram", "alice"),
            vec!["valoper1".to_string(), "valoper2".to_string()]
        );
        assert!(state.validators_for_notifier("discord", "alice").is_empty());
    }

    #[test]
    fn reverse_index_rebuilt_on_refresh() {
        let mut state = State::new();
        let v = validator("CONS1");
        state.set_validators(HashMap::from([(v.operator_address.clone(), v)]));
        assert!(state.get_validator_by_consensus("CONS1").is_some());

        let w = validator("CONS2");
        state.set_validators(HashMap::from([(w.operator_address.clone(), w)]));
        assert!(state.get_validator_by_consensus("CONS1").is_none());
        assert!(state.get_validator_by_consensus("CONS2").is_some());
    }

    #[test]
    fn time_till_jail_projection() {
        let mut state = State::new();
        for height in 1..=11 {
            state.add_block(block_at(height, "P", &[]));
        }
        state.set_slashing_params(SlashingParams {
            signed_blocks_window: 100,
            min_signed_per_window: 0.05,
        });

        // allowance = floor(100 * 0.95) = 95; 90 missed → 5 blocks * 6s left
        let mut v = validator("V");
        v.missed_blocks_counter = 90;
        assert_eq!(state.time_till_jail(&v), Some(Duration::seconds(30)));

        v.missed_blocks_counter = 95;
        assert_eq!(state.time_till_jail(&v), None);

        v.missed_blocks_counter = 0;
        v.jailed = true;
        assert_eq!(state.time_till_jail(&v), None);
    }
}
