//! The app loop — single consumer of new-block events, single writer of
//! state.
//!
//! Ingestion: every block from the websocket manager is appended to state
//! and the database. On a timer, the validator set is refreshed over HTTP
//! RPC, a snapshot is taken and diffed against the previous one, and the
//! resulting report is dispatched to every enabled reporter.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bech32::{FromBase32, ToBase32, Variant};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use blockwatch_core::config::Config;
use blockwatch_core::manager::StateManager;
use blockwatch_core::report::Report;
use blockwatch_core::snapshot::{diff, Snapshot};
use blockwatch_core::state::SlashingParams;
use blockwatch_core::types::{consensus_address, Block, Validator};
use blockwatch_metrics::Metrics;
use blockwatch_reporters::Reporter;
use blockwatch_rpc::codec::{SigningInfo, BOND_STATUS_BONDED};
use blockwatch_rpc::{RpcClient, RpcError, WsEmittable};

pub struct App {
    config: Config,
    manager: Arc<StateManager>,
    rpc: Arc<RpcClient>,
    reporters: Vec<Arc<dyn Reporter>>,
    metrics: Arc<Metrics>,
}

impl App {
    pub fn new(
        config: Config,
        manager: Arc<StateManager>,
        rpc: Arc<RpcClient>,
        reporters: Vec<Arc<dyn Reporter>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            manager,
            rpc,
            reporters,
            metrics,
        }
    }

    /// Run until the stop signal fires or the block channel closes.
    pub async fn run(
        &self,
        mut block_rx: mpsc::Receiver<WsEmittable>,
        mut stop: watch::Receiver<bool>,
    ) {
        // Establish the baseline snapshot before reporting anything.
        if let Err(e) = self.refresh_validators().await {
            warn!(error = %e, "initial validator refresh failed");
        }
        let mut previous = self.manager.snapshot();

        let mut refresh = interval(Duration::from_secs(
            self.config.chain.refresh_interval_secs.max(1),
        ));
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        refresh.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                _ = stop.changed() => {
                    info!("app loop stopping");
                    return;
                }
                received = block_rx.recv() => {
                    match received {
                        None => {
                            info!("block channel closed, app loop stopping");
                            return;
                        }
                        Some(WsEmittable::NewBlock(block)) => self.handle_block(block).await,
                    }
                }
                _ = refresh.tick() => {
                    previous = self.refresh_and_report(previous).await;
                }
            }
        }
    }

    async fn handle_block(&self, block: Block) {
        let height = block.height;
        match self.manager.add_block(block).await {
            Ok(()) => {
                debug!(height, "block ingested");
                self.metrics
                    .set_last_block_height(&self.config.chain.name, self.manager.last_height());
            }
            Err(e) => warn!(height, error = %e, "could not persist block"),
        }
    }

    async fn refresh_and_report(&self, previous: Snapshot) -> Snapshot {
        if let Err(e) = self.refresh_validators().await {
            warn!(error = %e, "validator refresh failed, keeping previous snapshot");
            return previous;
        }

        let snapshot = self.manager.snapshot();
        if previous.is_empty() {
            // First successful refresh; nothing to compare against yet.
            return snapshot;
        }

        let report = diff(
            &previous,
            &snapshot,
            &self.config.chain.missed_blocks_groups,
        );
        if !report.is_empty() {
            self.dispatch(&report).await;
        }
        snapshot
    }

    async fn dispatch(&self, report: &Report) {
        for entry in &report.entries {
            info!(
                event = entry.type_name(),
                validator = %entry.validator().operator_address,
                "emitting event"
            );
            self.metrics
                .record_event(&self.config.chain.name, entry.type_name());
        }

        for reporter in &self.reporters {
            if !reporter.enabled() {
                continue;
            }
            if let Err(e) = reporter.send(report).await {
                warn!(reporter = reporter.name(), error = %e, "report delivery failed");
                self.metrics
                    .record_reporter_error(&self.config.chain.name, reporter.name());
            }
        }
    }

    /// Pull the validator set, signing infos, slashing params, and the
    /// active set at the current tip, then swap state wholesale.
    async fn refresh_validators(&self) -> Result<(), RpcError> {
        let validators = self.rpc.get_validators().await?;
        let signing_infos = self.rpc.get_signing_infos().await?;
        let params = self.rpc.get_slashing_params().await?;

        // Signing infos are keyed by bech32 valcons; index them by the raw
        // consensus address so they join against derived addresses.
        let mut infos: HashMap<String, SigningInfo> = HashMap::new();
        for info in signing_infos {
            match bech32_to_hex(&info.address) {
                Ok(hex_address) => {
                    infos.insert(hex_address, info);
                }
                Err(e) => debug!(address = %info.address, error = %e, "skipping unparseable signing info"),
            }
        }

        let height = self.manager.last_height();
        let active_set: Option<HashSet<String>> = if height > 0 {
            match self.rpc.get_active_set_at_block(height).await {
                Ok(set) => {
                    if let Err(e) = self.manager.set_active_set(height, set.clone()).await {
                        warn!(height, error = %e, "could not persist active set");
                    }
                    Some(set)
                }
                Err(e) => {
                    warn!(height, error = %e, "could not fetch active set");
                    None
                }
            }
        } else {
            None
        };

        let mut map = HashMap::with_capacity(validators.len());
        for validator in validators {
            let cons_address = consensus_address(&validator.consensus_pubkey);
            let bonded = validator.status == BOND_STATUS_BONDED;

            // Bulk signing infos can miss a freshly bonded validator; fall
            // back to the single-address query before giving up.
            let info = match infos.remove(&cons_address) {
                Some(info) => Some(info),
                None if bonded => {
                    match hex_to_bech32(&self.config.chain.valcons_prefix(), &cons_address) {
                        Ok(valcons) => match self.rpc.get_signing_info(&valcons).await {
                            Ok(info) => Some(info),
                            Err(e) => {
                                debug!(valcons = %valcons, error = %e, "no signing info for validator");
                                None
                            }
                        },
                        Err(e) => {
                            debug!(cons_address = %cons_address, error = %e, "could not encode valcons");
                            None
                        }
                    }
                }
                None => None,
            };

            map.insert(
                validator.operator_address.clone(),
                Validator {
                    operator_address: validator.operator_address,
                    consensus_address: cons_address.clone(),
                    moniker: validator.moniker,
                    jailed: validator.jailed,
                    tombstoned: info.as_ref().map(|i| i.tombstoned).unwrap_or(false),
                    active: bonded,
                    signatory: active_set
                        .as_ref()
                        .map(|set| set.contains(&cons_address))
                        .unwrap_or(bonded),
                    consensus_pubkey: validator.consensus_pubkey,
                    missed_blocks_counter: info
                        .as_ref()
                        .map(|i| i.missed_blocks_counter)
                        .unwrap_or(0),
                },
            );
        }

        info!(validators = map.len(), "refreshed validator set");
        self.manager.set_validators(map);
        self.manager.set_slashing_params(SlashingParams {
            signed_blocks_window: params.signed_blocks_window,
            min_signed_per_window: params.min_signed_per_window,
        });
        Ok(())
    }
}

/// Decode a bech32 address into the upper-hex form block signatures use.
fn bech32_to_hex(address: &str) -> Result<String, bech32::Error> {
    let (_hrp, data, _variant) = bech32::decode(address)?;
    let bytes = Vec::<u8>::from_base32(&data)?;
    Ok(hex::encode_upper(bytes))
}

/// Encode an upper-hex consensus address as bech32 with the given prefix.
fn hex_to_bech32(prefix: &str, hex_address: &str) -> Result<String, bech32::Error> {
    let bytes =
        hex::decode(hex_address).map_err(|_| bech32::Error::InvalidData(0))?;
    bech32::encode(prefix, bytes.to_base32(), Variant::Bech32)
}
