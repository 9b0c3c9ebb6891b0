//! blockwatch-rpc — chain-facing transports for blockwatch.
//!
//! Two independent paths into the chain's RPC cluster:
//!
//! - **Websocket ingestion** ([`ws_client`], [`ws_manager`]): one
//!   subscriber per endpoint, fanned into a single deduplicated channel of
//!   new-block events ([`queue`]).
//! - **HTTP queries** ([`http`]): shuffled failover across the same
//!   endpoints with per-response validity predicates, including the ABCI
//!   query path ([`codec`] carries the protobuf wire shapes).

pub mod codec;
pub mod error;
pub mod http;
pub mod queue;
pub mod wire;
pub mod ws_client;
pub mod ws_manager;

pub use error::{EndpointFailure, RpcError};
pub use http::RpcClient;
pub use queue::DedupQueue;
pub use ws_client::{WsClient, WsClientConfig, WsEmittable};
pub use ws_manager::WsManager;

/// Subscription query for new-block events.
pub const NEW_BLOCKS_QUERY: &str = "tm.event='NewBlock'";
