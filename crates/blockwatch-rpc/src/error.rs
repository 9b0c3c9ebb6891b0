//! Transport-level error types.

use thiserror::Error;

/// One endpoint's failure inside a failover round.
#[derive(Debug, Clone)]
pub struct EndpointFailure {
    pub endpoint: String,
    pub reason: String,
}

/// Errors that can occur while querying the RPC cluster.
#[derive(Debug, Error)]
pub enum RpcError {
    /// HTTP request failed (connection refused, timeout, non-2xx).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Response body could not be decoded into the target shape.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Response decoded but failed the caller's validity predicate.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// ABCI envelope or protobuf payload could not be decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Websocket connection/send/receive error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Every endpoint in the pool failed; reasons preserved in
    /// configuration order.
    #[error("{}", format_failures(.0))]
    AllEndpointsFailed(Vec<EndpointFailure>),
}

fn format_failures(failures: &[EndpointFailure]) -> String {
    let mut out = String::from("all RPC endpoints failed:\n");
    for (index, failure) in failures.iter().enumerate() {
        out.push_str(&format!(
            "#{}: {} -> {}\n",
            index + 1,
            failure.endpoint,
            failure.reason
        ));
    }
    out
}
