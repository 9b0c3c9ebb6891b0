//! HTTP query layer with shuffled failover across the endpoint pool.
//!
//! Every logical query walks the endpoints in a fresh random order and
//! returns the first response that both decodes and passes the caller's
//! validity predicate — a 200 from a lagging node can still carry a
//! nonsense payload, and the predicate is how the caller rejects it. Only
//! when every endpoint fails does the caller see an error, aggregating
//! each endpoint's reason in configuration order.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::seq::SliceRandom;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use blockwatch_core::types::Block;
use blockwatch_metrics::Metrics;

use crate::codec::{
    PageRequest, QueryParamsRequest, QueryParamsResponse, QuerySigningInfoRequest,
    QuerySigningInfoResponse, QuerySigningInfosRequest, QuerySigningInfosResponse,
    QueryValidatorsRequest, QueryValidatorsResponse, SigningInfo, SlashingParamsInfo,
    ValidatorInfo,
};
use crate::error::{EndpointFailure, RpcError};
use crate::wire::{AbciQueryResponse, SingleBlockResponse, ValidatorsResponse};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const USER_AGENT: &str = "blockwatch";

/// Single page limit for the bulk staking/slashing queries. Chains with
/// more validators than this truncate.
const QUERY_PAGE_LIMIT: u64 = 1000;
/// Page size of the historical `/validators` endpoint.
const ACTIVE_SET_PAGE_SIZE: usize = 100;

/// One GET against one endpoint. The seam exists so failover logic is
/// testable without a live node.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, RpcError>;
}

/// Production fetcher backed by `reqwest`.
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RpcError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String, RpcError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RpcError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Http(format!("HTTP {}", status.as_u16())));
        }

        response
            .text()
            .await
            .map_err(|e| RpcError::Http(e.to_string()))
    }
}

/// Failover query client over the configured endpoint pool.
pub struct RpcClient {
    chain: String,
    endpoints: Vec<String>,
    fetcher: Arc<dyn HttpFetcher>,
    metrics: Arc<Metrics>,
}

impl RpcClient {
    pub fn new(
        chain: impl Into<String>,
        endpoints: Vec<String>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, RpcError> {
        Ok(Self::with_fetcher(
            chain,
            endpoints,
            Arc::new(ReqwestFetcher::new()?),
            metrics,
        ))
    }

    pub fn with_fetcher(
        chain: impl Into<String>,
        endpoints: Vec<String>,
        fetcher: Arc<dyn HttpFetcher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            chain: chain.into(),
            endpoints,
            fetcher,
            metrics,
        }
    }

    /// Walk the endpoints in random order until one returns a response
    /// that decodes into `T` and satisfies `predicate`.
    pub async fn get<T, P>(
        &self,
        path: &str,
        query_type: &str,
        predicate: P,
    ) -> Result<T, RpcError>
    where
        T: DeserializeOwned,
        P: Fn(&T) -> Result<(), String> + Send + Sync,
    {
        let mut failures: Vec<Option<String>> = vec![None; self.endpoints.len()];
        let indexes = {
            let mut indexes: Vec<usize> = (0..self.endpoints.len()).collect();
            indexes.shuffle(&mut rand::thread_rng());
            indexes
        };

        for index in indexes {
            let endpoint = &self.endpoints[index];
            let url = format!("{endpoint}{path}");
            debug!(url = %url, query_type, "trying RPC endpoint");

            let start = Instant::now();
            let body = match self.fetcher.fetch(&url).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(url = %url, error = %e, "RPC request failed");
                    self.record(endpoint, query_type, false, start.elapsed());
                    failures[index] = Some(e.to_string());
                    continue;
                }
            };
            self.record(endpoint, query_type, true, start.elapsed());

            let decoded: T = match serde_json::from_str(&body) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(url = %url, error = %e, "RPC response failed to decode");
                    failures[index] = Some(format!("deserialization error: {e}"));
                    continue;
                }
            };

            if let Err(reason) = predicate(&decoded) {
                warn!(url = %url, reason = %reason, "RPC precondition failed");
                failures[index] = Some(format!("precondition failed: {reason}"));
                continue;
            }

            return Ok(decoded);
        }

        warn!(path, query_type, "all RPC endpoints failed");
        Err(RpcError::AllEndpointsFailed(
            self.endpoints
                .iter()
                .zip(failures)
                .map(|(endpoint, reason)| EndpointFailure {
                    endpoint: endpoint.clone(),
                    reason: reason.unwrap_or_else(|| "not attempted".into()),
                })
                .collect(),
        ))
    }

    fn record(&self, endpoint: &str, query_type: &str, success: bool, elapsed: Duration) {
        self.metrics
            .record_rpc_query(&self.chain, endpoint, query_type, success, elapsed);
    }

    // ─── Plain REST queries ──────────────────────────────────────────────────

    /// Fetch a single block, or the latest when `height` is `None`.
    pub async fn get_block(&self, height: Option<i64>) -> Result<Block, RpcError> {
        let path = match height {
            Some(height) => format!("/block?height={height}"),
            None => "/block".to_string(),
        };

        let response: SingleBlockResponse = self
            .get(&path, "block", |r: &SingleBlockResponse| {
                if r.result.block.header.height.is_empty() {
                    return Err("malformed block: empty height".into());
                }
                Ok(())
            })
            .await?;

        response.result.block.to_block()
    }

    /// Consensus addresses bonded at `height`, via the paginated
    /// `/validators` endpoint.
    pub async fn get_active_set_at_block(
        &self,
        height: i64,
    ) -> Result<HashSet<String>, RpcError> {
        let mut active_set = HashSet::new();
        let mut page = 1usize;

        loop {
            let path = format!(
                "/validators?height={height}&per_page={ACTIVE_SET_PAGE_SIZE}&page={page}"
            );
            let response: ValidatorsResponse = self
                .get(&path, "historical_validators", |r: &ValidatorsResponse| {
                    if r.result.validators.is_empty() {
                        return Err("malformed active set: got 0 validators".into());
                    }
                    Ok(())
                })
                .await?;

            let returned = response.result.validators.len();
            for validator in response.result.validators {
                active_set.insert(validator.address);
            }

            if returned <= ACTIVE_SET_PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(active_set)
    }

    // ─── ABCI queries ────────────────────────────────────────────────────────

    /// Issue `/abci_query` for `method` with a protobuf-encoded request,
    /// returning the decoded inner payload.
    pub async fn abci_query(
        &self,
        method: &str,
        data: &[u8],
        query_type: &str,
    ) -> Result<Vec<u8>, RpcError> {
        let path = format!(
            "/abci_query?path={}&data=0x{}",
            query_escape(&format!("\"{method}\"")),
            hex::encode(data),
        );

        let response: AbciQueryResponse = self
            .get(&path, &format!("abci_{query_type}"), |r: &AbciQueryResponse| {
                if r.result.response.code != 0 {
                    return Err(format!(
                        "ABCI query failed with code {}: {}",
                        r.result.response.code, r.result.response.log
                    ));
                }
                Ok(())
            })
            .await?;

        let value = response.result.response.value.unwrap_or_default();
        BASE64
            .decode(value)
            .map_err(|e| RpcError::Codec(format!("invalid base64 payload: {e}")))
    }

    /// Full validator set (single page; >1000 validators truncates).
    pub async fn get_validators(&self) -> Result<Vec<ValidatorInfo>, RpcError> {
        let request = QueryValidatorsRequest {
            status: String::new(),
            pagination: PageRequest {
                limit: QUERY_PAGE_LIMIT,
            },
        };
        let payload = self
            .abci_query(
                "/cosmos.staking.v1beta1.Query/Validators",
                &request.encode(),
                "validators",
            )
            .await?;
        Ok(QueryValidatorsResponse::decode(&payload)?.validators)
    }

    /// All signing infos (single page; same truncation caveat).
    pub async fn get_signing_infos(&self) -> Result<Vec<SigningInfo>, RpcError> {
        let request = QuerySigningInfosRequest {
            pagination: PageRequest {
                limit: QUERY_PAGE_LIMIT,
            },
        };
        let payload = self
            .abci_query(
                "/cosmos.slashing.v1beta1.Query/SigningInfos",
                &request.encode(),
                "signing_infos",
            )
            .await?;
        Ok(QuerySigningInfosResponse::decode(&payload)?.info)
    }

    /// Signing info of a single consensus address.
    pub async fn get_signing_info(&self, cons_address: &str) -> Result<SigningInfo, RpcError> {
        let request = QuerySigningInfoRequest {
            cons_address: cons_address.to_string(),
        };
        let payload = self
            .abci_query(
                "/cosmos.slashing.v1beta1.Query/SigningInfo",
                &request.encode(),
                "signing_info",
            )
            .await?;
        Ok(QuerySigningInfoResponse::decode(&payload)?.val_signing_info)
    }

    /// Downtime slashing parameters.
    pub async fn get_slashing_params(&self) -> Result<SlashingParamsInfo, RpcError> {
        let payload = self
            .abci_query(
                "/cosmos.slashing.v1beta1.Query/Params",
                &QueryParamsRequest.encode(),
                "slashing_params",
            )
            .await?;
        Ok(QueryParamsResponse::decode(&payload)?.params)
    }
}

/// Percent-encode a query component (RFC 3986 unreserved set).
fn query_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Mock keyed by endpoint prefix; unknown endpoints refuse connections.
    struct MockFetcher {
        responses: HashMap<String, Result<String, String>>,
    }

    impl MockFetcher {
        fn new(responses: Vec<(&str, Result<&str, &str>)>) -> Self {
            Self {
                responses: responses
                    .into_iter()
                    .map(|(endpoint, result)| {
                        (
                            endpoint.to_string(),
                            result.map(String::from).map_err(String::from),
                        )
                    })
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl HttpFetcher for MockFetcher {
        async fn fetch(&self, url: &str) -> Result<String, RpcError> {
            for (endpoint, result) in &self.responses {
                if url.starts_with(endpoint.as_str()) {
                    return result.clone().map_err(RpcError::Http);
                }
            }
            Err(RpcError::Http("connection refused".into()))
        }
    }

    fn client(
        endpoints: &[&str],
        fetcher: MockFetcher,
    ) -> RpcClient {
        RpcClient::with_fetcher(
            "testchain",
            endpoints.iter().map(|s| s.to_string()).collect(),
            Arc::new(fetcher),
            Arc::new(Metrics::new().unwrap()),
        )
    }

    const GOOD_BLOCK: &str = r#"{"result":{"block":{"header":{"height":"42","time":"2026-07-01T12:00:00Z","proposer_address":"PP"},"last_commit":{"signatures":[]}}}}"#;
    const EMPTY_HEIGHT_BLOCK: &str = r#"{"result":{"block":{"header":{"height":"","time":"2026-07-01T12:00:00Z","proposer_address":"PP"},"last_commit":{"signatures":[]}}}}"#;

    #[tokio::test]
    async fn single_valid_endpoint_wins() {
        let fetcher = MockFetcher::new(vec![
            ("https://rpc-a", Err("connection refused")),
            ("https://rpc-b", Ok(GOOD_BLOCK)),
            ("https://rpc-c", Ok("not json at all")),
        ]);
        let client = client(&["https://rpc-a", "https://rpc-b", "https://rpc-c"], fetcher);

        let block = client.get_block(Some(42)).await.unwrap();
        assert_eq!(block.height, 42);
        assert_eq!(block.proposer, "PP");
    }

    #[tokio::test]
    async fn predicate_rejection_is_an_endpoint_failure() {
        let fetcher = MockFetcher::new(vec![("https://rpc-a", Ok(EMPTY_HEIGHT_BLOCK))]);
        let client = client(&["https://rpc-a"], fetcher);

        let err = client.get_block(None).await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("https://rpc-a"));
        assert!(text.contains("precondition failed"));
    }

    #[tokio::test]
    async fn all_endpoints_failed_lists_reasons_in_config_order() {
        let fetcher = MockFetcher::new(vec![
            ("https://rpc-a", Err("connection refused")),
            ("https://rpc-b", Ok("garbage")),
            ("https://rpc-c", Err("HTTP 503")),
        ]);
        let client = client(&["https://rpc-a", "https://rpc-b", "https://rpc-c"], fetcher);

        let err = client.get_block(None).await.unwrap_err();
        let text = err.to_string();
        let a = text.find("https://rpc-a").unwrap();
        let b = text.find("https://rpc-b").unwrap();
        let c = text.find("https://rpc-c").unwrap();
        assert!(a < b && b < c, "order not preserved: {text}");
        assert!(text.contains("connection refused"));
        assert!(text.contains("deserialization error"));
        assert!(text.contains("HTTP 503"));
    }

    #[tokio::test]
    async fn active_set_accumulates_addresses() {
        let body = r#"{"result":{"validators":[{"address":"AAAA"},{"address":"BBBB"}]}}"#;
        let fetcher = MockFetcher::new(vec![("https://rpc-a", Ok(body))]);
        let client = client(&["https://rpc-a"], fetcher);

        let set = client.get_active_set_at_block(100).await.unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains("AAAA"));
        assert!(set.contains("BBBB"));
    }

    #[tokio::test]
    async fn empty_active_set_fails_predicate() {
        let body = r#"{"result":{"validators":[]}}"#;
        let fetcher = MockFetcher::new(vec![("https://rpc-a", Ok(body))]);
        let client = client(&["https://rpc-a"], fetcher);

        assert!(client.get_active_set_at_block(100).await.is_err());
    }

    #[tokio::test]
    async fn abci_query_decodes_base64_payload() {
        // Params response: params { signed_blocks_window = 10000,
        // min_signed_per_window = "50000000000000000" } encoded by the
        // same codec, wrapped in the JSON envelope as base64.
        let inner = {
            let mut params = Vec::new();
            params.extend_from_slice(&[0x08, 0x90, 0x4E]); // field 1, 10000
            let mantissa = b"50000000000000000";
            params.push(0x12);
            params.push(mantissa.len() as u8);
            params.extend_from_slice(mantissa);
            let mut body = vec![0x0A, params.len() as u8];
            body.extend_from_slice(&params);
            body
        };
        let envelope = format!(
            r#"{{"result":{{"response":{{"code":0,"log":"","value":"{}"}}}}}}"#,
            BASE64.encode(&inner),
        );
        let fetcher = MockFetcher::new(vec![("https://rpc-a", Ok(envelope.as_str()))]);
        let client = client(&["https://rpc-a"], fetcher);

        let params = client.get_slashing_params().await.unwrap();
        assert_eq!(params.signed_blocks_window, 10_000);
        assert!((params.min_signed_per_window - 0.05).abs() < 1e-12);
    }

    #[tokio::test]
    async fn abci_error_code_fails_predicate() {
        let envelope = r#"{"result":{"response":{"code":6,"log":"unknown query path","value":null}}}"#;
        let fetcher = MockFetcher::new(vec![("https://rpc-a", Ok(envelope))]);
        let client = client(&["https://rpc-a"], fetcher);

        let err = client.get_slashing_params().await.unwrap_err();
        assert!(err.to_string().contains("unknown query path"));
    }

    #[test]
    fn query_escape_quotes_and_slashes() {
        assert_eq!(
            query_escape("\"/cosmos.staking.v1beta1.Query/Validators\""),
            "%22%2Fcosmos.staking.v1beta1.Query%2FValidators%22",
        );
    }
}
