//! JSON-RPC batch transport (§4.A).
//!
//! Built directly on `reqwest` + `serde_json`, not `alloy::providers::Provider`,
//! because the provider abstraction hides the per-request correlation ids the
//! Block Harvester needs and does not expose batch-level failure separately
//! from per-element `error` fields. The request/response wrapper shapes are
//! grounded on `megaeth-rpc`'s `JsonRpcRequest`/`JsonRpcResponse` types, widened
//! here to carry a whole batch per HTTP call instead of one request at a time.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug_span, Instrument};

use crate::error::TransportError;
use crate::metrics::rpc as rpc_metrics;

#[derive(Debug, Clone, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: String,
    params: Value,
    id: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObj>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcErrorObj {
    pub code: i64,
    pub message: String,
}

/// Either an array of responses, or a single response object (some servers
/// de-array a one-element batch).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBody {
    Array(Vec<JsonRpcResponse>),
    Single(JsonRpcResponse),
}

/// One call to issue as part of a batch; `tag` is an opaque correlation value
/// threaded back to the caller in the matching [`BatchElementResult`]
/// regardless of how responses are ordered or partitioned.
pub struct BatchCall<T> {
    pub method: &'static str,
    pub params: Value,
    pub tag: T,
}

/// The per-element outcome of a batch call: either a decoded result or a
/// JSON-RPC error object. Transport-level failures (non-2xx, malformed body)
/// are not represented here — they fail the whole batch via `Err`.
pub struct BatchElementResult<T> {
    pub tag: T,
    pub outcome: Result<Value, JsonRpcErrorObj>,
}

/// A batch JSON-RPC client for a single chain endpoint.
pub struct RpcTransport {
    client: reqwest::Client,
    url: String,
    chain: String,
    next_id: AtomicU64,
}

impl RpcTransport {
    pub fn new(chain: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            chain: chain.into(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Send one logical batch of calls in a single HTTP POST. On success,
    /// returns one [`BatchElementResult`] per input call, in the same order
    /// as `calls` regardless of the order the server responded in.
    ///
    /// A non-2xx response or a body that fails to parse as JSON-RPC fails the
    /// *entire* batch.
    pub async fn send_batch<T>(
        &self,
        method_label: &str,
        calls: Vec<BatchCall<T>>,
    ) -> Result<Vec<BatchElementResult<T>>, TransportError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let span = debug_span!("rpc_batch", chain = %self.chain, method = %method_label, batch_len = calls.len());
        async move {
            let _in_flight = rpc_metrics::InFlightGuard::new(&self.chain);
            let timer = rpc_metrics::time_rpc_request(&self.chain, method_label);

            let mut tags = Vec::with_capacity(calls.len());
            let requests: Vec<JsonRpcRequest> = calls
                .into_iter()
                .map(|call| {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    tags.push((id, call.tag));
                    JsonRpcRequest { jsonrpc: "2.0", method: call.method.to_string(), params: call.params, id }
                })
                .collect();

            let result = self.post(&requests).await;
            let elapsed = timer.stop();
            rpc_metrics::record_rpc_request(&self.chain, method_label, result.is_ok(), elapsed);

            let bodies = result?;
            Self::correlate(bodies, tags)
        }
        .instrument(span)
        .await
    }

    async fn post(&self, requests: &[JsonRpcRequest]) -> Result<Vec<JsonRpcResponse>, TransportError> {
        let response = self.client.post(&self.url).json(requests).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::MalformedResponse(format!(
                "http status {status}: {body}"
            )));
        }

        let body: RawBody = response
            .json()
            .await
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;

        Ok(match body {
            RawBody::Array(responses) => responses,
            RawBody::Single(response) => vec![response],
        })
    }

    fn correlate<T>(
        bodies: Vec<JsonRpcResponse>,
        mut tags: Vec<(u64, T)>,
    ) -> Result<Vec<BatchElementResult<T>>, TransportError> {
        let mut results = Vec::with_capacity(tags.len());

        for body in bodies {
            let id = body.id.ok_or_else(|| {
                TransportError::MalformedResponse("response missing id field".to_string())
            })?;
            let pos = tags
                .iter()
                .position(|(tag_id, _)| *tag_id == id)
                .ok_or(TransportError::UncorrelatedResponse { got: id as i64 })?;
            let (_, tag) = tags.remove(pos);

            let outcome = match (body.result, body.error) {
                (Some(result), None) => Ok(result),
                (_, Some(error)) => Err(error),
                (None, None) => Ok(Value::Null),
            };
            results.push(BatchElementResult { tag, outcome });
        }

        if !tags.is_empty() {
            return Err(TransportError::MalformedResponse(format!(
                "batch response missing {} of the expected elements",
                tags.len()
            )));
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn correlates_array_response_regardless_of_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"jsonrpc":"2.0","id":1,"result":"0xb"},
                {"jsonrpc":"2.0","id":0,"result":"0xa"},
            ])))
            .mount(&server)
            .await;

        let transport = RpcTransport::new("test-chain", server.uri());
        let calls = vec![
            BatchCall { method: "eth_getBlockByNumber", params: json!(["0x0", true]), tag: "first" },
            BatchCall { method: "eth_getBlockByNumber", params: json!(["0x1", true]), tag: "second" },
        ];

        let results = transport.send_batch("eth_getBlockByNumber", calls).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tag, "first");
        assert_eq!(results[0].outcome.as_ref().unwrap(), &json!("0xa"));
        assert_eq!(results[1].tag, "second");
        assert_eq!(results[1].outcome.as_ref().unwrap(), &json!("0xb"));
    }

    #[tokio::test]
    async fn single_element_batch_may_dearray() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc":"2.0","id":0,"result":"0xa"
            })))
            .mount(&server)
            .await;

        let transport = RpcTransport::new("test-chain", server.uri());
        let calls = vec![BatchCall { method: "eth_blockNumber", params: json!([]), tag: () }];
        let results = transport.send_batch("eth_blockNumber", calls).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome.as_ref().unwrap(), &json!("0xa"));
    }

    #[tokio::test]
    async fn per_element_error_does_not_fail_the_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"jsonrpc":"2.0","id":0,"result":"0xa"},
                {"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"not found"}},
            ])))
            .mount(&server)
            .await;

        let transport = RpcTransport::new("test-chain", server.uri());
        let calls = vec![
            BatchCall { method: "eth_getTransactionReceipt", params: json!(["0x1"]), tag: 0u32 },
            BatchCall { method: "eth_getTransactionReceipt", params: json!(["0x2"]), tag: 1u32 },
        ];

        let results = transport.send_batch("eth_getTransactionReceipt", calls).await.unwrap();
        assert!(results[0].outcome.is_ok());
        assert!(results[1].outcome.is_err());
    }

    #[tokio::test]
    async fn non_2xx_fails_the_whole_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let transport = RpcTransport::new("test-chain", server.uri());
        let calls = vec![BatchCall { method: "eth_blockNumber", params: json!([]), tag: () }];
        let result = transport.send_batch("eth_blockNumber", calls).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let transport = RpcTransport::new("test-chain", "http://127.0.0.1:1");
        let calls: Vec<BatchCall<()>> = Vec::new();
        let results = transport.send_batch("eth_blockNumber", calls).await.unwrap();
        assert!(results.is_empty());
    }
}
