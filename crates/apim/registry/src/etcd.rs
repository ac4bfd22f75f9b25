//! etcd v3 store over the gRPC JSON gateway
//!
//! Keys and values travel base64-encoded; 64-bit counters come back as JSON
//! strings. Prefix operations use the conventional `range_end` computed by
//! incrementing the last byte of the prefix.

use crate::error::StoreError;
use crate::store::{KeyValue, KvConnector, KvStore};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
struct RangeRequest {
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    range_end: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutRequest {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<EncodedKeyValue>,
}

#[derive(Debug, Deserialize)]
struct EncodedKeyValue {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct DeleteRangeResponse {
    #[serde(default)]
    deleted: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {}

/// etcd-backed store
pub struct EtcdKvStore {
    client: reqwest::Client,
    endpoint: String,
}

impl EtcdKvStore {
    /// `endpoint` is the gateway base URL, e.g. `http://127.0.0.1:2379`
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    async fn call<B, T>(&self, path: &str, body: &B) -> Result<T, StoreError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}/v3/kv/{}", self.endpoint, path);
        debug!(url = %url, "etcd request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected(format!("status={status}: {body}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Protocol(e.to_string()))
    }
}

fn map_transport_error(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout(err.to_string())
    } else {
        StoreError::Connection(err.to_string())
    }
}

fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn decode(field: &str, value: &str) -> Result<Vec<u8>, StoreError> {
    STANDARD
        .decode(value)
        .map_err(|e| StoreError::Protocol(format!("invalid base64 in {field}: {e}")))
}

/// Smallest key greater than every key starting with `prefix`
fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    // All bytes were 0xff: scan to the end of the keyspace
    vec![0]
}

fn prefix_request(prefix: &str) -> RangeRequest {
    RangeRequest {
        key: encode(prefix.as_bytes()),
        range_end: Some(encode(&prefix_range_end(prefix.as_bytes()))),
    }
}

#[async_trait]
impl KvStore for EtcdKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let request = RangeRequest {
            key: encode(key.as_bytes()),
            range_end: None,
        };
        let response: RangeResponse = self.call("range", &request).await?;
        response
            .kvs
            .into_iter()
            .next()
            .map(|kv| decode("value", &kv.value))
            .transpose()
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let request = PutRequest {
            key: encode(key.as_bytes()),
            value: encode(&value),
        };
        let _: PutResponse = self.call("put", &request).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let request = RangeRequest {
            key: encode(key.as_bytes()),
            range_end: None,
        };
        let response: DeleteRangeResponse = self.call("deleterange", &request).await?;
        Ok(parse_count(response.deleted)? > 0)
    }

    async fn range(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let response: RangeResponse = self.call("range", &prefix_request(prefix)).await?;
        let mut entries = response
            .kvs
            .into_iter()
            .map(|kv| {
                let key = String::from_utf8(decode("key", &kv.key)?)
                    .map_err(|e| StoreError::Protocol(format!("non utf-8 key: {e}")))?;
                Ok(KeyValue {
                    key,
                    value: decode("value", &kv.value)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn delete_range(&self, prefix: &str) -> Result<u64, StoreError> {
        let response: DeleteRangeResponse =
            self.call("deleterange", &prefix_request(prefix)).await?;
        parse_count(response.deleted)
    }

    fn name(&self) -> &str {
        "etcd"
    }
}

fn parse_count(raw: Option<String>) -> Result<u64, StoreError> {
    match raw {
        None => Ok(0),
        Some(raw) => raw
            .parse()
            .map_err(|_| StoreError::Protocol(format!("invalid count: {raw}"))),
    }
}

/// Opens a fresh etcd client per connection
#[derive(Debug, Clone)]
pub struct EtcdConnector {
    endpoint: String,
    timeout: Duration,
}

impl EtcdConnector {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

impl KvConnector for EtcdConnector {
    fn connect(&self) -> Result<Arc<dyn KvStore>, StoreError> {
        Ok(Arc::new(EtcdKvStore::new(self.endpoint.clone(), self.timeout)?))
    }
}
