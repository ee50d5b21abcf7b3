//! Remote key-value store client
//!
//! Speaks the Redis-over-REST protocol: each request posts a JSON command
//! array to the store endpoint with a bearer token, and the response wraps
//! the reply in a `{"result": …}` envelope.

use async_trait::async_trait;
use mailgate_common::{config::StoreConfig, Error, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Key-value store operations used by the repositories
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a string value; `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a string value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a key; absent keys are not an error
    async fn del(&self, key: &str) -> Result<()>;

    /// Add a member to a string set
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;

    /// Remove a member from a string set; absent members are not an error
    async fn srem(&self, key: &str, member: &str) -> Result<()>;

    /// Read all members of a string set
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
}

/// Reply envelope returned by the store
#[derive(Debug, Deserialize)]
struct KvReply {
    result: Option<Value>,
    error: Option<String>,
}

/// Client for the remote key-value store
pub struct KvClient {
    url: String,
    token: String,
    client: Client,
}

impl KvClient {
    /// Create a new store client
    pub fn new(config: &StoreConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        }
    }

    /// Execute one command against the store
    async fn command(&self, cmd: &[&str]) -> Result<Value> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&cmd)
            .send()
            .await
            .map_err(|e| Error::Store(format!("store request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("store command {} failed: {} - {}", cmd[0], status, body);
            return Err(Error::Store(format!(
                "store returned {} for {}",
                status, cmd[0]
            )));
        }

        let reply: KvReply = response
            .json()
            .await
            .map_err(|e| Error::Store(format!("failed to parse store reply: {}", e)))?;

        if let Some(error) = reply.error {
            return Err(Error::Store(format!("store error for {}: {}", cmd[0], error)));
        }

        debug!("store command {} ok", cmd[0]);
        Ok(reply.result.unwrap_or(Value::Null))
    }

    /// Round-trip the store for readiness checks
    pub async fn ping(&self) -> Result<()> {
        self.command(&["PING"]).await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for KvClient {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.command(&["GET", key]).await? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Err(Error::Store(format!(
                "unexpected GET reply shape: {}",
                other
            ))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.command(&["SET", key, value]).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.command(&["DEL", key]).await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.command(&["SADD", key, member]).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        self.command(&["SREM", key, member]).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        match self.command(&["SMEMBERS", key]).await? {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    other => Err(Error::Store(format!(
                        "unexpected SMEMBERS member shape: {}",
                        other
                    ))),
                })
                .collect(),
            other => Err(Error::Store(format!(
                "unexpected SMEMBERS reply shape: {}",
                other
            ))),
        }
    }
}
