//! Bitquery Discovery Client
//!
//! Runs the feed's GraphQL query against the Bitquery streaming endpoint
//! and flattens the nested response into flat candidate records.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use super::queries::{query_for, QUOTE_MINTS};
use crate::domain::Feed;
use crate::ports::{DiscoveryError, DiscoveryQuery, DiscoverySource};

pub const DEFAULT_ENDPOINT: &str = "https://streaming.bitquery.io/graphql";

/// Configuration for the BitqueryDiscovery client
#[derive(Debug, Clone)]
pub struct BitqueryConfig {
    /// GraphQL endpoint URL
    pub endpoint: String,
    /// OAuth bearer token
    pub api_key: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for BitqueryConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Discovery source backed by Bitquery GraphQL, one instance per feed
#[derive(Debug, Clone)]
pub struct BitqueryDiscovery {
    feed: Feed,
    config: BitqueryConfig,
    http: Client,
}

impl BitqueryDiscovery {
    pub fn new(feed: Feed, config: BitqueryConfig) -> Result<Self, DiscoveryError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DiscoveryError::Transport(e.to_string()))?;

        Ok(Self { feed, config, http })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Request body for one query
    pub fn request_body(&self, query: &DiscoveryQuery) -> Value {
        json!({
            "query": query_for(self.feed),
            "variables": {
                "since": query.since_iso(),
                "limit": query.limit,
            }
        })
    }
}

#[async_trait]
impl DiscoverySource for BitqueryDiscovery {
    fn feed(&self) -> Feed {
        self.feed
    }

    async fn fetch_raw(&self, query: &DiscoveryQuery) -> Result<Vec<Value>, DiscoveryError> {
        if self.config.api_key.is_empty() {
            return Err(DiscoveryError::NotConfigured(
                "Bitquery API key is empty (set BITQUERY_API_KEY)".into(),
            ));
        }

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(query))
            .send()
            .await
            .map_err(|e| DiscoveryError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DiscoveryError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(DiscoveryError::Status {
                status: status.as_u16(),
                body: truncate(&text, 200),
            });
        }

        let body: Value = serde_json::from_str(&text)
            .map_err(|e| DiscoveryError::ParseError(format!("Failed to parse JSON: {}", e)))?;

        flatten_response(self.feed, &body)
    }
}

/// Flatten a GraphQL response body into one flat record per token
pub fn flatten_response(feed: Feed, body: &Value) -> Result<Vec<Value>, DiscoveryError> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages: Vec<&str> = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .collect();
            return Err(DiscoveryError::Upstream(messages.join("; ")));
        }
    }

    let solana = body
        .pointer("/data/Solana")
        .ok_or_else(|| DiscoveryError::ParseError("Response missing data.Solana".into()))?;

    let records = match feed {
        Feed::NewTokens => rows(solana, "TokenSupplyUpdates")
            .iter()
            .map(flatten_new_token)
            .collect(),
        Feed::Graduated => rows(solana, "Instructions")
            .iter()
            .flat_map(flatten_migration)
            .collect(),
        Feed::Trending => rows(solana, "DEXTradeByTokens")
            .iter()
            .map(flatten_trending)
            .collect(),
    };

    Ok(records)
}

fn rows<'a>(solana: &'a Value, key: &str) -> &'a [Value] {
    solana
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn flatten_new_token(row: &Value) -> Value {
    let mut out = Map::new();
    copy(&mut out, "mint", row.pointer("/TokenSupplyUpdate/Currency/MintAddress"));
    copy(&mut out, "name", row.pointer("/TokenSupplyUpdate/Currency/Name"));
    copy(&mut out, "symbol", row.pointer("/TokenSupplyUpdate/Currency/Symbol"));
    copy(&mut out, "supply", row.pointer("/TokenSupplyUpdate/PostBalance"));
    copy(&mut out, "created_at", row.pointer("/Block/Time"));
    copy(&mut out, "deployer", row.pointer("/Transaction/Signer"));
    copy(&mut out, "update_authority", row.pointer("/TokenSupplyUpdate/Currency/UpdateAuthority"));
    Value::Object(out)
}

/// A migration touches several token accounts; each distinct non-quote mint is a record
fn flatten_migration(row: &Value) -> Vec<Value> {
    let created_at = row.pointer("/Block/Time");
    let mut mints: Vec<&str> = Vec::new();

    for account in row
        .pointer("/Instruction/Accounts")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
    {
        if let Some(mint) = account.pointer("/Token/Mint").and_then(Value::as_str) {
            if !mint.is_empty() && !QUOTE_MINTS.contains(&mint) && !mints.contains(&mint) {
                mints.push(mint);
            }
        }
    }

    mints
        .into_iter()
        .map(|mint| {
            let mut out = Map::new();
            out.insert("mint".into(), Value::String(mint.to_string()));
            copy(&mut out, "created_at", created_at);
            Value::Object(out)
        })
        .collect()
}

fn flatten_trending(row: &Value) -> Value {
    let mut out = Map::new();
    copy(&mut out, "mint", row.pointer("/Trade/Currency/MintAddress"));
    copy(&mut out, "name", row.pointer("/Trade/Currency/Name"));
    copy(&mut out, "symbol", row.pointer("/Trade/Currency/Symbol"));
    copy(&mut out, "price_usd", row.pointer("/Trade/price"));
    copy(&mut out, "volume_24h", row.get("volume"));
    copy(&mut out, "buy_count_24h", row.get("buys"));
    Value::Object(out)
}

fn copy(out: &mut Map<String, Value>, key: &str, value: Option<&Value>) {
    if let Some(v) = value.filter(|v| !v.is_null()) {
        out.insert(key.to_string(), v.clone());
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
