//! Backends the sys-call handler forwards to.
//!
//! The database, the outbound HTTP client, and the skill pipeline are
//! external collaborators; these traits are the exact surface the core
//! consumes from them. The orchestrator implements [`SkillInvoker`] so the
//! handler can re-enter the skill pipeline without a construction-time cycle.

use async_trait::async_trait;
use frontclaw_contract::ErrorObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Options for `db.getItems`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DbQueryOptions {
    #[serde(rename = "where")]
    pub where_clause: Option<HashMap<String, Value>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Row store surface.
#[async_trait]
pub trait DbBackend: Send + Sync {
    /// Run a single validated statement with positional parameters.
    async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Value, ErrorObject>;

    async fn get_items(&self, table: &str, options: DbQueryOptions) -> Result<Value, ErrorObject>;

    async fn get_item(&self, table: &str, id: &Value) -> Result<Value, ErrorObject>;
}

/// Request shape of the `network.fetch` sys-call.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Response handed back to the plugin: status line, flattened headers, body
/// text.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResponse {
    pub status: u16,
    #[serde(rename = "statusText")]
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Outbound HTTP access.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, ErrorObject>;
}

/// Production fetcher backed by `reqwest`.
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, ErrorObject> {
        let method: reqwest::Method = request
            .method
            .parse()
            .map_err(|_| ErrorObject::new("FETCH_ERROR", format!("invalid method '{}'", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ErrorObject::new("FETCH_ERROR", e.to_string()))?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| ErrorObject::new("FETCH_ERROR", e.to_string()))?;

        Ok(FetchResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
        })
    }
}

/// Re-entry into the orchestrator's skill pipeline.
///
/// The skill name arrives as the plugin supplied it (possibly
/// `plugin__name`); permission has already been checked by the handler.
#[async_trait]
pub trait SkillInvoker: Send + Sync {
    async fn invoke(&self, skill_name: &str, args: Value) -> Result<Value, ErrorObject>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fetch_request_defaults() {
        let req: FetchRequest = serde_json::from_value(json!({"url": "https://x.test"})).unwrap();
        assert_eq!(req.method, "GET");
        assert!(req.headers.is_empty());
        assert!(req.body.is_none());
    }

    #[test]
    fn db_options_accept_where_keyword() {
        let opts: DbQueryOptions =
            serde_json::from_value(json!({"where": {"id": 1}, "limit": 10})).unwrap();
        assert_eq!(opts.limit, Some(10));
        assert!(opts.where_clause.unwrap().contains_key("id"));
    }

    #[test]
    fn fetch_response_serializes_status_text_camel() {
        let resp = FetchResponse {
            status: 200,
            status_text: "OK".into(),
            headers: HashMap::new(),
            body: String::new(),
        };
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["statusText"], "OK");
    }
}
