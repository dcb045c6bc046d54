//! Plugin HTTP route pipeline.
//!
//! Requests under a plugin's mount point are permission-checked against its
//! `api` grant, forwarded to `onHTTPRequest`, and the response is hardened
//! with default security headers unless the plugin set its own.

use crate::orchestrator::Orchestrator;
use frontclaw_contract::{codes, hooks, ErrorObject};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Headers applied to every plugin response that does not override them.
pub const SECURITY_HEADERS: [(&str, &str); 4] = [
    (
        "Content-Security-Policy",
        "default-src 'none'; frame-ancestors 'none'; base-uri 'none'; form-action 'none'",
    ),
    ("X-Content-Type-Options", "nosniff"),
    ("X-Frame-Options", "DENY"),
    ("Referrer-Policy", "no-referrer"),
];

/// The request as forwarded to the plugin: path is already relative to the
/// plugin's mount point.
#[derive(Debug, Clone, Serialize)]
pub struct PluginHttpRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginHttpResponse {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

fn default_status() -> u16 {
    200
}

impl PluginHttpResponse {
    fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }
}

impl Orchestrator {
    /// Check the route grant, invoke `onHTTPRequest`, and harden the
    /// response headers.
    pub async fn route_http_request(
        &self,
        plugin_id: &str,
        request: PluginHttpRequest,
    ) -> Result<PluginHttpResponse, ErrorObject> {
        let Some(entry) = self.entry(plugin_id) else {
            return Err(ErrorObject::new(
                "PLUGIN_NOT_FOUND",
                format!("no plugin '{plugin_id}'"),
            ));
        };

        entry
            .guard()
            .check_api_route(&request.method, &request.path)
            .map_err(ErrorObject::from)?;

        let payload = serde_json::to_value(&request)
            .map_err(|e| ErrorObject::new(codes::HOOK_ERROR, e.to_string()))?;
        let result = entry.host.call_hook(hooks::ON_HTTP_REQUEST, payload).await?;

        let mut response = parse_response(result)?;
        for (name, value) in SECURITY_HEADERS {
            if !response.has_header(name) {
                response.headers.insert(name.to_string(), value.to_string());
            }
        }
        Ok(response)
    }
}

fn parse_response(result: Option<Value>) -> Result<PluginHttpResponse, ErrorObject> {
    let Some(value) = result else {
        return Err(ErrorObject::new(
            codes::HOOK_ERROR,
            "onHTTPRequest returned no response",
        ));
    };
    if value.is_object() && (value.get("status").is_some() || value.get("body").is_some()) {
        return serde_json::from_value(value)
            .map_err(|e| ErrorObject::new(codes::HOOK_ERROR, format!("malformed response: {e}")));
    }
    // A bare value is the body of a 200.
    Ok(PluginHttpResponse {
        status: 200,
        headers: HashMap::new(),
        body: value,
    })
}
