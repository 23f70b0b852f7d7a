//! General-purpose HTTP fetch tool

use crate::error::{HermesError, Result};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

#[derive(Debug, Deserialize)]
pub struct FetchArgs {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
}

pub fn schema() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "fetch",
            "description": "Fetch content from a URL. After fetching, ALWAYS synthesize the result for the user (do not dump raw). If incomplete, chain with other tools or ask the user a clarifying question before finalizing.",
            "parameters": {
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The URL to fetch content from"
                    },
                    "method": {
                        "type": "string",
                        "enum": ["GET", "POST", "PUT", "DELETE"],
                        "default": "GET",
                        "description": "HTTP method to use"
                    },
                    "headers": {
                        "type": "object",
                        "description": "Optional HTTP headers"
                    },
                    "body": {
                        "type": "string",
                        "description": "Request body for POST/PUT requests"
                    }
                },
                "required": ["url"]
            }
        }
    })
}

/// Fetch a URL with a hard per-call timeout
///
/// The response body is decoded as JSON when the content type says so,
/// otherwise returned as text. Timeouts surface as a dedicated error so
/// the model can tell them apart from network failures.
pub async fn execute(client: &reqwest::Client, args: FetchArgs) -> Result<Value> {
    debug!("Fetching {} {}", args.method, args.url);

    let method = Method::from_bytes(args.method.as_bytes())
        .map_err(|_| HermesError::InvalidToolArgs(format!("Invalid HTTP method: {}", args.method)))?;

    let mut request = client.request(method.clone(), &args.url);
    for (key, value) in &args.headers {
        request = request.header(key, value);
    }
    if let Some(body) = args.body {
        if method != Method::GET && method != Method::HEAD {
            request = request.body(body);
        }
    }

    let timeout = Duration::from_millis(args.timeout);
    let response = match tokio::time::timeout(timeout, request.send()).await {
        Ok(sent) => sent?,
        Err(_) => {
            return Err(HermesError::FetchTimeout {
                url: args.url,
                timeout_ms: args.timeout,
            })
        }
    };

    let status = response.status();
    let final_url = response.url().to_string();

    let mut headers = HashMap::new();
    for (key, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(key.to_string(), value.to_string());
        }
    }

    let is_json = headers
        .get("content-type")
        .map(|ct| ct.contains("application/json"))
        .unwrap_or(false);

    let text = match tokio::time::timeout(timeout, response.text()).await {
        Ok(read) => read?,
        Err(_) => {
            return Err(HermesError::FetchTimeout {
                url: final_url,
                timeout_ms: args.timeout,
            })
        }
    };

    let body: Value = if is_json {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    } else {
        Value::String(text)
    };

    Ok(json!({
        "status": status.as_u16(),
        "statusText": status.canonical_reason().unwrap_or(""),
        "headers": headers,
        "body": body,
        "ok": status.is_success(),
        "url": final_url,
    }))
}
