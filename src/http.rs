use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The service answered with an `error` payload.
    #[error("{0}")]
    Payload(String),
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// One JSON call. `body: None` sends a GET, otherwise a POST.
#[derive(Debug, Clone)]
pub struct JsonRequest {
    pub url: String,
    pub bearer: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl JsonRequest {
    pub fn post(url: impl Into<String>, bearer: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            bearer: bearer.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn get(url: impl Into<String>, bearer: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bearer: bearer.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }
}

/// Everything the workflows need from the network.
pub trait Transport {
    /// Send a JSON request. `Ok(None)` means the body was not JSON.
    async fn send_json(&self, request: &JsonRequest) -> Result<Option<Value>>;

    async fn fetch_bytes(&self, url: &str, bearer: &str) -> Result<Vec<u8>>;
}

pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpClient {
    async fn send_json(&self, request: &JsonRequest) -> Result<Option<Value>> {
        let mut builder = match &request.body {
            Some(body) => self.client.post(&request.url).json(body),
            None => self.client.get(&request.url),
        };
        builder = builder.bearer_auth(&request.bearer);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        // Status is not checked; failures carry an `error` payload in the body.
        let response = builder.send().await.map_err(ApiError::from)?;
        let status = response.status();
        let text = response.text().await.map_err(ApiError::from)?;
        debug!(url = %request.url, %status, bytes = text.len(), "response received");

        Ok(check_error(parse_body(&text))?)
    }

    async fn fetch_bytes(&self, url: &str, bearer: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(ApiError::from)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }
            .into());
        }
        let bytes = response.bytes().await.map_err(ApiError::from)?;
        Ok(bytes.to_vec())
    }
}

/// Non-JSON bodies are logged and dropped.
pub fn parse_body(text: &str) -> Option<Value> {
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Response is not valid JSON:\n{}", text);
            None
        }
    }
}

/// Turn an `error` payload into an `ApiError`, preferring its `message`.
pub fn check_error(body: Option<Value>) -> Result<Option<Value>, ApiError> {
    let Some(error) = body.as_ref().and_then(|b| b.get("error")) else {
        return Ok(body);
    };
    let message = match error.get("message").and_then(Value::as_str) {
        Some(m) => m.to_string(),
        None => pretty(error),
    };
    Err(ApiError::Payload(message))
}

pub fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};

    use anyhow::{anyhow, Result};
    use serde_json::Value;

    use super::{check_error, JsonRequest, Transport};

    /// Replays canned bodies in order and records every request.
    #[derive(Default)]
    pub struct ScriptedTransport {
        responses: RefCell<VecDeque<Option<Value>>>,
        pub requests: RefCell<Vec<JsonRequest>>,
        blobs: HashMap<String, Vec<u8>>,
    }

    impl ScriptedTransport {
        pub fn new(responses: Vec<Value>) -> Self {
            Self {
                responses: RefCell::new(responses.into_iter().map(Some).collect()),
                ..Default::default()
            }
        }

        pub fn push_raw(&self, body: Option<Value>) {
            self.responses.borrow_mut().push_back(body);
        }

        pub fn with_blob(mut self, url: &str, bytes: &[u8]) -> Self {
            self.blobs.insert(url.to_string(), bytes.to_vec());
            self
        }

        pub fn calls(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    impl Transport for ScriptedTransport {
        async fn send_json(&self, request: &JsonRequest) -> Result<Option<Value>> {
            self.requests.borrow_mut().push(request.clone());
            let next = self
                .responses
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| anyhow!("unexpected request to {}", request.url))?;
            Ok(check_error(next)?)
        }

        async fn fetch_bytes(&self, url: &str, _bearer: &str) -> Result<Vec<u8>> {
            self.blobs
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow!("no blob for {}", url))
        }
    }
}
