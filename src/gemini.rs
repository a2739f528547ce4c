use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::auth::TokenProvider;
use crate::config::Settings;
use crate::http::{pretty, JsonRequest, Transport};

/// Models that accept `response_schema` natively. Everything else gets the
/// schema spelled out in the prompt.
const NATIVE_SCHEMA_PREFIX: &str = "gemini-1.5-pro";

const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn image(mime_type: impl Into<String>, base64: impl Into<String>) -> Self {
        Part::Inline {
            inline_data: InlineData {
                mime_type: mime_type.into(),
                data: base64.into(),
            },
        }
    }
}

pub fn supports_response_schema(model: &str) -> bool {
    model.starts_with(NATIVE_SCHEMA_PREFIX)
}

/// Single-turn `generateContent` body with fixed safety and sampling settings.
pub fn build_request(model: &str, parts: &[Part], schema: Option<&Value>) -> Value {
    let native = supports_response_schema(model);

    let mut parts = parts.to_vec();
    if let (false, Some(schema)) = (native, schema) {
        parts.push(Part::text(format!(
            "Output in the following JSON Format:\n{}",
            pretty(schema)
        )));
    }

    let safety_settings: Vec<Value> = SAFETY_CATEGORIES
        .iter()
        .map(|category| json!({ "category": category, "threshold": "BLOCK_NONE" }))
        .collect();

    let mut generation_config = json!({
        "temperature": 1.0,
        "top_p": 0.95,
        "max_output_tokens": 8192,
        "responseMimeType": "application/json",
    });
    if let (true, Some(schema)) = (native, schema) {
        generation_config["response_schema"] = schema.clone();
    }

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "safetySettings": safety_settings,
        "generation_config": generation_config,
    })
}

/// Text of the first part of the first candidate, if there is any.
pub fn extract_text(response: &Value) -> Option<&str> {
    response
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
}

/// Parse the model's answer. Malformed JSON is logged and treated as no answer.
pub fn parse_model_json(text: &str) -> Option<Value> {
    let body = match FENCE_RE.captures(text) {
        Some(caps) => caps.get(1).map_or(text, |m| m.as_str()),
        None => text,
    };
    match serde_json::from_str(body) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Model answer is not valid JSON:\n{}", text);
            None
        }
    }
}

pub struct GeminiClient<'a, T, A> {
    transport: &'a T,
    auth: &'a A,
    project: String,
    location: String,
}

impl<'a, T: Transport, A: TokenProvider> GeminiClient<'a, T, A> {
    pub fn new(transport: &'a T, auth: &'a A, settings: &Settings) -> Self {
        Self {
            transport,
            auth,
            project: settings.gcp_project.trim().to_string(),
            location: settings.gcp_location.trim().to_string(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "https://{loc}-aiplatform.googleapis.com/v1/projects/{project}/locations/{loc}/publishers/google/models/{model}:generateContent",
            loc = self.location,
            project = self.project,
            model = model,
        )
    }

    /// Ask `model` for a JSON answer. `Ok(None)` when the model gave no usable text.
    pub async fn generate(
        &self,
        model: &str,
        parts: &[Part],
        schema: Option<&Value>,
    ) -> Result<Option<Value>> {
        let request = JsonRequest::post(
            self.endpoint(model),
            self.auth.bearer_token()?,
            build_request(model, parts, schema),
        );
        let response = self
            .transport
            .send_json(&request)
            .await
            .with_context(|| format!("{} request failed", model))?;

        let Some(response) = response else {
            return Ok(None);
        };
        let Some(text) = extract_text(&response) else {
            debug!(model, "response has no candidate text");
            return Ok(None);
        };
        Ok(parse_model_json(text))
    }
}
