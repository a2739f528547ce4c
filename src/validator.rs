use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::auth::TokenProvider;
use crate::gemini::{GeminiClient, Part};
use crate::http::Transport;

/// Outcome of checking one piece of content against one guideline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub is_valid: bool,
    pub reasoning: String,
    #[serde(default)]
    pub suggestion: Option<String>,
}

impl Verdict {
    /// `None` when the answer does not have the verdict shape.
    pub fn from_answer(answer: Value) -> Option<Verdict> {
        match serde_json::from_value(answer.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, %answer, "Model answer is not a verdict");
                None
            }
        }
    }

    pub fn suggestion_cell(&self) -> String {
        self.suggestion.clone().unwrap_or_default()
    }
}

/// Output schema handed to the model (Vertex `Schema` format).
pub fn verdict_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "isValid": { "type": "boolean" },
            "reasoning": { "type": "string" },
            "suggestion": { "type": "string" },
        },
        "required": ["isValid", "reasoning"],
    })
}

pub fn text_ad_prompt(guideline_id: &str, guideline_text: &str, ad_text: &str) -> Vec<Part> {
    vec![Part::text(format!(
        "Consider a Google Responsive Search Ad with the following text:
  {ad_text}

  Determine if the ad is compliant with the following guideline
  and provide a suggestion for a new text only if it is not compliant:

  #{guideline_id}
  {guideline_text}"
    ))]
}

pub fn image_prompt(
    guideline_id: &str,
    guideline_text: &str,
    mime_type: &str,
    image_base64: &str,
) -> Vec<Part> {
    vec![
        Part::text(format!(
            "Determine if the following image is compliant with the following guideline
  and provide a suggestion what needs to be changed in the image in case it is not compliant:

  #{guideline_id}
  {guideline_text}
  "
        )),
        Part::image(mime_type, image_base64),
    ]
}

/// Decides whether a prompt's content meets its guideline.
pub trait Judge {
    /// `Ok(None)` when no verdict could be read from the model.
    async fn judge(&self, parts: &[Part]) -> Result<Option<Verdict>>;
}

pub struct GeminiJudge<'a, T, A> {
    client: GeminiClient<'a, T, A>,
    model: String,
    schema: Value,
}

impl<'a, T: Transport, A: TokenProvider> GeminiJudge<'a, T, A> {
    pub fn new(client: GeminiClient<'a, T, A>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            schema: verdict_schema(),
        }
    }
}

impl<T: Transport, A: TokenProvider> Judge for GeminiJudge<'_, T, A> {
    async fn judge(&self, parts: &[Part]) -> Result<Option<Verdict>> {
        if let Some(Part::Text { text }) = parts.first() {
            debug!(model = %self.model, "{}", text);
        }
        let answer = self
            .client
            .generate(&self.model, parts, Some(&self.schema))
            .await?;
        Ok(answer.and_then(Verdict::from_answer))
    }
}
