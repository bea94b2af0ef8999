//! Protocol events and the typed result fragments extracted from them

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// One decoded unit of the event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// A `data:` line that parsed as JSON.
    Data(Value),
    /// The `[DONE]` sentinel. Nothing follows it.
    Done,
}

impl ProtocolEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProtocolEvent::Done)
    }
}

/// A search hit the answer was grounded on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Token and search accounting. Unknown counters are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_context_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_search_queries: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One step of the model's published reasoning trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub detail: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    #[serde(default)]
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoResult {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// Typed view of one upstream event or final payload.
///
/// Every field is `None` when the upstream object did not carry it. A field that
/// is present but has a shape we do not understand is also `None`; that is
/// logged, never fatal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultFragment {
    pub id: Option<String>,
    pub model: Option<String>,
    /// Text delta (streaming) or full message text (final payload).
    pub content: Option<String>,
    pub finish_reason: Option<String>,
    pub citations: Option<Vec<String>>,
    pub search_results: Option<Vec<SearchResult>>,
    pub usage: Option<Usage>,
    pub reasoning_steps: Option<Vec<ReasoningStep>>,
    pub images: Option<Vec<ImageResult>>,
    pub videos: Option<Vec<VideoResult>>,
    pub related_questions: Option<Vec<String>>,
}

impl ResultFragment {
    /// Extract a fragment from one streamed chunk (`choices[0].delta.content`).
    pub fn from_chunk(value: &Value) -> Self {
        let content = first_choice(value)
            .and_then(|c| c.pointer("/delta/content"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Self::with_content(value, content)
    }

    /// Extract a fragment from a non-streaming response (`choices[0].message.content`).
    ///
    /// Falls back to the delta path for servers that answer non-streaming
    /// requests with chunk-shaped bodies.
    pub fn from_final(value: &Value) -> Self {
        let content = first_choice(value)
            .and_then(|c| {
                c.pointer("/message/content")
                    .or_else(|| c.pointer("/delta/content"))
            })
            .and_then(Value::as_str)
            .map(str::to_string);
        Self::with_content(value, content)
    }

    fn with_content(value: &Value, content: Option<String>) -> Self {
        Self {
            id: field(value, "id"),
            model: field(value, "model"),
            content,
            finish_reason: first_choice(value)
                .and_then(|c| c.get("finish_reason"))
                .and_then(Value::as_str)
                .map(str::to_string),
            citations: field(value, "citations"),
            search_results: field(value, "search_results"),
            usage: field(value, "usage"),
            reasoning_steps: field(value, "reasoning_steps"),
            images: field(value, "images"),
            videos: field(value, "videos"),
            related_questions: field(value, "related_questions"),
        }
    }

    /// `true` when the fragment carries at least one side-channel field.
    pub fn has_side_channel(&self) -> bool {
        self.citations.is_some()
            || self.search_results.is_some()
            || self.usage.is_some()
            || self.reasoning_steps.is_some()
            || self.images.is_some()
            || self.videos.is_some()
            || self.related_questions.is_some()
    }
}

fn first_choice(value: &Value) -> Option<&Value> {
    value.get("choices").and_then(|c| c.get(0))
}

fn field<T: DeserializeOwned>(value: &Value, key: &str) -> Option<T> {
    let raw = value.get(key)?;
    if raw.is_null() {
        return None;
    }
    match T::deserialize(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(field = key, error = %e, "ignoring field with unexpected shape");
            None
        }
    }
}
