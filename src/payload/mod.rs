//! Payload builder: configuration + history -> minimal upstream request body.
//!
//! Inactive fields (`None`, `false`, empty strings, empty collections) never
//! reach the wire. Upstream rejects some empty objects outright, and a minimal
//! body is easier to read in logs.

use crate::config::{
    ReasoningEffort, RecencyFilter, SearchConfig, SearchMode, UserLocation, WebSearchOptions,
};
use crate::types::message::Message;
use serde::Serialize;
use serde_json::Value;
use std::ops::RangeInclusive;

pub const MAX_TOKENS_RANGE: RangeInclusive<u32> = 1..=128_000;
pub const TOP_K_RANGE: RangeInclusive<u32> = 0..=2048;
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = 0.0..=2.0;
pub const TOP_P_RANGE: RangeInclusive<f64> = 0.0..=1.0;
pub const PENALTY_RANGE: RangeInclusive<f64> = -2.0..=2.0;

fn is_false(b: &bool) -> bool {
    !*b
}

/// The request actually sent upstream. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestPayload {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_mode: Option<SearchMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    search_domain_filter: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_recency_filter: Option<RecencyFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_after_date_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_before_date_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_updated_after_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_updated_before_filter: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    return_images: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    image_domain_filter: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    image_format_filter: Vec<String>,
    #[serde(skip_serializing_if = "is_false")]
    return_related_questions: bool,
    #[serde(skip_serializing_if = "is_false")]
    disable_search: bool,
    #[serde(skip_serializing_if = "is_false")]
    enable_search_classifier: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    web_search_options: Option<WebSearchOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_preference: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    stream: bool,
}

/// Body for the async submission endpoint: `{ "request": <payload> }`.
#[derive(Debug, Serialize)]
pub struct AsyncSubmission<'a> {
    pub request: &'a RequestPayload,
}

impl RequestPayload {
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_streaming(&self) -> bool {
        self.stream
    }

    pub fn as_async_submission(&self) -> AsyncSubmission<'_> {
        AsyncSubmission { request: self }
    }

    pub fn to_value(&self) -> crate::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Builder over a borrowed configuration.
pub struct PayloadBuilder<'a> {
    config: &'a SearchConfig,
    messages: Vec<Message>,
    stream: bool,
}

impl<'a> PayloadBuilder<'a> {
    pub fn new(config: &'a SearchConfig) -> Self {
        Self {
            config,
            messages: Vec::new(),
            stream: config.stream,
        }
    }

    /// Prior conversation turns, oldest first.
    pub fn messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.messages = messages.into_iter().collect();
        self
    }

    /// Override the configured streaming flag (async submissions never stream).
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn build(self) -> RequestPayload {
        let cfg = self.config;

        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        if let Some(prompt) = active_str(&cfg.system_prompt) {
            messages.push(Message::system(prompt));
        }
        messages.extend(self.messages);

        RequestPayload {
            model: cfg.model.clone(),
            messages,
            max_tokens: cfg.max_tokens.map(|n| clamp_u32(n, &MAX_TOKENS_RANGE)),
            temperature: clamp_f64(cfg.temperature, &TEMPERATURE_RANGE),
            top_p: clamp_f64(cfg.top_p, &TOP_P_RANGE),
            top_k: cfg.top_k.map(|k| clamp_u32(k, &TOP_K_RANGE)),
            presence_penalty: clamp_f64(cfg.presence_penalty, &PENALTY_RANGE),
            frequency_penalty: clamp_f64(cfg.frequency_penalty, &PENALTY_RANGE),
            search_mode: cfg.search_mode,
            reasoning_effort: cfg.reasoning_effort,
            search_domain_filter: active_list(&cfg.search_domain_filter),
            search_recency_filter: cfg.search_recency_filter,
            search_after_date_filter: active_str(&cfg.search_after_date_filter),
            search_before_date_filter: active_str(&cfg.search_before_date_filter),
            last_updated_after_filter: active_str(&cfg.last_updated_after_filter),
            last_updated_before_filter: active_str(&cfg.last_updated_before_filter),
            return_images: cfg.return_images,
            image_domain_filter: active_list(&cfg.image_domain_filter),
            image_format_filter: active_list(&cfg.image_format_filter),
            return_related_questions: cfg.return_related_questions,
            disable_search: cfg.disable_search,
            enable_search_classifier: cfg.enable_search_classifier,
            web_search_options: active_web_search(cfg.web_search_options.as_ref()),
            response_format: cfg
                .response_format
                .clone()
                .filter(|v| !is_inactive_json(v)),
            language_preference: active_str(&cfg.language_preference),
            stream: self.stream,
        }
    }
}

/// Build a payload using the configuration's own streaming flag.
pub fn build_payload(config: &SearchConfig, messages: &[Message]) -> RequestPayload {
    PayloadBuilder::new(config)
        .messages(messages.iter().cloned())
        .build()
}

fn clamp_u32(v: u32, range: &RangeInclusive<u32>) -> u32 {
    v.clamp(*range.start(), *range.end())
}

fn clamp_f64(v: Option<f64>, range: &RangeInclusive<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
        .map(|x| x.clamp(*range.start(), *range.end()))
}

fn active_str(s: &Option<String>) -> Option<String> {
    s.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn active_list(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn active_web_search(opts: Option<&WebSearchOptions>) -> Option<WebSearchOptions> {
    let opts = opts?;
    let cleaned = WebSearchOptions {
        search_context_size: opts.search_context_size,
        user_location: opts
            .user_location
            .clone()
            .filter(|loc| !loc.is_empty())
            .map(|loc| UserLocation {
                country: active_str(&loc.country),
                ..loc
            }),
    };
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn is_inactive_json(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}
