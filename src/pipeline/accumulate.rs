//! Result merge engine.
//!
//! Content is append-only: deltas are concatenated in arrival order, never
//! reordered or deduplicated. Side-channel fields are replace-on-arrival: a
//! field present in a fragment overwrites the accumulator's value in full, a
//! field absent from it is left untouched.

use crate::types::events::{
    ImageResult, ProtocolEvent, ReasoningStep, ResultFragment, SearchResult, Usage, VideoResult,
};
use crate::Error;
use serde::Serialize;
use serde_json::Value;

/// Lifecycle of one exchange as seen by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeStatus {
    #[default]
    Pending,
    Streaming,
    Polling,
    Completed,
    Stopped,
    Failed,
}

impl ExchangeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExchangeStatus::Completed | ExchangeStatus::Stopped | ExchangeStatus::Failed
        )
    }
}

/// Current best-known answer for one exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultAccumulator {
    pub id: Option<String>,
    pub model: Option<String>,
    pub content: String,
    pub finish_reason: Option<String>,
    pub citations: Option<Vec<String>>,
    pub search_results: Option<Vec<SearchResult>>,
    pub usage: Option<Usage>,
    pub reasoning_steps: Option<Vec<ReasoningStep>>,
    pub images: Option<Vec<ImageResult>>,
    pub videos: Option<Vec<VideoResult>>,
    pub related_questions: Option<Vec<String>>,
    /// Human-readable progress note for async jobs.
    pub async_status: Option<String>,
    pub status: ExchangeStatus,
    pub error: Option<String>,
}

/// What is being folded into the accumulator.
#[derive(Debug, Clone)]
pub enum MergeInput {
    /// One streamed event.
    Event(ResultFragment),
    /// A whole non-streaming response.
    Final(ResultFragment),
}

/// `merge(accumulator, event_or_final) -> accumulator'`
pub fn merge(mut acc: ResultAccumulator, input: MergeInput) -> ResultAccumulator {
    match input {
        MergeInput::Event(f) => acc.merge_event(f),
        MergeInput::Final(f) => acc.merge_final(f),
    }
    acc
}

impl ResultAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one incremental event.
    pub fn merge_event(&mut self, fragment: ResultFragment) {
        let ResultFragment {
            id,
            model,
            content,
            finish_reason,
            citations,
            search_results,
            usage,
            reasoning_steps,
            images,
            videos,
            related_questions,
        } = fragment;

        if let Some(delta) = content {
            self.content.push_str(&delta);
        }

        replace(&mut self.id, id);
        replace(&mut self.model, model);
        replace(&mut self.finish_reason, finish_reason);
        replace(&mut self.citations, citations);
        replace(&mut self.search_results, search_results);
        replace(&mut self.usage, usage);
        replace(&mut self.reasoning_steps, reasoning_steps);
        replace(&mut self.images, images);
        replace(&mut self.videos, videos);
        replace(&mut self.related_questions, related_questions);
    }

    /// Fold a whole non-streaming payload: exactly one incremental event that
    /// carries everything.
    ///
    /// Side channels are replaced, so merging the same payload twice leaves them
    /// as after the first merge. Content is appended, so this must run once per
    /// distinct payload.
    pub fn merge_final(&mut self, fragment: ResultFragment) {
        self.merge_event(fragment);
    }

    /// Decode a streamed JSON chunk and fold it.
    pub fn merge_chunk_value(&mut self, value: &Value) {
        self.merge_event(ResultFragment::from_chunk(value));
    }

    /// Decode a non-streaming response body and fold it.
    pub fn merge_final_value(&mut self, value: &Value) {
        self.merge_final(ResultFragment::from_final(value));
    }

    /// Fold a decoded protocol event. The sentinel carries no data.
    pub fn merge_protocol_event(&mut self, event: &ProtocolEvent) {
        if let ProtocolEvent::Data(v) = event {
            self.merge_chunk_value(v);
        }
    }

    pub fn set_async_status(&mut self, note: impl Into<String>) {
        self.async_status = Some(note.into());
    }

    pub fn complete(&mut self) {
        self.status = ExchangeStatus::Completed;
    }

    pub fn stop(&mut self) {
        self.status = ExchangeStatus::Stopped;
    }

    /// Record a failure on the content so the reader sees it inline.
    pub fn fail(&mut self, err: &Error) {
        let message = err.to_string();
        if !self.content.is_empty() {
            self.content.push_str("\n\n");
        }
        self.content.push_str("Error: ");
        self.content.push_str(&message);
        self.error = Some(message);
        self.status = ExchangeStatus::Failed;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

fn replace<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_fields_are_left_untouched() {
        let mut acc = ResultAccumulator::new();
        acc.merge_chunk_value(&json!({"citations": ["a"], "related_questions": ["q1"]}));
        acc.merge_chunk_value(&json!({"citations": ["b"]}));
        assert_eq!(acc.citations, Some(vec!["b".to_string()]));
        assert_eq!(acc.related_questions, Some(vec!["q1".to_string()]));
    }

    #[test]
    fn functional_merge_matches_in_place_merge() {
        let payload = json!({
            "choices": [{"message": {"content": "answer"}}],
            "usage": {"total_tokens": 9}
        });
        let a = merge(
            ResultAccumulator::new(),
            MergeInput::Final(ResultFragment::from_final(&payload)),
        );
        let mut b = ResultAccumulator::new();
        b.merge_final_value(&payload);
        assert_eq!(a, b);
    }

    #[test]
    fn failure_is_recorded_inline() {
        let mut acc = ResultAccumulator::new();
        acc.merge_chunk_value(&json!({"choices": [{"delta": {"content": "partial"}}]}));
        acc.fail(&Error::Upstream {
            status: 500,
            body: "oops".into(),
        });
        assert_eq!(acc.status, ExchangeStatus::Failed);
        assert!(acc.content.starts_with("partial\n\nError: "));
        assert!(acc.error.as_deref().unwrap().contains("oops"));
        assert!(acc.is_terminal());
    }

    #[test]
    fn sentinel_does_not_mutate() {
        let mut acc = ResultAccumulator::new();
        acc.merge_protocol_event(&ProtocolEvent::Done);
        assert_eq!(acc, ResultAccumulator::new());
    }
}
