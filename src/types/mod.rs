//! Core data types: conversation messages, protocol events, result fragments and
//! async jobs.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`message`] | Conversation messages with optional image blocks |
//! | [`events`] | Decoded protocol events and typed result fragments |
//! | [`job`] | Async job status documents |

pub mod events;
pub mod job;
pub mod message;

pub use events::{
    ImageResult, ProtocolEvent, ReasoningStep, ResultFragment, SearchResult, Usage, VideoResult,
};
pub use job::{AsyncJob, JobStatus};
pub use message::{ContentBlock, Message, MessageContent, MessageRole};
