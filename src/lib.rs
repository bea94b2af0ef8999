//! # sonar-relay
//!
//! Streaming runtime for search-augmented chat completions.
//!
//! ## Overview
//!
//! The upstream completion protocol delivers a result in pieces: content deltas
//! arrive as `data:` events over a chunked byte stream, side-channel metadata
//! (citations, search results, usage, ...) arrives whenever the server feels like
//! it, and long-running requests can instead be submitted as jobs and polled.
//! This crate turns all of that into one continuously-updated result.
//!
//! ## Core Pieces
//!
//! - **Payload building**: [`payload::build_payload`] turns a [`SearchConfig`] and the
//!   conversation history into a minimal wire request
//! - **Relay**: [`relay`] forwards an upstream response to a caller byte for byte
//!   without buffering it, and ships an axum server exposing the relay endpoints
//! - **Decoding**: [`pipeline::decode::SseDecoder`] reconstructs protocol events from
//!   arbitrarily fragmented bytes
//! - **Merging**: [`pipeline::accumulate::ResultAccumulator`] folds events (or one
//!   final payload) into the current best-known answer
//! - **Async jobs**: [`jobs::AsyncJobPoller`] drives submit/poll until the job is
//!   terminal
//! - **Cancellation**: [`cancel::CancelSlot`] keeps one live token per session
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sonar_relay::{ClientConfig, Message, SearchConfig, Session, SonarClient};
//!
//! #[tokio::main]
//! async fn main() -> sonar_relay::Result<()> {
//!     let client = SonarClient::new(ClientConfig::from_env()?)?;
//!     let mut session = Session::new(client, SearchConfig::default());
//!
//!     let mut updates = session.subscribe();
//!     tokio::spawn(async move {
//!         while updates.changed().await.is_ok() {
//!             let snapshot = updates.borrow().clone();
//!             println!("{}", snapshot.content);
//!         }
//!     });
//!
//!     let result = session.send("What changed in Rust 1.80?").await;
//!     println!("{:?}", result.citations);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`payload`] | Request payload construction |
//! | [`pipeline`] | Event decoding and result merging |
//! | [`relay`] | Upstream response relay and HTTP server |
//! | [`jobs`] | Asynchronous job polling state machine |
//! | [`cancel`] | Per-session cancellation slot |
//! | [`client`] | Exchange-level client operations |
//! | [`session`] | Conversation-scoped exchange driver |
//! | [`transport`] | HTTP transport to the upstream API |
//! | [`types`] | Messages, protocol events, result fragments, jobs |

pub mod cancel;
pub mod client;
pub mod config;
pub mod jobs;
pub mod payload;
pub mod pipeline;
pub mod relay;
pub mod session;
pub mod transport;
pub mod types;

pub use cancel::CancelSlot;
pub use client::{SonarClient, SonarClientBuilder};
pub use config::{ClientConfig, SearchConfig};
pub use pipeline::accumulate::{ExchangeStatus, ResultAccumulator};
pub use session::Session;
pub use types::{
    events::{ProtocolEvent, ResultFragment},
    message::{Message, MessageRole},
};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
