//! Exchange-level client for the upstream completion API.
//!
//! Implementation details are split into submodules under `src/client/`.

pub mod builder;
pub mod core;
mod execution;

pub use builder::SonarClientBuilder;
pub use self::core::{CompletionBody, SonarClient};
