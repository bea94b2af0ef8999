//! Cancellation controller.
//!
//! One live token per session. Starting a new exchange trips the previous
//! token and installs a fresh one, so anything still in flight for the old
//! exchange notices at its next checkpoint and stops mutating state. Nothing is
//! killed preemptively: a read already in progress finishes and its result is
//! dropped.

use crate::{BoxStream, Error, Result};
use arc_swap::ArcSwap;
use futures::StreamExt;
use std::sync::Arc;

pub use tokio_util::sync::CancellationToken;

/// Session-owned slot holding the live cancellation token.
pub struct CancelSlot {
    current: ArcSwap<CancellationToken>,
}

impl Default for CancelSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSlot {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(CancellationToken::new()),
        }
    }

    /// Invalidate the previous exchange and hand out the token for a new one.
    pub fn begin(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        let previous = self.current.swap(Arc::new(fresh.clone()));
        previous.cancel();
        fresh
    }

    /// Trip the live token (the user pressed "stop").
    pub fn cancel(&self) {
        self.current.load().cancel();
    }

    pub fn current(&self) -> CancellationToken {
        CancellationToken::clone(&self.current.load())
    }
}

/// `Err(Error::Cancelled)` once the token has been tripped.
pub fn checkpoint(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Pass items through until the token trips. The check runs after each item
/// arrives and before it is handed on, so nothing is delivered once cancelled.
pub fn until_cancelled<T>(stream: BoxStream<'static, T>, token: CancellationToken) -> BoxStream<'static, T>
where
    T: Send + 'static,
{
    Box::pin(stream.take_while(move |_| futures::future::ready(!token.is_cancelled())))
}
