//! Call bridge: run async venue operations from synchronous call sites.
//!
//! Each [`CallBridge`] owns one multi-thread tokio runtime for its whole
//! lifetime. Synchronous callers spawn their operation onto that runtime and
//! block until it resolves. Calls made from inside an async context
//! (including the bridge's own runtime) are detected and waited on without
//! stalling the scheduler; see [`WaitStrategy`].

pub mod bridge;
pub mod cancel;
pub mod config;

pub use bridge::*;
pub use cancel::*;
pub use config::*;

use std::time::Duration;

/// Boxed cause carried by [`BridgeError::Remote`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by [`CallBridge::invoke`] and friends.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Bridge is closed")]
    BridgeClosed,
    #[error("Bridge unavailable: {0}")]
    BridgeUnavailable(String),
    #[error("Remote operation failed: {0}")]
    Remote(#[source] BoxError),
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Operation panicked: {0}")]
    Panicked(String),
}

impl BridgeError {
    pub fn remote(cause: impl Into<BoxError>) -> Self {
        BridgeError::Remote(cause.into())
    }

    /// The underlying operation's error, if it failed with an `E`.
    pub fn remote_cause<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            BridgeError::Remote(cause) => cause.downcast_ref::<E>(),
            _ => None,
        }
    }
}
