use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the bridge gets its execution context from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopSource {
    /// Always build a dedicated runtime, shut down on close.
    #[default]
    Owned,
    /// Borrow the multi-thread runtime installed on the acquiring thread if
    /// there is one; otherwise build a dedicated runtime. A borrowed runtime
    /// is left running on close and must have its time driver enabled for
    /// call timeouts to work.
    Ambient,
}

/// Configuration for a [`crate::CallBridge`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Worker threads for an owned runtime.
    pub worker_threads: usize,
    /// Thread name prefix for an owned runtime.
    pub thread_name: String,
    pub loop_source: LoopSource,
    /// Default per-call timeout. `None` waits indefinitely.
    pub call_timeout_ms: Option<u64>,
    /// How long `close` waits for in-flight work on an owned runtime.
    pub shutdown_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            thread_name: "ethereal-bridge".to_string(),
            loop_source: LoopSource::Owned,
            call_timeout_ms: None,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl BridgeConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
