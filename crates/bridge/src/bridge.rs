use crate::{BoxError, BridgeConfig, BridgeError, CancelToken, LoopSource};
use std::cell::Cell;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

static NEXT_BRIDGE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Id of the bridge whose runtime started the current thread, or 0.
    static OWNING_BRIDGE: Cell<u64> = const { Cell::new(0) };
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// The execution context a bridge submits work to.
///
/// Owned runtimes register their worker and blocking threads in a
/// thread-local so the bridge can tell when a call comes from inside its own
/// scheduler.
pub struct BridgeContext {
    id: u64,
    handle: Handle,
    runtime: Option<Runtime>,
}

impl BridgeContext {
    fn acquire(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let id = NEXT_BRIDGE_ID.fetch_add(1, Ordering::Relaxed);

        if config.loop_source == LoopSource::Ambient {
            if let Ok(handle) = Handle::try_current() {
                if handle.runtime_flavor() == RuntimeFlavor::MultiThread {
                    debug!(bridge = id, "Borrowing ambient runtime");
                    return Ok(Self {
                        id,
                        handle,
                        runtime: None,
                    });
                }
                debug!(bridge = id, "Ambient runtime is single-threaded, creating a dedicated one");
            }
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name(config.thread_name.clone())
            .on_thread_start(move || OWNING_BRIDGE.with(|owner| owner.set(id)))
            .enable_all()
            .build()
            .map_err(|e| BridgeError::BridgeUnavailable(format!("runtime build failed: {}", e)))?;
        let handle = runtime.handle().clone();

        info!(
            bridge = id,
            workers = config.worker_threads.max(1),
            "Created bridge runtime"
        );

        Ok(Self {
            id,
            handle,
            runtime: Some(runtime),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_owned(&self) -> bool {
        self.runtime.is_some()
    }

    fn spawn<F>(&self, task: F) -> (JoinHandle<F::Output>, Handle, u64)
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        (self.handle.spawn(task), self.handle.clone(), self.id)
    }

    fn shutdown(self, timeout: Duration) {
        let Some(runtime) = self.runtime else {
            debug!(bridge = self.id, "Releasing borrowed runtime");
            return;
        };
        // A runtime may not be dropped with blocking from inside an async context.
        if Handle::try_current().is_ok() {
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(timeout);
        }
        info!(bridge = self.id, "Bridge runtime shut down");
    }
}

enum Lifecycle {
    Uninitialized,
    Ready(BridgeContext),
    Closed,
}

/// Observable bridge state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// No execution context acquired yet.
    Uninitialized,
    /// Context acquired, nothing in flight.
    Idle,
    /// At least one call is in flight.
    Running,
    /// Shut down; every further call fails with `BridgeClosed`.
    Closed,
}

/// How a synchronous caller waits for its spawned operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Plain thread: block on the bridge's runtime handle.
    Direct,
    /// Inside a multi-thread runtime (the bridge's own or another one):
    /// move the worker's queue elsewhere with `block_in_place`, then block.
    /// Nested calls from bridged operations take this path.
    BlockInPlace,
    /// Inside a current-thread runtime, where `block_in_place` is not
    /// available: block on a scoped helper thread instead.
    HelperThread,
}

impl WaitStrategy {
    /// Pick the strategy for the calling thread.
    pub fn detect() -> Self {
        match Handle::try_current() {
            Err(_) => WaitStrategy::Direct,
            Ok(current) => match current.runtime_flavor() {
                RuntimeFlavor::CurrentThread => WaitStrategy::HelperThread,
                _ => WaitStrategy::BlockInPlace,
            },
        }
    }

    fn block<F>(self, handle: &Handle, fut: F) -> F::Output
    where
        F: Future + Send,
        F::Output: Send,
    {
        match self {
            WaitStrategy::Direct => handle.block_on(fut),
            WaitStrategy::BlockInPlace => tokio::task::block_in_place(|| handle.block_on(fut)),
            WaitStrategy::HelperThread => std::thread::scope(|scope| {
                match scope.spawn(move || handle.block_on(fut)).join() {
                    Ok(output) => output,
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }),
        }
    }
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    pub in_flight: usize,
    pub completed: u64,
    pub reentrant_calls: u64,
}

// ---------------------------------------------------------------------------
// Call bridge
// ---------------------------------------------------------------------------

/// Runs async operations from synchronous call sites on one persistent
/// execution context.
///
/// Calls from any number of threads are spawned onto the same runtime, which
/// is the only place their futures interleave; callers just block on their
/// own result. The lifecycle lock is held for reading while spawning and for
/// writing while closing, so nothing is ever submitted after `close`.
pub struct CallBridge {
    config: BridgeConfig,
    lifecycle: RwLock<Lifecycle>,
    in_flight: AtomicUsize,
    completed: AtomicU64,
    reentrant: AtomicU64,
}

impl CallBridge {
    /// Create a bridge. The execution context is acquired lazily on the
    /// first call, or eagerly with [`acquire`](Self::acquire).
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            lifecycle: RwLock::new(Lifecycle::Uninitialized),
            in_flight: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            reentrant: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Acquire the execution context now. Idempotent while open.
    pub fn acquire(&self) -> Result<(), BridgeError> {
        let mut lifecycle = self.lifecycle.write().unwrap_or_else(PoisonError::into_inner);
        match &*lifecycle {
            Lifecycle::Ready(_) => Ok(()),
            Lifecycle::Closed => Err(BridgeError::BridgeClosed),
            Lifecycle::Uninitialized => {
                *lifecycle = Lifecycle::Ready(BridgeContext::acquire(&self.config)?);
                Ok(())
            }
        }
    }

    /// Run `op` to completion and return its result, using the configured
    /// default timeout.
    pub fn invoke<F, T, E>(&self, op: F) -> Result<T, BridgeError>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.call(op, self.config.call_timeout(), None)
    }

    /// Like [`invoke`](Self::invoke) with an explicit timeout (`None` waits
    /// indefinitely).
    pub fn invoke_with_timeout<F, T, E>(
        &self,
        op: F,
        timeout: Option<Duration>,
    ) -> Result<T, BridgeError>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.call(op, timeout, None)
    }

    /// Like [`invoke`](Self::invoke), returning `Cancelled` and aborting the
    /// operation as soon as `token` is cancelled.
    pub fn invoke_cancellable<F, T, E>(&self, op: F, token: &CancelToken) -> Result<T, BridgeError>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.call(op, self.config.call_timeout(), Some(token))
    }

    fn call<F, T, E>(
        &self,
        op: F,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<T, BridgeError>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(BridgeError::Cancelled);
        }

        let _in_flight = InFlight::enter(&self.in_flight);
        let strategy = WaitStrategy::detect();

        let task = async move {
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, op).await {
                    Ok(result) => result,
                    Err(_) => return Err(BridgeError::Timeout(limit)),
                },
                None => op.await,
            };
            result.map_err(|e| BridgeError::Remote(e.into()))
        };

        let (join, handle, bridge_id) = self.submit(task)?;

        if strategy != WaitStrategy::Direct {
            self.reentrant.fetch_add(1, Ordering::Relaxed);
            let own_context = OWNING_BRIDGE.with(Cell::get) == bridge_id;
            debug!(bridge = bridge_id, ?strategy, own_context, "Re-entrant bridge call");
        }

        let outcome = strategy.block(&handle, wait_for(join, cancel));
        self.completed.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(Err(BridgeError::Timeout(limit))) => {
                warn!(bridge = bridge_id, ?limit, "Bridged call timed out");
                Err(BridgeError::Timeout(limit))
            }
            Ok(result) => result,
            Err(join_error) => Err(self.join_failure(join_error)),
        }
    }

    fn submit<Fut>(&self, task: Fut) -> Result<(JoinHandle<Fut::Output>, Handle, u64), BridgeError>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        {
            let lifecycle = self.lifecycle.read().unwrap_or_else(PoisonError::into_inner);
            match &*lifecycle {
                Lifecycle::Ready(ctx) => return Ok(ctx.spawn(task)),
                Lifecycle::Closed => return Err(BridgeError::BridgeClosed),
                Lifecycle::Uninitialized => {}
            }
        }

        self.acquire()?;

        let lifecycle = self.lifecycle.read().unwrap_or_else(PoisonError::into_inner);
        match &*lifecycle {
            Lifecycle::Ready(ctx) => Ok(ctx.spawn(task)),
            _ => Err(BridgeError::BridgeClosed),
        }
    }

    fn join_failure(&self, error: JoinError) -> BridgeError {
        if error.is_panic() {
            let payload = error.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            warn!(%message, "Bridged operation panicked");
            BridgeError::Panicked(message)
        } else if self.is_closed() {
            BridgeError::BridgeClosed
        } else {
            BridgeError::Cancelled
        }
    }

    /// Shut down the execution context. Calls in flight on an owned runtime
    /// are cancelled; later calls fail with `BridgeClosed`. Idempotent.
    pub fn close(&self) {
        let previous = {
            let mut lifecycle = self.lifecycle.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *lifecycle, Lifecycle::Closed)
        };
        if let Lifecycle::Ready(ctx) = previous {
            ctx.shutdown(self.config.shutdown_timeout());
        }
    }

    pub fn state(&self) -> BridgeState {
        let lifecycle = self.lifecycle.read().unwrap_or_else(PoisonError::into_inner);
        match &*lifecycle {
            Lifecycle::Uninitialized => BridgeState::Uninitialized,
            Lifecycle::Closed => BridgeState::Closed,
            Lifecycle::Ready(_) if self.in_flight.load(Ordering::SeqCst) > 0 => BridgeState::Running,
            Lifecycle::Ready(_) => BridgeState::Idle,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == BridgeState::Closed
    }

    /// Whether the current thread belongs to this bridge's own runtime.
    pub fn on_own_context(&self) -> bool {
        let lifecycle = self.lifecycle.read().unwrap_or_else(PoisonError::into_inner);
        match &*lifecycle {
            Lifecycle::Ready(ctx) => OWNING_BRIDGE.with(Cell::get) == ctx.id,
            _ => false,
        }
    }

    /// `Some(true)` for a dedicated runtime, `Some(false)` for a borrowed
    /// one, `None` when no context is held.
    pub fn owns_runtime(&self) -> Option<bool> {
        let lifecycle = self.lifecycle.read().unwrap_or_else(PoisonError::into_inner);
        match &*lifecycle {
            Lifecycle::Ready(ctx) => Some(ctx.is_owned()),
            _ => None,
        }
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::Relaxed),
            reentrant_calls: self.reentrant.load(Ordering::Relaxed),
        }
    }
}

impl Default for CallBridge {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl Drop for CallBridge {
    fn drop(&mut self) {
        self.close();
    }
}

/// Await the spawned task, aborting it if the waiter is cancelled or dropped.
async fn wait_for<T>(
    join: JoinHandle<Result<T, BridgeError>>,
    cancel: Option<&CancelToken>,
) -> Result<Result<T, BridgeError>, JoinError> {
    let mut guard = AbortOnDrop(join);
    match cancel {
        Some(token) => tokio::select! {
            joined = &mut guard.0 => joined,
            _ = token.cancelled() => Ok(Err(BridgeError::Cancelled)),
        },
        None => (&mut guard.0).await,
    }
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    #[error("venue down")]
    struct VenueDown;

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn wait_until(flag: &AtomicBool) -> bool {
        for _ in 0..200 {
            if flag.load(Ordering::SeqCst) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_invoke_returns_result() {
        let bridge = CallBridge::default();
        assert_eq!(bridge.state(), BridgeState::Uninitialized);

        let value = bridge
            .invoke(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<_, BoxError>(41 + 1)
            })
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(bridge.state(), BridgeState::Idle);
        assert_eq!(bridge.owns_runtime(), Some(true));
        assert_eq!(bridge.stats().completed, 1);
    }

    #[test]
    fn test_remote_error_keeps_cause() {
        let bridge = CallBridge::default();
        let err = bridge.invoke(async { Err::<(), _>(VenueDown) }).unwrap_err();
        assert!(matches!(err, BridgeError::Remote(_)));
        assert!(err.remote_cause::<VenueDown>().is_some());
    }

    #[test]
    fn test_concurrent_invokes_from_many_threads() {
        let bridge = CallBridge::default();
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16u64)
                .map(|i| {
                    let bridge = &bridge;
                    scope.spawn(move || {
                        bridge.invoke(async move {
                            tokio::time::sleep(Duration::from_millis(5 * (i % 4))).await;
                            Ok::<_, BoxError>(i * i)
                        })
                    })
                })
                .collect();
            for (i, handle) in handles.into_iter().enumerate() {
                let i = i as u64;
                assert_eq!(handle.join().unwrap().unwrap(), i * i);
            }
        });
        assert_eq!(bridge.stats().completed, 16);
        assert_eq!(bridge.stats().in_flight, 0);
    }

    #[test]
    fn test_reentrant_invoke_from_own_runtime() {
        // A single worker would deadlock on a naive blocking wait.
        let bridge = Arc::new(CallBridge::new(BridgeConfig {
            worker_threads: 1,
            ..Default::default()
        }));
        let inner = Arc::clone(&bridge);

        let result = bridge.invoke(async move {
            let on_own = inner.on_own_context();
            let nested = Arc::clone(&inner);
            let value = inner.invoke(async move {
                nested
                    .invoke(async { Ok::<_, BoxError>(20) })
                    .map(|v| v + 1)
            })?;
            Ok::<_, BridgeError>((on_own, value * 2))
        });

        assert_eq!(result.unwrap(), (true, 42));
        assert!(bridge.stats().reentrant_calls >= 2);
    }

    #[test]
    fn test_concurrent_reentrant_invokes() {
        let bridge = Arc::new(CallBridge::default());
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8u64)
                .map(|i| {
                    let bridge = Arc::clone(&bridge);
                    scope.spawn(move || {
                        let inner = Arc::clone(&bridge);
                        bridge.invoke(async move {
                            inner.invoke(async move { Ok::<_, BoxError>(i + 100) })
                        })
                    })
                })
                .collect();
            for (i, handle) in handles.into_iter().enumerate() {
                assert_eq!(handle.join().unwrap().unwrap(), i as u64 + 100);
            }
        });
    }

    #[test]
    fn test_closed_bridge_rejects_calls_without_running_them() {
        let bridge = CallBridge::default();
        bridge.acquire().unwrap();
        assert_eq!(bridge.state(), BridgeState::Idle);

        bridge.close();
        assert_eq!(bridge.state(), BridgeState::Closed);

        for _ in 0..3 {
            let ran = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&ran);
            let err = bridge
                .invoke(async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                })
                .unwrap_err();
            assert!(matches!(err, BridgeError::BridgeClosed));
            assert!(!ran.load(Ordering::SeqCst));
        }

        // closing twice is fine
        bridge.close();
        assert!(matches!(bridge.acquire(), Err(BridgeError::BridgeClosed)));
    }

    #[test]
    fn test_timeout_drops_operation() {
        let bridge = CallBridge::default();
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(Arc::clone(&dropped));

        let err = bridge
            .invoke_with_timeout(
                async move {
                    let _guard = guard;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok::<_, BoxError>(())
                },
                Some(Duration::from_millis(50)),
            )
            .unwrap_err();

        assert!(matches!(err, BridgeError::Timeout(_)));
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_default_timeout_from_config() {
        let bridge = CallBridge::new(BridgeConfig {
            call_timeout_ms: Some(20),
            ..Default::default()
        });
        let err = bridge
            .invoke(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, BoxError>(())
            })
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(_)));
    }

    #[test]
    fn test_cancellation_aborts_operation() {
        let bridge = CallBridge::default();
        let token = CancelToken::new();
        let canceller = token.clone();
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(Arc::clone(&dropped));

        let cancel_thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });

        let err = bridge
            .invoke_cancellable(
                async move {
                    let _guard = guard;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok::<_, BoxError>(())
                },
                &token,
            )
            .unwrap_err();

        cancel_thread.join().unwrap();
        assert!(matches!(err, BridgeError::Cancelled));
        assert!(wait_until(&dropped));
    }

    #[test]
    fn test_already_cancelled_token_submits_nothing() {
        let bridge = CallBridge::default();
        let token = CancelToken::new();
        token.cancel();
        let err = bridge
            .invoke_cancellable(async { Ok::<_, BoxError>(1) }, &token)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Cancelled));
        assert_eq!(bridge.state(), BridgeState::Uninitialized);
    }

    #[test]
    fn test_panicking_operation() {
        let bridge = CallBridge::default();
        let err = bridge
            .invoke(async {
                if true {
                    panic!("kaboom");
                }
                Ok::<i32, BoxError>(1)
            })
            .unwrap_err();
        match err {
            BridgeError::Panicked(message) => assert!(message.contains("kaboom")),
            other => panic!("unexpected error: {other:?}"),
        }
        // the bridge survives a panicking operation
        assert_eq!(bridge.invoke(async { Ok::<_, BoxError>(1) }).unwrap(), 1);
    }

    #[test]
    fn test_direct_strategy_on_plain_thread() {
        assert_eq!(WaitStrategy::detect(), WaitStrategy::Direct);
    }

    #[tokio::test]
    async fn test_invoke_from_current_thread_runtime() {
        assert_eq!(WaitStrategy::detect(), WaitStrategy::HelperThread);
        let bridge = CallBridge::default();
        let value = bridge
            .invoke(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<_, BoxError>(7)
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(bridge.stats().reentrant_calls, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ambient_runtime_is_borrowed_and_left_running() {
        let bridge = CallBridge::new(BridgeConfig {
            loop_source: LoopSource::Ambient,
            ..Default::default()
        });
        bridge.acquire().unwrap();
        assert_eq!(bridge.owns_runtime(), Some(false));

        let value = bridge.invoke(async { Ok::<_, BoxError>(3) }).unwrap();
        assert_eq!(value, 3);

        bridge.close();
        let still_running = tokio::spawn(async { 5 }).await.unwrap();
        assert_eq!(still_running, 5);
    }
}
