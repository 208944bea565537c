//! Async Store
//!
//! Write-behind decorator over any [`BinaryStoreManager`].
//!
//! ## Behavior
//! - `store` / `erase` queue the operation and return
//! - `load` answers from the queue first (read-your-writes)
//! - A drain thread per store applies entries to the inner store in order
//! - `close` drains everything already accepted before returning
//!
//! ## Backpressure
//! ```text
//!   caller ──store──▶ [ bytes_in_flight + size <= limit ? ] ──▶ queue ──▶ worker ──▶ inner
//!                              │ no
//!                              ▼
//!                     wait for the worker to free bytes
//! ```
//! A store larger than the whole limit waits until its key is idle and is
//! then written through on the caller's thread. Erases cost nothing.

mod queue;
mod worker;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::Sender;
use parking_lot::{Condvar, Mutex};

use crate::error::{RealizeResult, StoreError, StoreResult};
use crate::store::{BinaryStore, BinaryStoreManager, Keys};

use queue::{PendingOp, QueueState};

// =============================================================================
// Configuration
// =============================================================================

/// In-flight byte budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncLimit {
    Bounded(u64),
    /// Callers never block; memory use is not bounded
    Unbounded,
}

impl AsyncLimit {
    /// Interpret a configured `async-limit`; any non-positive value is
    /// unbounded
    pub fn from_configured(limit: i64) -> Self {
        if limit <= 0 {
            AsyncLimit::Unbounded
        } else {
            AsyncLimit::Bounded(limit as u64)
        }
    }

    pub fn bytes(&self) -> Option<u64> {
        match self {
            AsyncLimit::Bounded(n) => Some(*n),
            AsyncLimit::Unbounded => None,
        }
    }
}

/// Retry schedule for failed drains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per entry, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): doubles each time
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// An entry the worker gave up on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainFailure {
    pub key: Bytes,
    /// "store" or "erase"
    pub operation: &'static str,
    pub attempts: u32,
    pub error: String,
}

/// Point-in-time queue counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AsyncStats {
    pub bytes_in_flight: u64,
    /// Queued plus draining entries
    pub pending: usize,
    /// Entries given up on since the store was created
    pub failures: u64,
}

// =============================================================================
// Manager
// =============================================================================

/// Manager wrapping every store of an inner manager in an [`AsyncStore`]
pub struct AsyncStoreManager {
    inner: Box<dyn BinaryStoreManager>,
    limit: AsyncLimit,
    retry: RetryPolicy,
    failures: Option<Sender<DrainFailure>>,
    next_store: AtomicU32,
}

impl AsyncStoreManager {
    pub fn new(inner: Box<dyn BinaryStoreManager>, limit: AsyncLimit) -> Self {
        tracing::info!("async store manager over {} (limit {:?})", inner.kind(), limit);
        Self {
            inner,
            limit,
            retry: RetryPolicy::default(),
            failures: None,
            next_store: AtomicU32::new(0),
        }
    }

    /// Report entries the worker gives up on to `sink`
    pub fn with_failure_sink(mut self, sink: Sender<DrainFailure>) -> Self {
        self.failures = Some(sink);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn limit(&self) -> AsyncLimit {
        self.limit
    }

    /// The wrapped manager
    pub fn inner(&self) -> &dyn BinaryStoreManager {
        self.inner.as_ref()
    }

    pub fn open_store(&self) -> RealizeResult<AsyncStore> {
        let n = self.next_store.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.create_store()?;
        AsyncStore::spawn(
            format!("async-{}:{}", self.inner.kind(), n),
            inner,
            self.limit,
            self.retry,
            self.failures.clone(),
        )
    }
}

impl BinaryStoreManager for AsyncStoreManager {
    fn create_store(&self) -> RealizeResult<Box<dyn BinaryStore>> {
        Ok(Box::new(self.open_store()?))
    }

    fn kind(&self) -> &'static str {
        "async"
    }
}

impl std::fmt::Debug for AsyncStoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncStoreManager")
            .field("inner", &self.inner.kind())
            .field("limit", &self.limit)
            .field("retry", &self.retry)
            .finish()
    }
}

// =============================================================================
// Store
// =============================================================================

/// State shared between callers and the drain worker
pub(crate) struct Shared {
    pub name: String,
    pub inner: Box<dyn BinaryStore>,
    pub state: Mutex<QueueState>,
    /// Signalled whenever bytes are released, a key goes idle or the store
    /// closes
    pub changed: Condvar,
    /// Signalled when the worker has something to do
    pub work: Condvar,
    pub limit: AsyncLimit,
    pub retry: RetryPolicy,
    pub failures: Option<Sender<DrainFailure>>,
}

/// Write-behind store
///
/// ## Concurrency
/// - All queue state lives under one mutex; `bytes_in_flight` is only
///   changed while holding it
/// - The inner store is always called without the mutex held; while
///   `erase_all` runs, writers wait and loads read through
pub struct AsyncStore {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncStore {
    fn spawn(
        name: String,
        inner: Box<dyn BinaryStore>,
        limit: AsyncLimit,
        retry: RetryPolicy,
        failures: Option<Sender<DrainFailure>>,
    ) -> RealizeResult<Self> {
        let shared = Arc::new(Shared {
            name,
            inner,
            state: Mutex::new(QueueState::default()),
            changed: Condvar::new(),
            work: Condvar::new(),
            limit,
            retry,
            failures,
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("gridstore-drain-{}", shared.name))
            .spawn(move || worker::run(worker_shared))?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn stats(&self) -> AsyncStats {
        let state = self.shared.state.lock();
        AsyncStats {
            bytes_in_flight: state.bytes_in_flight(),
            pending: state.queued(),
            failures: state.failures,
        }
    }

    pub fn limit(&self) -> AsyncLimit {
        self.shared.limit
    }

    /// Block until every accepted operation has been applied
    pub fn flush(&self) -> StoreResult<()> {
        let mut state = self.shared.state.lock();
        while !state.is_idle() {
            if state.closed {
                return Err(StoreError::Closed);
            }
            self.shared.changed.wait(&mut state);
        }
        Ok(())
    }

    fn closed_error(state: &QueueState) -> StoreResult<()> {
        if state.closing {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn drain_failed(state: &QueueState) -> StoreError {
        StoreError::DrainFailed(
            state
                .last_failure
                .clone()
                .unwrap_or_else(|| "inner store rejected a queued write".to_string()),
        )
    }

    /// Store larger than the whole budget: wait for the key to go idle, then
    /// apply it directly
    fn write_through(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let shared = &self.shared;
        let key = Bytes::copy_from_slice(key);
        {
            let mut state = shared.state.lock();
            let epoch = state.failure_epoch;
            loop {
                Self::closed_error(&state)?;
                if state.failure_epoch != epoch {
                    return Err(Self::drain_failed(&state));
                }
                if state.is_key_idle(&key) {
                    break;
                }
                shared.changed.wait(&mut state);
            }
            state.begin_write_through(key.clone());
        }

        tracing::debug!(
            "{}: writing {} bytes through (limit {:?})",
            shared.name,
            key.len() + value.len(),
            shared.limit
        );
        let result = shared.inner.store(&key, value);

        shared.state.lock().end_write_through(&key);
        shared.changed.notify_all();
        result
    }
}

impl BinaryStore for AsyncStore {
    fn load(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        {
            let state = self.shared.state.lock();
            if state.closed {
                return Err(StoreError::Closed);
            }
            if let Some(queued) = state.lookup(key) {
                return Ok(queued);
            }
        }
        self.shared.inner.load(key)
    }

    fn store(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let shared = &self.shared;
        let size = (key.len() + value.len()) as u64;

        if let Some(limit) = shared.limit.bytes() {
            if size > limit {
                return self.write_through(key, value);
            }
        }

        let mut state = shared.state.lock();
        let epoch = state.failure_epoch;
        loop {
            Self::closed_error(&state)?;
            if state.failure_epoch != epoch {
                return Err(Self::drain_failed(&state));
            }

            if !state.is_written_through(key) && !state.is_clearing() {
                let fits = match shared.limit.bytes() {
                    Some(limit) => state.bytes_in_flight() - state.pending_size(key) + size <= limit,
                    None => true,
                };
                if fits {
                    break;
                }
            }
            shared.changed.wait(&mut state);
        }

        state.enqueue(
            Bytes::copy_from_slice(key),
            PendingOp::Store(Bytes::copy_from_slice(value)),
            size,
        );
        drop(state);
        shared.work.notify_one();
        Ok(())
    }

    fn erase(&self, key: &[u8]) -> StoreResult<()> {
        let shared = &self.shared;

        let mut state = shared.state.lock();
        loop {
            Self::closed_error(&state)?;
            if !state.is_written_through(key) && !state.is_clearing() {
                break;
            }
            shared.changed.wait(&mut state);
        }

        state.enqueue(Bytes::copy_from_slice(key), PendingOp::Erase, 0);
        drop(state);
        shared.work.notify_one();
        // Replacing a pending store may have freed bytes
        shared.changed.notify_all();
        Ok(())
    }

    fn erase_all(&self) -> StoreResult<()> {
        let shared = &self.shared;

        let mut state = shared.state.lock();
        loop {
            Self::closed_error(&state)?;
            if state.is_idle() {
                break;
            }
            shared.changed.wait(&mut state);
        }

        // Writers wait while the flag is set; loads go straight through
        state.begin_clear();
        drop(state);

        let result = shared.inner.erase_all();

        shared.state.lock().end_clear();
        shared.changed.notify_all();
        result
    }

    fn keys(&self) -> StoreResult<Keys> {
        let overlay = {
            let state = self.shared.state.lock();
            if state.closed {
                return Err(StoreError::Closed);
            }
            state.overlay()
        };

        let mut keys: Vec<Bytes> = self
            .shared
            .inner
            .keys()?
            .filter(|key| !overlay.contains_key(key))
            .collect();

        keys.extend(
            overlay
                .into_iter()
                .filter_map(|(key, present)| present.then_some(key)),
        );
        Ok(Box::new(keys.into_iter()))
    }

    fn close(&self) -> StoreResult<()> {
        let shared = &self.shared;

        {
            let mut state = shared.state.lock();
            if state.closed {
                return Ok(());
            }
            if !state.closing {
                tracing::debug!(
                    "{}: closing, draining {} entries ({} bytes)",
                    shared.name,
                    state.queued(),
                    state.bytes_in_flight()
                );
                state.closing = true;
            }
        }
        shared.work.notify_all();
        shared.changed.notify_all();

        let handle = self.worker.lock().take();
        let Some(handle) = handle else {
            // Another thread is closing; wait for it to finish
            let mut state = shared.state.lock();
            while !state.closed {
                shared.changed.wait(&mut state);
            }
            return Ok(());
        };

        let joined = handle.join();

        let failures = {
            let mut state = shared.state.lock();
            if joined.is_err() {
                let dropped = state.abandon();
                tracing::error!(
                    "{}: drain worker died, dropping {} queued entries",
                    shared.name,
                    dropped
                );
            }
            while !state.is_idle() {
                // Only an in-progress write-through can remain
                shared.changed.wait(&mut state);
            }
            state.closed = true;
            state.failures
        };
        shared.changed.notify_all();

        if joined.is_err() {
            tracing::error!("{}: drain worker panicked", shared.name);
            let _ = shared.inner.close();
            return Err(StoreError::Engine("drain worker panicked".to_string()));
        }

        tracing::debug!("{}: closed ({} drain failures)", shared.name, failures);
        shared.inner.close()
    }

    fn destroy(&self) -> StoreResult<()> {
        self.close()?;
        self.shared.inner.destroy()
    }
}

impl Drop for AsyncStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("{}: close on drop failed: {}", self.shared.name, e);
        }
    }
}

impl std::fmt::Debug for AsyncStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncStore")
            .field("name", &self.shared.name)
            .field("limit", &self.shared.limit)
            .field("stats", &self.stats())
            .finish()
    }
}
