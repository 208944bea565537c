//! Drain Worker
//!
//! One thread per [`super::AsyncStore`]: takes the oldest pending entry,
//! applies it to the inner store (retrying with backoff) and releases its
//! bytes. Exits once the store is closing and the queue is empty.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;

use crate::error::StoreError;

use super::queue::{Draining, PendingOp};
use super::{DrainFailure, Shared};

pub(crate) fn run(shared: Arc<Shared>) {
    tracing::debug!("{}: drain worker started", shared.name);

    loop {
        let entry = {
            let mut state = shared.state.lock();
            while state.is_empty() && !state.closing {
                shared.work.wait(&mut state);
            }
            match state.pop() {
                Some(entry) => entry,
                None => break,
            }
        };

        let outcome = apply_with_retry(&shared, &entry);

        let mut state = shared.state.lock();
        state.finish_drain();
        if let Err((attempts, error)) = outcome {
            let message = format!(
                "{} of key {:?} failed after {} attempts: {}",
                entry.op.name(),
                entry.key,
                attempts,
                error
            );
            tracing::error!("{}: {}", shared.name, message);

            state.failure_epoch += 1;
            state.failures += 1;
            state.last_failure = Some(message);

            if let Some(sink) = &shared.failures {
                let failure = DrainFailure {
                    key: entry.key.clone(),
                    operation: entry.op.name(),
                    attempts,
                    error: error.to_string(),
                };
                if sink.send(failure).is_err() {
                    tracing::debug!("{}: drain failure receiver dropped", shared.name);
                }
            }
        }
        drop(state);
        shared.changed.notify_all();
    }

    tracing::debug!("{}: drain worker stopped", shared.name);
}

fn apply(shared: &Shared, key: &Bytes, op: &PendingOp) -> Result<(), StoreError> {
    match op {
        PendingOp::Store(value) => shared.inner.store(key, value),
        PendingOp::Erase => shared.inner.erase(key),
    }
}

/// Apply `entry`, retrying per the store's policy.
///
/// A panic in the inner store is caught and reported like any other
/// failure, without retrying. Returns the attempt count and last error on
/// failure.
fn apply_with_retry(shared: &Shared, entry: &Draining) -> Result<(), (u32, StoreError)> {
    let mut attempt = 1;
    loop {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| apply(shared, &entry.key, &entry.op)));
        match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(StoreError::Closed)) => return Err((attempt, StoreError::Closed)),
            Ok(Err(e)) if attempt < shared.retry.max_attempts => {
                let backoff = shared.retry.backoff(attempt);
                tracing::warn!(
                    "{}: {} attempt {} failed ({}), retrying in {:?}",
                    shared.name,
                    entry.op.name(),
                    attempt,
                    e,
                    backoff
                );
                thread::sleep(backoff);
                attempt += 1;
            }
            Ok(Err(e)) => return Err((attempt, e)),
            Err(payload) => {
                let message = format!("inner store panicked: {}", panic_message(&*payload));
                return Err((attempt, StoreError::Engine(message)));
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
