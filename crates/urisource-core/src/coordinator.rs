//! In-flight request deduplication.
//!
//! At most one fetch per [`ResourceKey`] runs at any instant. The first
//! caller for a key starts the fetch on a spawned task; callers arriving
//! while it runs join it and receive the same outcome.
//!
//! ```text
//! Caller A ─┐
//!           │                              spawned
//! Caller B ─┼──► FetchCoordinator ───────► fetch task
//!           │         │                        │
//! Caller C ─┘         │                        │
//!                     ▼                        ▼
//!               [A, B, C all             remove entry,
//!                receive same  ◄──────── then broadcast
//!                outcome]
//! ```
//!
//! The entry is removed from the table before the outcome is broadcast, so a
//! caller arriving after completion always starts a fresh fetch. Results are
//! not remembered here; caching is the facade's concern.
//!
//! Individual callers may cancel without affecting other joiners. When the
//! last interested caller goes away, the shared fetch is cancelled too.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{FetchError, FetchResult};
use crate::key::ResourceKey;
use crate::types::ImagePayload;

/// Outcome of one fetch, shared by every caller that joined it.
pub type FetchOutcome = FetchResult<ImagePayload>;

/// Bookkeeping for a fetch that is currently executing.
struct InFlightEntry {
    /// Distinguishes this fetch from a later one for the same key.
    generation: u64,
    sender: broadcast::Sender<FetchOutcome>,
    /// Callers still waiting on the outcome.
    interest: AtomicUsize,
    /// Cancels the shared fetch once nobody is interested.
    cancel: CancellationToken,
}

type InFlightTable = DashMap<ResourceKey, InFlightEntry>;

/// Statistics for monitoring dedup effectiveness.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Total calls to [`FetchCoordinator::acquire_or_join`].
    pub total_requests: u64,
    /// Calls that joined an in-flight fetch.
    pub joined_requests: u64,
    /// Calls that started a new fetch.
    pub started_fetches: u64,
}

impl CoordinatorStats {
    /// Fraction of requests served by joining (0.0 to 1.0).
    pub fn join_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.joined_requests as f64 / self.total_requests as f64
        }
    }
}

/// Deduplicates concurrent fetches by key.
///
/// Cheap to clone; clones share the same in-flight table.
#[derive(Clone, Default)]
pub struct FetchCoordinator {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    in_flight: InFlightTable,
    next_generation: AtomicU64,
    total_requests: AtomicU64,
    joined_requests: AtomicU64,
    started_fetches: AtomicU64,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("in_flight", &self.inner.in_flight.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl FetchCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fetch for `key`, or join the one already running.
    ///
    /// `request_fn` is only invoked when a new fetch starts. It receives the
    /// shared fetch's cancellation token, which fires when every interested
    /// caller has cancelled. The returned future must be `'static` because it
    /// runs on its own task.
    ///
    /// `cancel` governs only this caller's wait.
    pub async fn acquire_or_join<F, Fut>(
        &self,
        key: ResourceKey,
        uri: &str,
        cancel: &CancellationToken,
        request_fn: F,
    ) -> FetchOutcome
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = FetchOutcome> + Send + 'static,
    {
        let inner = &self.inner;
        inner.total_requests.fetch_add(1, Ordering::Relaxed);

        let (mut receiver, generation, start) = match inner.in_flight.entry(key) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get();
                if entry.cancel.is_cancelled() {
                    // Abandoned by all its callers; it will only ever yield
                    // Cancelled, so start over.
                    let (fresh, receiver) = self.new_entry();
                    let generation = fresh.generation;
                    let token = fresh.cancel.clone();
                    occupied.insert(fresh);
                    (receiver, generation, Some(token))
                } else {
                    entry.interest.fetch_add(1, Ordering::AcqRel);
                    inner.joined_requests.fetch_add(1, Ordering::Relaxed);
                    debug!(%key, uri, "joining in-flight fetch");
                    (entry.sender.subscribe(), entry.generation, None)
                }
            }
            Entry::Vacant(vacant) => {
                let (fresh, receiver) = self.new_entry();
                let generation = fresh.generation;
                let token = fresh.cancel.clone();
                vacant.insert(fresh);
                (receiver, generation, Some(token))
            }
        };

        // Declared before the fetch is spawned so that if anything below
        // unwinds, our interest is still released.
        let _interest = InterestGuard {
            table: Arc::clone(inner),
            key,
            generation,
        };

        if let Some(token) = start {
            inner.started_fetches.fetch_add(1, Ordering::Relaxed);
            debug!(
                %key,
                uri,
                in_flight = inner.in_flight.len(),
                "starting fetch"
            );

            let fetch = request_fn(token);
            let completion = CompletionGuard {
                table: Arc::clone(inner),
                key,
                generation,
            };
            tokio::spawn(async move {
                let outcome = fetch.await;
                completion.complete(outcome);
            });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%key, uri, "caller cancelled while waiting");
                Err(FetchError::Cancelled { uri: uri.to_string() })
            }
            received = receiver.recv() => match received {
                Ok(outcome) => outcome,
                Err(_) => Err(FetchError::TransientNetwork {
                    uri: uri.to_string(),
                    attempts: 0,
                    message: "fetch task ended without an outcome".to_string(),
                }),
            },
        }
    }

    fn new_entry(&self) -> (InFlightEntry, broadcast::Receiver<FetchOutcome>) {
        // One message is ever sent per entry.
        let (sender, receiver) = broadcast::channel(1);
        let entry = InFlightEntry {
            generation: self.inner.next_generation.fetch_add(1, Ordering::Relaxed),
            sender,
            interest: AtomicUsize::new(1),
            cancel: CancellationToken::new(),
        };
        (entry, receiver)
    }

    /// Whether a fetch for `key` is currently running.
    pub fn is_in_flight(&self, key: ResourceKey) -> bool {
        self.inner.in_flight.contains_key(&key)
    }

    /// Number of fetches currently running.
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Snapshot of the statistics counters.
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            total_requests: self.inner.total_requests.load(Ordering::Relaxed),
            joined_requests: self.inner.joined_requests.load(Ordering::Relaxed),
            started_fetches: self.inner.started_fetches.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            total_requests = stats.total_requests,
            joined = stats.joined_requests,
            started = stats.started_fetches,
            in_flight = self.in_flight_count(),
            join_ratio = format!("{:.1}%", stats.join_ratio() * 100.0),
            "fetch coordinator statistics"
        );
    }
}

/// Owned by the fetch task. Removes the entry and publishes the outcome;
/// on drop without an outcome (panic, runtime shutdown) it still removes the
/// entry so no ghost blocks later fetches.
struct CompletionGuard {
    table: Arc<Inner>,
    key: ResourceKey,
    generation: u64,
}

impl CompletionGuard {
    fn complete(self, outcome: FetchOutcome) {
        if let Some((_, entry)) = self.remove() {
            let waiters = entry.sender.receiver_count();
            // Nobody listening is fine; every caller may have cancelled.
            let _ = entry.sender.send(outcome);
            debug!(key = %self.key, waiters, "fetch outcome delivered");
        }
    }

    fn remove(&self) -> Option<(ResourceKey, InFlightEntry)> {
        self.table
            .in_flight
            .remove_if(&self.key, |_, entry| entry.generation == self.generation)
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        // No-op after `complete`; otherwise dropping the sender closes the
        // channel and waiters see a failure.
        self.remove();
    }
}

/// Held by each waiting caller.
struct InterestGuard {
    table: Arc<Inner>,
    key: ResourceKey,
    generation: u64,
}

impl Drop for InterestGuard {
    fn drop(&mut self) {
        if let Some(entry) = self.table.in_flight.get(&self.key) {
            if entry.generation == self.generation
                && entry.interest.fetch_sub(1, Ordering::AcqRel) == 1
            {
                debug!(key = %self.key, "no callers left, cancelling shared fetch");
                entry.cancel.cancel();
            }
        }
    }
}
