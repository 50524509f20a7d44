//! Single-flight enrichment queue.
//!
//! Photo ids wait in an in-memory FIFO. One worker thread at most drains it,
//! so there is never more than one provider call in progress. The catalog
//! lock is only held for the short reads and writes around that call.

use anyhow::anyhow;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::provider::DescriptionProvider;
use crate::db::{lock_catalog, SharedCatalog};
use crate::error::CatalogError;

/// What the queue is doing right now, for progress displays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    /// Waiting ids, head first.
    pub queued: Vec<i64>,
    pub in_flight: Option<i64>,
}

impl QueueSnapshot {
    pub fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_none()
    }

    pub fn outstanding(&self) -> usize {
        self.queued.len() + usize::from(self.in_flight.is_some())
    }
}

#[derive(Debug, Default)]
struct QueueState {
    queued: VecDeque<i64>,
    members: HashSet<i64>,
    in_flight: Option<i64>,
    worker_running: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    /// Signalled when the worker exits.
    idle: Condvar,
    catalog: SharedCatalog,
    provider: Arc<dyn DescriptionProvider>,
}

#[derive(Clone)]
pub struct EnrichmentQueue {
    shared: Arc<Shared>,
}

impl EnrichmentQueue {
    pub fn new(catalog: SharedCatalog, provider: Arc<dyn DescriptionProvider>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                idle: Condvar::new(),
                catalog,
                provider,
            }),
        }
    }

    /// Queue every id that still needs a description and start the worker
    /// if it is not running. Ids that are completed, processing, missing,
    /// already queued or in flight are skipped. Returns how many were added.
    pub fn enqueue(&self, ids: &[i64]) -> usize {
        if ids.is_empty() {
            return 0;
        }

        let eligible: Vec<i64> = {
            let catalog = lock_catalog(&self.shared.catalog);
            ids.iter()
                .copied()
                .filter(|&id| match catalog.status_of(id) {
                    Ok(Some(status)) => status.is_enqueueable(),
                    Ok(None) => {
                        debug!(photo_id = id, "Not enqueueing missing photo");
                        false
                    }
                    Err(e) => {
                        error!(photo_id = id, error = %e, "Failed to read photo status");
                        false
                    }
                })
                .collect()
        };

        let mut state = self.shared.lock_state();
        let mut added = 0;
        for id in eligible {
            if state.in_flight == Some(id) || !state.members.insert(id) {
                continue;
            }
            state.queued.push_back(id);
            added += 1;
        }
        if added > 0 {
            debug!(added, queued = state.queued.len(), "Enqueued photos for enrichment");
        }

        Shared::drain(&self.shared, &mut state);
        added
    }

    /// Start the worker if there is queued work and no worker is running.
    pub fn drain(&self) {
        let mut state = self.shared.lock_state();
        Shared::drain(&self.shared, &mut state);
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.shared.lock_state();
        QueueSnapshot {
            queued: state.queued.iter().copied().collect(),
            in_flight: state.in_flight,
        }
    }

    /// Block until the worker has drained the queue.
    pub fn wait_idle(&self) {
        let state = self.shared.lock_state();
        let _state = self
            .shared
            .idle
            .wait_while(state, |s| s.worker_running)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Like [`wait_idle`](Self::wait_idle) but gives up after `timeout`.
    /// Returns true if the queue went idle.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let state = self.shared.lock_state();
        let (_state, result) = self
            .shared
            .idle
            .wait_timeout_while(state, timeout, |s| s.worker_running)
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }

    /// Drop everything still queued and wait for the in-flight photo to finish.
    /// Dropped photos keep their `pending`/`failed` status and are picked up
    /// again the next time the project is opened.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.lock_state();
            let dropped = state.queued.len();
            state.queued.clear();
            state.members.clear();
            if dropped > 0 {
                info!(dropped, "Enrichment queue shut down with work outstanding");
            }
        }
        self.wait_idle();
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain(shared: &Arc<Shared>, state: &mut QueueState) {
        if state.worker_running || state.queued.is_empty() {
            return;
        }
        state.worker_running = true;

        let worker = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name("enrichment".to_string())
            .spawn(move || worker.run());
        if let Err(e) = spawned {
            error!(error = %e, "Failed to start enrichment worker");
            state.worker_running = false;
        }
    }

    fn run(&self) {
        debug!("Enrichment worker started");
        let mut state = self.lock_state();
        loop {
            let Some(id) = state.queued.pop_front() else {
                state.worker_running = false;
                drop(state);
                self.idle.notify_all();
                debug!("Enrichment worker idle");
                return;
            };
            state.members.remove(&id);
            state.in_flight = Some(id);
            drop(state);

            self.process(id);

            state = self.lock_state();
            state.in_flight = None;
        }
    }

    fn process(&self, photo_id: i64) {
        let path = match lock_catalog(&self.catalog).claim_for_processing(photo_id) {
            Ok(Some(path)) => path,
            Ok(None) => {
                debug!(photo_id, "Photo no longer needs a description");
                return;
            }
            Err(e) => {
                error!(photo_id, error = %e, "Failed to claim photo");
                return;
            }
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.provider.describe_image(Path::new(&path))
        }))
        .unwrap_or_else(|_| Err(anyhow!("{} provider panicked", self.provider.provider_name())));

        let mut catalog = lock_catalog(&self.catalog);
        let failure = match result {
            Ok(text) => match catalog.commit_description(photo_id, &text) {
                Ok(()) => {
                    info!(photo_id, path = %path, "Description stored");
                    return;
                }
                Err(CatalogError::EmptyDescription) => "provider returned an empty description".to_string(),
                Err(e) => {
                    error!(photo_id, error = %e, "Failed to store description");
                    e.to_string()
                }
            },
            Err(e) => format!("{:#}", e),
        };

        warn!(photo_id, path = %path, error = %failure, "Enrichment failed");
        if let Err(e) = catalog.mark_failed(photo_id) {
            error!(photo_id, error = %e, "Failed to mark photo as failed");
        }
    }
}
