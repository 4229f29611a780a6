//! Admission tracker for Storyframe
//!
//! A process-wide FIFO of waiting requests plus the set of requests that
//! currently hold a processing slot. Each enqueue hands back a [`Ticket`]
//! whose one-shot channel resolves to an [`ActiveGuard`] once the request
//! reaches the head of the line. Dropping the guard frees the slot and
//! hands it to the next eligible entry.
//!
//! Both structures live behind one mutex. The lock is never held while a
//! guard is dropped, since dropping a guard takes the lock again.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use storyframe_config::QueueConfig;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Error type for admission operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The same source from the same requester is already waiting or running
    #[error("Request for {source_id} from {requester} is already queued")]
    AlreadyQueued { requester: String, source_id: String },

    /// The tracker dropped the entry without granting it a turn
    #[error("Admission queue closed")]
    Closed,
}

/// A request waiting for a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub requester: String,
    /// Transport handle of the source; half of the duplicate key
    pub source_id: String,
    /// Source file name as the requester sent it
    pub file_name: String,
    pub enqueued_at: SystemTime,
}

/// A request holding a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveProcessRecord {
    pub requester: String,
    pub source_id: String,
    pub file_name: String,
    pub started_at: SystemTime,
}

/// Point-in-time view of the tracker
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionSnapshot {
    pub capacity: usize,
    pub queued: Vec<QueueEntry>,
    pub active: Vec<ActiveProcessRecord>,
}

struct Waiting {
    id: u64,
    entry: QueueEntry,
    tx: oneshot::Sender<ActiveGuard>,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Waiting>,
    active: HashMap<String, ActiveProcessRecord>,
    next_id: u64,
}

struct Inner {
    state: Mutex<State>,
    capacity: usize,
    per_item: Duration,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// FIFO admission with a fixed number of concurrent slots
#[derive(Clone)]
pub struct AdmissionTracker {
    inner: Arc<Inner>,
}

impl AdmissionTracker {
    pub fn new(capacity: usize, per_item: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                capacity: capacity.max(1),
                per_item,
            }),
        }
    }

    pub fn from_config(cfg: &QueueConfig) -> Self {
        Self::new(cfg.capacity, Duration::from_secs(cfg.per_item_estimate_secs))
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// [`enqueue_file`](Self::enqueue_file) with the source id doubling as
    /// its file name.
    pub fn enqueue(
        &self,
        requester: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Result<Ticket, AdmissionError> {
        let source_id = source_id.into();
        self.enqueue_file(requester, source_id.clone(), source_id)
    }

    /// Join the queue. The returned ticket may already be granted when a
    /// slot was free, in which case its position is 0.
    pub fn enqueue_file(
        &self,
        requester: impl Into<String>,
        source_id: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Result<Ticket, AdmissionError> {
        let requester = requester.into();
        let source_id = source_id.into();
        let file_name = file_name.into();
        let (tx, rx) = oneshot::channel();

        let id = {
            let mut state = self.inner.lock();

            let duplicate = state
                .queue
                .iter()
                .any(|w| w.entry.requester == requester && w.entry.source_id == source_id)
                || state
                    .active
                    .get(&requester)
                    .is_some_and(|r| r.source_id == source_id);
            if duplicate {
                return Err(AdmissionError::AlreadyQueued {
                    requester,
                    source_id,
                });
            }

            let id = state.next_id;
            state.next_id += 1;
            state.queue.push_back(Waiting {
                id,
                entry: QueueEntry {
                    requester: requester.clone(),
                    source_id: source_id.clone(),
                    file_name,
                    enqueued_at: SystemTime::now(),
                },
                tx,
            });
            id
        };

        pump(&self.inner);

        let position = self
            .inner
            .lock()
            .queue
            .iter()
            .position(|w| w.id == id)
            .map(|idx| idx + 1)
            .unwrap_or(0);

        debug!(%requester, %source_id, position, "request enqueued");

        Ok(Ticket {
            id,
            position,
            estimated_wait: u32::try_from(position)
                .ok()
                .and_then(|n| self.inner.per_item.checked_mul(n))
                .unwrap_or(Duration::MAX),
            rx: Some(rx),
            inner: Arc::clone(&self.inner),
        })
    }

    /// Number of requests still waiting
    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn active_records(&self) -> Vec<ActiveProcessRecord> {
        let mut records: Vec<_> = self.inner.lock().active.values().cloned().collect();
        records.sort_by_key(|r| r.started_at);
        records
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        let state = self.inner.lock();
        let mut active: Vec<_> = state.active.values().cloned().collect();
        active.sort_by_key(|r| r.started_at);
        AdmissionSnapshot {
            capacity: self.inner.capacity,
            queued: state.queue.iter().map(|w| w.entry.clone()).collect(),
            active,
        }
    }
}

/// Grant free slots to the oldest entries whose requester is not already
/// active. Runs until no slot or no eligible entry is left.
fn pump(inner: &Arc<Inner>) {
    loop {
        let (tx, guard) = {
            let mut state = inner.lock();
            let st = &mut *state;

            if st.active.len() >= inner.capacity {
                return;
            }

            st.queue.retain(|w| !w.tx.is_closed());

            let Some(idx) = st
                .queue
                .iter()
                .position(|w| !st.active.contains_key(&w.entry.requester))
            else {
                return;
            };
            let Some(waiting) = st.queue.remove(idx) else {
                return;
            };

            let requester = waiting.entry.requester.clone();
            st.active.insert(
                requester.clone(),
                ActiveProcessRecord {
                    requester: requester.clone(),
                    source_id: waiting.entry.source_id.clone(),
                    file_name: waiting.entry.file_name.clone(),
                    started_at: SystemTime::now(),
                },
            );

            let guard = ActiveGuard {
                inner: Arc::clone(inner),
                requester,
                released: false,
            };
            (waiting.tx, guard)
        };

        // The receiver went away between the check and the send
        if let Err(mut guard) = tx.send(guard) {
            guard.released = true;
            inner.lock().active.remove(&guard.requester);
        }
    }
}

/// Place in line for one request
pub struct Ticket {
    id: u64,
    position: usize,
    estimated_wait: Duration,
    rx: Option<oneshot::Receiver<ActiveGuard>>,
    inner: Arc<Inner>,
}

impl Ticket {
    /// 1-based place among waiting entries at enqueue time, 0 if granted
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn estimated_wait(&self) -> Duration {
        self.estimated_wait
    }

    /// Wait until this request holds a slot.
    pub async fn wait_turn(mut self) -> Result<ActiveGuard, AdmissionError> {
        let rx = self.rx.take().ok_or(AdmissionError::Closed)?;
        rx.await.map_err(|_| AdmissionError::Closed)
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let id = self.id;
        self.inner.lock().queue.retain(|w| w.id != id);
    }
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("id", &self.id)
            .field("position", &self.position)
            .field("estimated_wait", &self.estimated_wait)
            .finish()
    }
}

/// Proof that a request holds a slot; dropping it releases the slot
pub struct ActiveGuard {
    inner: Arc<Inner>,
    requester: String,
    released: bool,
}

impl ActiveGuard {
    pub fn requester(&self) -> &str {
        &self.requester
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.inner.lock().active.remove(&self.requester);
        info!(requester = %self.requester, "slot released");
        pump(&self.inner);
    }
}

impl std::fmt::Debug for ActiveGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveGuard")
            .field("requester", &self.requester)
            .finish()
    }
}
