//! Bounded-concurrency compression pool.
//!
//! [`CompressionPool::submit`] hands one revision to a rayon worker and blocks
//! the caller while `capacity` revisions are already compressing, so a fast
//! parser can never run ahead of the codec by more than the pool size. Workers
//! park their results in a shared completion list; the submitting thread
//! delivers them to the [`CompressionListener`] on its next `submit` or on
//! [`CompressionPool::close`]. The listener therefore never runs on a worker
//! thread and needs no synchronisation of its own.

use crate::codec::{Codec, CodecTag, CompressedPayload};
use crate::config::{default_workers, DELTA_HISTORY_WINDOW, STATS_LOG_EVERY_FLUSHES};
use crate::error::{CodecError, Result};
use crate::listener::CompressionListener;
use crate::models::{PageRecord, RevisionRecord};
use crate::stats::CompressionStats;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// One unit of work for a pool worker.
struct CompressionTask {
    page: Arc<PageRecord>,
    revision: RevisionRecord,
    parent_text: Option<Arc<str>>,
}

impl CompressionTask {
    fn run<C: Codec>(self, codec: &C) -> CompressedRevision {
        let text = self.revision.text.as_str();
        let parent = self.parent_text.as_deref();
        let result = panic::catch_unwind(AssertUnwindSafe(|| codec.compress(text, parent)))
            .unwrap_or_else(|panic| Err(CodecError::Panicked(panic_message(panic.as_ref()))));
        if let Err(err) = &result {
            warn!(
                page = self.page.id,
                revision = self.revision.id,
                error = %err,
                "Compression failed"
            );
        }
        CompressedRevision {
            page: self.page,
            revision: self.revision,
            result,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A revision after its codec ran. A codec failure is carried in `result`
/// rather than dropping the revision.
#[derive(Debug)]
pub struct CompressedRevision {
    pub page: Arc<PageRecord>,
    pub revision: RevisionRecord,
    pub result: std::result::Result<CompressedPayload, CodecError>,
}

impl CompressedRevision {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn payload(&self) -> Option<&CompressedPayload> {
        self.result.as_ref().ok()
    }

    pub fn tag(&self) -> Option<CodecTag> {
        self.payload().map(|payload| payload.tag)
    }

    pub fn compressed_len(&self) -> Option<usize> {
        self.payload().map(|payload| payload.bytes.len())
    }
}

#[derive(Default)]
struct PoolState {
    in_flight: usize,
    completed: Vec<CompressedRevision>,
    stats: CompressionStats,
    flushes: u64,
}

struct Shared {
    state: Mutex<PoolState>,
    slot_freed: Condvar,
}

impl Shared {
    /// Workers never panic while holding the lock, so a poisoned state is
    /// still consistent.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, done: CompressedRevision) {
        let mut state = self.lock();
        state.stats.record(&done);
        state.completed.push(done);
        state.in_flight -= 1;
        drop(state);
        self.slot_freed.notify_all();
    }

    fn wait_idle(&self) -> MutexGuard<'_, PoolState> {
        let mut state = self.lock();
        while state.in_flight > 0 {
            state = self
                .slot_freed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state
    }
}

/// Recent revision texts of the page being submitted, keyed by revision id.
/// Parent lookups only ever need the current page, so the window resets when
/// the page changes.
struct ParentHistory {
    page_id: Option<u64>,
    texts: FxHashMap<u64, Arc<str>>,
    order: VecDeque<u64>,
    window: usize,
}

impl ParentHistory {
    fn new(window: usize) -> Self {
        Self {
            page_id: None,
            texts: FxHashMap::default(),
            order: VecDeque::with_capacity(window),
            window,
        }
    }

    /// Returns the parent's text, if still in the window, and records this
    /// revision's text for its successors.
    fn remember(&mut self, page_id: u64, revision: &RevisionRecord) -> Option<Arc<str>> {
        if self.page_id != Some(page_id) {
            self.texts.clear();
            self.order.clear();
            self.page_id = Some(page_id);
        }
        let parent = revision
            .has_parent()
            .then(|| self.texts.get(&revision.parent_id).cloned())
            .flatten();

        if self.window > 0 {
            self.texts
                .insert(revision.id, Arc::from(revision.text.as_str()));
            self.order.push_back(revision.id);
            while self.order.len() > self.window {
                if let Some(evicted) = self.order.pop_front() {
                    self.texts.remove(&evicted);
                }
            }
        }
        parent
    }
}

pub struct PoolBuilder<C> {
    codec: C,
    capacity: usize,
    history_window: usize,
}

impl<C: Codec> PoolBuilder<C> {
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            capacity: default_workers(),
            history_window: DELTA_HISTORY_WINDOW,
        }
    }

    /// Maximum number of revisions compressing at once. Values below 1 are
    /// raised to 1.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Number of recent revision texts per page kept for parent-relative codecs.
    pub fn history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn build<L: CompressionListener>(self, listener: L) -> Result<CompressionPool<C, L>> {
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(self.capacity)
            .thread_name(|i| format!("wikistream-compress-{i}"))
            .build()?;
        info!(capacity = self.capacity, "Compression pool started");
        Ok(CompressionPool {
            codec: Arc::new(self.codec),
            listener,
            capacity: self.capacity,
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState::default()),
                slot_freed: Condvar::new(),
            }),
            workers,
            history: ParentHistory::new(self.history_window),
            closed: false,
        })
    }
}

pub struct CompressionPool<C, L: CompressionListener> {
    codec: Arc<C>,
    listener: L,
    capacity: usize,
    shared: Arc<Shared>,
    workers: rayon::ThreadPool,
    history: ParentHistory,
    closed: bool,
}

impl<C: Codec, L: CompressionListener> CompressionPool<C, L> {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn stats(&self) -> CompressionStats {
        self.shared.lock().stats
    }

    /// Schedules one revision, blocking while the pool is at capacity.
    /// Completed results are delivered to the listener before returning.
    pub fn submit(&mut self, page: &Arc<PageRecord>, revision: RevisionRecord) -> Result<()> {
        let parent_text = if self.codec.uses_parent() {
            self.history.remember(page.id, &revision)
        } else {
            None
        };

        {
            let mut state = self.shared.lock();
            while state.in_flight >= self.capacity {
                state = self
                    .shared
                    .slot_freed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            state.in_flight += 1;
            state.stats.submitted += 1;
            state.stats.peak_in_flight = state.stats.peak_in_flight.max(state.in_flight);
        }

        let task = CompressionTask {
            page: Arc::clone(page),
            revision,
            parent_text,
        };
        let codec = Arc::clone(&self.codec);
        let shared = Arc::clone(&self.shared);
        self.workers.spawn(move || shared.complete(task.run(codec.as_ref())));

        self.flush()
    }

    /// Waits for every submitted revision, delivers the remaining results and
    /// returns the final totals. Calling it again only returns the totals.
    pub fn close(&mut self) -> Result<CompressionStats> {
        drop(self.shared.wait_idle());
        self.flush()?;
        if !self.closed {
            self.closed = true;
            let stats = self.stats();
            info!(
                revisions = stats.completed,
                failed = stats.failed,
                raw_bytes = stats.uncompressed_bytes,
                compressed_bytes = stats.compressed_bytes,
                ratio = stats.ratio(),
                "Compression pool closed"
            );
        }
        Ok(self.stats())
    }

    fn flush(&mut self) -> Result<()> {
        let (batch, snapshot) = {
            let mut state = self.shared.lock();
            if state.completed.is_empty() {
                return Ok(());
            }
            state.flushes += 1;
            let snapshot =
                (state.flushes % STATS_LOG_EVERY_FLUSHES == 0).then_some(state.stats);
            (std::mem::take(&mut state.completed), snapshot)
        };

        if let Some(stats) = snapshot {
            info!(
                revisions = stats.completed,
                failed = stats.failed,
                ratio = stats.ratio(),
                "Compression progress"
            );
        }
        debug!(delivered = batch.len(), "Flushing compressed revisions");
        let mut pending = batch.into_iter();
        while let Some(done) = pending.next() {
            if let Err(err) = self.listener.on_revision_compressed(&done) {
                // Undelivered results go back to the front and are retried on
                // the next submit or close.
                let mut requeue: Vec<_> = std::iter::once(done).chain(pending).collect();
                let requeued = requeue.len();
                let mut state = self.shared.lock();
                requeue.append(&mut state.completed);
                state.completed = requeue;
                drop(state);
                warn!(requeued, error = %err, "Compression listener failed");
                return Err(err.into());
            }
        }
        Ok(())
    }
}

impl<C, L: CompressionListener> Drop for CompressionPool<C, L> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let state = self.shared.wait_idle();
        if !state.completed.is_empty() {
            warn!(
                undelivered = state.completed.len(),
                "Compression pool dropped without close; results discarded"
            );
        }
    }
}
