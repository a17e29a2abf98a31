//! Page translation scheduler.
//!
//! [`PageTranslator`] owns the pending queue and the processed marks. Text jobs
//! discovered near the viewport are queued, coalesced by a restartable debounce
//! timer, and sent to the [`BatchTranslator`] in fixed-size batches, one batch
//! at a time. Results are applied only if the node is still on the page and the
//! feature has not been toggled since the batch was taken.

use crate::ai::BatchTranslator;
use crate::discovery::{Discovery, TextJob};
use crate::dom::{lock_document, NodeId, SharedDocument};
use crate::viewport::{Layout, Rect, ViewportObserver};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
pub const DEFAULT_ROOT_MARGIN: f64 = 200.0;

#[derive(Debug, Clone, PartialEq)]
pub struct PageTranslateOptions {
    /// Maximum jobs per translator call (at least 1)
    pub batch_size: usize,
    /// Quiet period after the last enqueue before a batch is taken
    pub debounce: Duration,
    /// Lookahead around the viewport, in pixels
    pub root_margin: f64,
}

impl Default for PageTranslateOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            debounce: DEFAULT_DEBOUNCE,
            root_margin: DEFAULT_ROOT_MARGIN,
        }
    }
}

/// Jobs taken from the queue for one translator call.
#[derive(Debug)]
struct Batch {
    cycle: u64,
    jobs: Vec<TextJob>,
}

#[derive(Debug)]
struct DebounceTimer {
    seq: u64,
    handle: JoinHandle<()>,
}

struct State {
    enabled: bool,
    /// Bumped on every enable/disable; batches from older cycles are discarded.
    cycle: u64,
    in_flight: bool,
    pending: IndexMap<NodeId, String>,
    discovery: Discovery,
    observer: ViewportObserver,
    timer: Option<DebounceTimer>,
    timer_seq: u64,
}

struct Inner {
    document: SharedDocument,
    translator: Arc<dyn BatchTranslator>,
    options: PageTranslateOptions,
    state: Mutex<State>,
    idle: Notify,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Background translation of a page's visible prose.
///
/// Cheap to clone; clones share the same queue and document. Methods that may
/// start the debounce timer must be called from inside a Tokio runtime.
#[derive(Clone)]
pub struct PageTranslator {
    inner: Arc<Inner>,
}

impl PageTranslator {
    pub fn new(
        document: SharedDocument,
        translator: Arc<dyn BatchTranslator>,
        mut options: PageTranslateOptions,
    ) -> Self {
        options.batch_size = options.batch_size.max(1);
        let observer = ViewportObserver::new(options.root_margin);
        Self {
            inner: Arc::new(Inner {
                document,
                translator,
                options,
                state: Mutex::new(State {
                    enabled: false,
                    cycle: 0,
                    in_flight: false,
                    pending: IndexMap::new(),
                    discovery: Discovery::new(),
                    observer,
                    timer: None,
                    timer_seq: 0,
                }),
                idle: Notify::new(),
            }),
        }
    }

    pub fn document(&self) -> SharedDocument {
        Arc::clone(&self.inner.document)
    }

    pub fn options(&self) -> &PageTranslateOptions {
        &self.inner.options
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock_state().enabled
    }

    /// Turn page translation on or off. Returns true if the state changed.
    ///
    /// Enabling scans the whole body. Disabling stops future passes, empties the
    /// queue, revokes processed marks and removes every annotation; a batch
    /// already in flight completes and is discarded.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let mut state = self.inner.lock_state();
        if state.enabled == enabled {
            return false;
        }
        state.enabled = enabled;
        state.cycle += 1;

        if enabled {
            let body = lock_document(&self.inner.document).body();
            let observed = observe_subtree(&self.inner, &mut state, body);
            info!("📖 Page translation enabled ({} elements observed)", observed);
        } else {
            let removed = teardown(&self.inner, &mut state);
            info!("📖 Page translation disabled ({} annotations removed)", removed);
        }

        drop(state);
        self.inner.idle.notify_waiters();
        true
    }

    /// Flip the enabled state. Returns the new state.
    pub fn toggle(&self) -> bool {
        let enabled = !self.is_enabled();
        self.set_enabled(enabled);
        enabled
    }

    /// Rescan the whole body for elements to observe.
    pub fn scan(&self) -> usize {
        let body = lock_document(&self.inner.document).body();
        self.scan_subtree(body)
    }

    /// Observe candidate elements under `root`, e.g. after content was added.
    ///
    /// Returns how many elements were found. No-op while disabled.
    pub fn scan_subtree(&self, root: NodeId) -> usize {
        let mut state = self.inner.lock_state();
        if !state.enabled {
            return 0;
        }
        observe_subtree(&self.inner, &mut state, root)
    }

    /// Deliver a viewport update. Observed elements intersecting the viewport
    /// (grown by the root margin) are collected and their text queued.
    ///
    /// Returns the number of jobs added to the queue.
    pub fn on_viewport(&self, viewport: Rect, layout: &dyn Layout) -> usize {
        let mut state = self.inner.lock_state();
        if !state.enabled {
            return 0;
        }
        let hits = state.observer.take_intersecting(viewport, layout);
        if hits.is_empty() {
            return 0;
        }
        let jobs = {
            let document = lock_document(&self.inner.document);
            let mut jobs = Vec::new();
            for element in hits {
                jobs.extend(state.discovery.collect(&document, element));
            }
            jobs
        };
        enqueue(&self.inner, &mut state, jobs)
    }

    /// Treat `element` as visible right away.
    pub fn reveal(&self, element: NodeId) -> usize {
        let mut state = self.inner.lock_state();
        if !state.enabled {
            return 0;
        }
        state.observer.unobserve(element);
        let jobs = {
            let document = lock_document(&self.inner.document);
            state.discovery.collect(&document, element)
        };
        enqueue(&self.inner, &mut state, jobs)
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock_state().pending.len()
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.lock_state().in_flight
    }

    pub fn observed_len(&self) -> usize {
        self.inner.lock_state().observer.len()
    }

    pub fn processed_len(&self) -> usize {
        self.inner.lock_state().discovery.marks().len()
    }

    /// No timer armed and no batch in flight.
    pub fn is_idle(&self) -> bool {
        let state = self.inner.lock_state();
        state.timer.is_none() && !state.in_flight
    }

    /// Wait until the scheduler is idle.
    pub async fn settle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

fn observe_subtree(inner: &Inner, state: &mut State, root: NodeId) -> usize {
    let candidates = {
        let document = lock_document(&inner.document);
        state.observer.prune_detached(&document);
        state.discovery.scan(&document, root)
    };
    for element in &candidates {
        state.observer.observe(*element);
    }
    candidates.len()
}

/// Add jobs not already pending and restart the debounce if any were added.
fn enqueue(inner: &Arc<Inner>, state: &mut State, jobs: Vec<TextJob>) -> usize {
    let mut added = 0;
    for job in jobs {
        if !state.pending.contains_key(&job.node) {
            state.pending.insert(job.node, job.text);
            added += 1;
        }
    }
    if added > 0 {
        debug!("Queued {} jobs ({} pending)", added, state.pending.len());
        arm(inner, state);
    }
    added
}

/// (Re)start the debounce timer.
fn arm(inner: &Arc<Inner>, state: &mut State) {
    if let Some(previous) = state.timer.take() {
        previous.handle.abort();
    }
    state.timer_seq += 1;
    let seq = state.timer_seq;
    let deadline = tokio::time::Instant::now() + inner.options.debounce;
    let task_inner = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        fire(task_inner, seq).await;
    });
    state.timer = Some(DebounceTimer { seq, handle });
}

async fn fire(inner: Arc<Inner>, seq: u64) {
    let batch = {
        let mut state = inner.lock_state();
        // A newer arm replaced this timer
        if state.timer.as_ref().map(|t| t.seq) != Some(seq) {
            return;
        }
        // Detach from the handle so later arms cannot abort a running pass
        state.timer = None;
        take_batch(&inner.options, &mut state)
    };

    match batch {
        Some(batch) => run_pass(inner, batch).await,
        None => inner.idle.notify_waiters(),
    }
}

fn take_batch(options: &PageTranslateOptions, state: &mut State) -> Option<Batch> {
    if state.in_flight || !state.enabled || state.pending.is_empty() {
        return None;
    }
    let count = options.batch_size.min(state.pending.len());
    let jobs: Vec<TextJob> = state
        .pending
        .drain(..count)
        .map(|(node, text)| TextJob { node, text })
        .collect();
    state.in_flight = true;
    Some(Batch {
        cycle: state.cycle,
        jobs,
    })
}

/// Clears the in-flight flag even if the pass is dropped mid-await.
struct InFlightGuard {
    inner: Arc<Inner>,
    finished: bool,
}

impl InFlightGuard {
    /// End the pass and schedule the next one if work remains.
    fn finish(mut self) {
        self.finished = true;
        let mut state = self.inner.lock_state();
        state.in_flight = false;
        if state.enabled && !state.pending.is_empty() {
            arm(&self.inner, &mut state);
        }
        drop(state);
        self.inner.idle.notify_waiters();
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.inner.lock_state().in_flight = false;
        self.inner.idle.notify_waiters();
    }
}

async fn run_pass(inner: Arc<Inner>, batch: Batch) {
    let guard = InFlightGuard {
        inner: Arc::clone(&inner),
        finished: false,
    };

    let texts: Vec<String> = batch.jobs.iter().map(|job| job.text.clone()).collect();
    debug!("Translating batch of {} segments", texts.len());

    match inner.translator.translate_batch(&texts).await {
        Ok(translations) => {
            let applied = apply_outcome(&inner, &batch, &translations);
            debug!("Applied {}/{} translations", applied, batch.jobs.len());
        }
        Err(e) => {
            warn!("Batch translation failed, dropping {} jobs: {}", batch.jobs.len(), e);
        }
    }

    guard.finish();
}

/// Insert annotations for a finished batch. Returns how many were inserted.
fn apply_outcome(inner: &Inner, batch: &Batch, translations: &[String]) -> usize {
    if translations.len() != batch.jobs.len() {
        warn!(
            "Translator returned {} results for {} segments, discarding batch",
            translations.len(),
            batch.jobs.len()
        );
        return 0;
    }

    let state = inner.lock_state();
    if !state.enabled || state.cycle != batch.cycle {
        debug!(
            "Discarding batch from cycle {} (now cycle {}, enabled: {})",
            batch.cycle, state.cycle, state.enabled
        );
        return 0;
    }

    let mut document = lock_document(&inner.document);
    let mut applied = 0;
    for (job, translation) in batch.jobs.iter().zip(translations) {
        let translation = translation.trim();
        if translation.is_empty() || translation == job.text {
            continue;
        }
        if !document.is_attached(job.node) {
            debug!("Node for '{}' left the page, skipping", job.text);
            continue;
        }
        if document.insert_annotation_after(job.node, translation).is_some() {
            applied += 1;
        }
    }
    applied
}

/// Stop everything and restore the page. Returns the number of annotations removed.
fn teardown(inner: &Inner, state: &mut State) -> usize {
    if let Some(timer) = state.timer.take() {
        timer.handle.abort();
    }
    state.pending.clear();
    state.discovery.reset();
    state.observer.clear();
    lock_document(&inner.document).remove_annotations()
}
