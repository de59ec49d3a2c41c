//! Render scheduler
//!
//! Combines the ordering policy, the worker pool and the render bookkeeping
//! for one presentation: which pages are rendered, which are in flight, and
//! how far along the current document is.

use crate::generation::Generation;
use crate::priority::{ascending_order, priority_order};
use crate::worker::{
    ErrorCallback, FinishedCallback, PoolStats, RenderJob, RenderTarget, WorkerPool,
    WorkerPoolConfig,
};
use podium_cache::Artifact;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Receives per-page results from the workers.
///
/// Called on worker threads, concurrently. Every call carries the generation
/// the work was submitted under, so a receiver can re-check it against its
/// own state before publishing.
pub trait RenderListener: Send + Sync {
    fn page_ready(&self, generation: u64, page: u32, artifact: &Artifact);
    fn page_failed(&self, generation: u64, page: u32, message: &str);
    fn progress(&self, generation: u64, progress: RenderProgress);
}

/// Rendered pages out of the document's total
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderProgress {
    pub completed: usize,
    pub total: u32,
}

impl RenderProgress {
    pub fn is_complete(&self) -> bool {
        self.completed >= self.total as usize
    }
}

/// Which pages a dispatch covers and in what order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPlan {
    /// Tiered order around a focus page
    AroundFocus(u32),
    /// Every page, ascending
    All,
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Pages handed to the pool
    pub submitted: u64,

    /// Pages that came back with a ready artifact
    pub completed: u64,

    /// Pages that came back failed
    pub failed: u64,

    /// Pages whose result was dropped because their generation went stale
    pub discarded: u64,

    /// Pages currently in flight for the active generation
    pub in_flight: usize,

    /// Pages rendered for the active generation
    pub rendered: usize,
}

impl SchedulerStats {
    /// Get the number of pages still pending across all generations
    pub fn pending(&self) -> u64 {
        self.submitted
            .saturating_sub(self.completed)
            .saturating_sub(self.failed)
            .saturating_sub(self.discarded)
    }
}

struct TrackerState {
    generation: u64,
    total_pages: u32,
    rendered: BTreeSet<u32>,
    in_flight: HashSet<u32>,
    stats: SchedulerStats,
}

/// Rendered-set and in-flight set for the active generation.
///
/// Results tagged with any other generation are counted as discarded and
/// otherwise ignored, so a straggler can never mark a page of the current
/// document as rendered.
pub struct RenderTracker {
    state: Mutex<TrackerState>,
}

impl Default for RenderTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                generation: 0,
                total_pages: 0,
                rendered: BTreeSet::new(),
                in_flight: HashSet::new(),
                stats: SchedulerStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Empties both sets and switches to `generation`. Cumulative counters
    /// are kept.
    pub fn reset(&self, generation: u64, total_pages: u32) {
        let mut state = self.lock();
        state.generation = generation;
        state.total_pages = total_pages;
        state.rendered.clear();
        state.in_flight.clear();
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn total_pages(&self) -> u32 {
        self.lock().total_pages
    }

    /// Orders the pages `plan` covers, leaving out rendered and in-flight
    /// ones, and marks the result in flight.
    pub fn claim(&self, plan: RenderPlan) -> (u64, Vec<u32>) {
        let mut state = self.lock();

        let pages = {
            let skip = |page: u32| state.rendered.contains(&page) || state.in_flight.contains(&page);
            match plan {
                RenderPlan::AroundFocus(focus) => priority_order(focus, state.total_pages, skip),
                RenderPlan::All => ascending_order(state.total_pages, skip),
            }
        };

        state.in_flight.extend(pages.iter().copied());
        state.stats.submitted += pages.len() as u64;
        (state.generation, pages)
    }

    /// Hands back pages claimed under `generation` that never reached a
    /// worker.
    pub fn release(&self, generation: u64, pages: &[u32]) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }

        for page in pages {
            if state.in_flight.remove(page) {
                state.stats.submitted = state.stats.submitted.saturating_sub(1);
            }
        }
    }

    /// Records a ready page. Returns the new progress, or `None` if the
    /// result belongs to a stale generation.
    pub fn complete(&self, generation: u64, page: u32) -> Option<RenderProgress> {
        let mut state = self.lock();
        if state.generation != generation {
            state.stats.discarded += 1;
            return None;
        }

        state.in_flight.remove(&page);
        if page < state.total_pages {
            state.rendered.insert(page);
        }
        state.stats.completed += 1;

        Some(RenderProgress { completed: state.rendered.len(), total: state.total_pages })
    }

    /// Records a failed page, leaving it eligible for the next dispatch.
    /// Returns `false` if the result belongs to a stale generation.
    pub fn fail(&self, generation: u64, page: u32) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            state.stats.discarded += 1;
            return false;
        }

        state.in_flight.remove(&page);
        state.rendered.remove(&page);
        state.stats.failed += 1;
        true
    }

    pub fn is_rendered(&self, page: u32) -> bool {
        self.lock().rendered.contains(&page)
    }

    pub fn is_in_flight(&self, page: u32) -> bool {
        self.lock().in_flight.contains(&page)
    }

    /// Rendered pages in ascending order
    pub fn rendered_pages(&self) -> Vec<u32> {
        self.lock().rendered.iter().copied().collect()
    }

    pub fn progress(&self) -> RenderProgress {
        let state = self.lock();
        RenderProgress { completed: state.rendered.len(), total: state.total_pages }
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.lock();
        SchedulerStats {
            in_flight: state.in_flight.len(),
            rendered: state.rendered.len(),
            ..state.stats.clone()
        }
    }
}

/// Background page renderer for one presentation session.
///
/// Owns the worker pool and the generation counter. Submissions are
/// non-blocking; results reach the [`RenderListener`].
pub struct RenderScheduler {
    pool: WorkerPool,
    generation: Generation,
    tracker: Arc<RenderTracker>,
    listener: Arc<dyn RenderListener>,
    target: Mutex<Option<RenderTarget>>,
}

impl RenderScheduler {
    /// Starts the pool. `generation` is shared with whoever needs to check
    /// result freshness on their side of the listener.
    pub fn new(
        config: WorkerPoolConfig,
        generation: Generation,
        listener: Arc<dyn RenderListener>,
    ) -> Self {
        let pool = WorkerPool::new(config, generation.clone());
        log::info!("render scheduler started with {} workers", pool.num_workers());

        Self {
            pool,
            generation,
            tracker: Arc::new(RenderTracker::new()),
            listener,
            target: Mutex::new(None),
        }
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    pub fn num_workers(&self) -> usize {
        self.pool.num_workers()
    }

    fn target_slot(&self) -> MutexGuard<'_, Option<RenderTarget>> {
        self.target.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn target(&self) -> Option<RenderTarget> {
        self.target_slot().clone()
    }

    /// Starts a new generation for `target` with `total_pages` pages.
    ///
    /// In-flight batches keep running but their results are discarded.
    /// Returns the new generation.
    pub fn reset(&self, target: Option<RenderTarget>, total_pages: u32) -> u64 {
        let generation = self.generation.advance();
        self.tracker.reset(generation, total_pages);
        *self.target_slot() = target;
        log::info!("render generation {generation}: {total_pages} pages");
        generation
    }

    /// Forgets the rendered-set and in-flight set for the current target.
    pub fn clear(&self) -> u64 {
        let generation = self.generation.advance();
        self.tracker.reset(generation, self.tracker.total_pages());
        log::info!("render bookkeeping cleared, generation {generation}");
        generation
    }

    /// Schedules the tiered order around `focus`. Returns the number of
    /// pages dispatched.
    pub fn render_priority_pages(&self, focus: u32) -> usize {
        self.dispatch(RenderPlan::AroundFocus(focus))
    }

    /// Schedules every page not yet rendered, ascending.
    pub fn render_all_pages(&self) -> usize {
        self.dispatch(RenderPlan::All)
    }

    fn dispatch(&self, plan: RenderPlan) -> usize {
        let Some(target) = self.target() else {
            log::debug!("no document loaded, nothing to render");
            return 0;
        };

        let (generation, pages) = self.tracker.claim(plan);
        let count = pages.len();
        if count == 0 {
            return 0;
        }

        log::debug!("dispatching {plan:?}: {pages:?}");
        if self.pool.submit(pages.clone(), self.job(target, generation)) == 0 {
            self.tracker.release(generation, &pages);
            return 0;
        }
        count
    }

    fn job(&self, target: RenderTarget, generation: u64) -> RenderJob {
        let on_finished: FinishedCallback = {
            let tracker = self.tracker.clone();
            let listener = self.listener.clone();
            Arc::new(move |page: u32, artifact: &Artifact| {
                if let Some(progress) = tracker.complete(generation, page) {
                    listener.page_ready(generation, page, artifact);
                    listener.progress(generation, progress);
                }
            })
        };

        let on_error: ErrorCallback = {
            let tracker = self.tracker.clone();
            let listener = self.listener.clone();
            Arc::new(move |page: u32, message: &str| {
                if tracker.fail(generation, page) {
                    listener.page_failed(generation, page, message);
                }
            })
        };

        RenderJob { target, generation, on_finished, on_error }
    }

    pub fn is_page_rendered(&self, page: u32) -> bool {
        self.tracker.is_rendered(page)
    }

    pub fn rendered_pages(&self) -> Vec<u32> {
        self.tracker.rendered_pages()
    }

    pub fn progress(&self) -> RenderProgress {
        self.tracker.progress()
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.tracker.stats();
        stats.discarded += self.pool.stats().discarded;
        stats
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Blocks until every submitted batch has finished.
    pub fn wait_for_all(&self) {
        self.pool.wait_for_all();
    }

    /// Drains the queue and joins the workers. Later submissions are dropped.
    pub fn shutdown(&mut self) {
        if self.pool.is_shut_down() {
            return;
        }
        self.pool.shutdown();
        log::info!("render scheduler stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.pool.is_shut_down()
    }
}
