//! Render worker pool for parallel page rendering.
//!
//! An ordered page list is split into contiguous batches, one per worker, and
//! each batch is pushed onto a shared channel. Workers pull batches and render
//! their pages sequentially in the given order; batches run in parallel with
//! each other. A page failure is reported and the batch moves on.

use crate::generation::Generation;
use podium_cache::{Artifact, CacheError, CacheKey, RenderCache, RenderScale};
use podium_document::{DocumentError, DocumentHandle, DocumentSource};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Invoked on a worker thread when a page has a ready artifact.
pub type FinishedCallback = Arc<dyn Fn(u32, &Artifact) + Send + Sync>;

/// Invoked on a worker thread when a page could not be rendered or stored.
pub type ErrorCallback = Arc<dyn Fn(u32, &str) + Send + Sync>;

/// Failure for a single page
#[derive(Debug, thiserror::Error)]
pub enum PageRenderError {
    #[error("render failed: {0}")]
    Render(#[from] DocumentError),
    #[error("cache write failed: {0}")]
    Cache(#[from] CacheError),
}

/// Configuration for the render worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    /// Default: number of logical CPU cores.
    pub num_workers: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { num_workers: num_cpus() }
    }
}

impl WorkerPoolConfig {
    /// Zero is raised to one worker.
    pub fn new(num_workers: usize) -> Self {
        Self { num_workers: num_workers.max(1) }
    }
}

/// What a batch renders from and where it stores the result
#[derive(Clone)]
pub struct RenderTarget {
    pub source: Arc<dyn DocumentSource>,
    pub handle: DocumentHandle,
    pub cache: RenderCache,
    pub scale: RenderScale,
}

/// One dispatch: the target, the generation it belongs to and the callbacks
/// its results go to. Shared by every batch split from the same page list.
pub struct RenderJob {
    pub target: RenderTarget,
    pub generation: u64,
    pub on_finished: FinishedCallback,
    pub on_error: ErrorCallback,
}

struct Batch {
    pages: Vec<u32>,
    job: Arc<RenderJob>,
}

/// Worker pool counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Batches handed to workers
    pub batches: u64,
    /// Pages answered from the cache without a render call
    pub cache_hits: u64,
    /// Pages rendered and stored
    pub rendered: u64,
    /// Pages that failed to render or store
    pub failed: u64,
    /// Pages skipped because their generation went stale
    pub discarded: u64,
}

#[derive(Default)]
struct Counters {
    batches: AtomicU64,
    cache_hits: AtomicU64,
    rendered: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            batches: self.batches.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            rendered: self.rendered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Number of batches queued or running, with a condvar to wait for zero.
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, n: usize) {
        *self.lock() += n;
    }

    fn done(&self) {
        let mut count = self.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.lock();
        while *count > 0 {
            count = self.idle.wait(count).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Marks its batch finished on drop, including when a callback unwinds.
struct BatchGuard<'a>(&'a InFlight);

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.done();
    }
}

struct Shared {
    generation: Generation,
    in_flight: InFlight,
    counters: Counters,
}

/// Fixed-size pool of render worker threads.
///
/// Submitting is non-blocking. [`WorkerPool::wait_for_all`] blocks until
/// every submitted batch has finished, stale ones included.
pub struct WorkerPool {
    sender: Option<flume::Sender<Batch>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Spawns the worker threads. Batches whose generation no longer matches
    /// `generation` are discarded by the workers.
    pub fn new(config: WorkerPoolConfig, generation: Generation) -> Self {
        let (sender, receiver) = flume::unbounded::<Batch>();
        let shared = Arc::new(Shared {
            generation,
            in_flight: InFlight::default(),
            counters: Counters::default(),
        });

        let mut workers = Vec::with_capacity(config.num_workers);
        for id in 0..config.num_workers.max(1) {
            let receiver = receiver.clone();
            let shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("podium-render-worker-{id}"))
                .spawn(move || worker_loop(id, &receiver, &shared));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => log::error!("failed to spawn render worker {id}: {err}"),
            }
        }

        Self { sender: Some(sender), workers, shared }
    }

    /// Get the number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Splits `pages` into batches and queues them. Returns the number of
    /// batches queued; an empty page list queues nothing.
    pub fn submit(&self, pages: Vec<u32>, job: RenderJob) -> usize {
        let Some(sender) = &self.sender else {
            log::warn!("render pool is shut down, dropping {} pages", pages.len());
            return 0;
        };
        if pages.is_empty() {
            return 0;
        }

        let job = Arc::new(job);
        let batches = split_batches(&pages, self.num_workers().max(1));
        let count = batches.len();
        self.shared.in_flight.add(count);

        for pages in batches {
            if sender.send(Batch { pages, job: job.clone() }).is_err() {
                self.shared.in_flight.done();
            }
        }

        self.shared.counters.batches.fetch_add(count as u64, Ordering::Relaxed);
        log::info!(
            "queued {} pages in {count} batches (generation {})",
            pages.len(),
            job.generation
        );
        count
    }

    /// Blocks until no batch is queued or running.
    pub fn wait_for_all(&self) {
        self.shared.in_flight.wait_idle();
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.counters.snapshot()
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.is_none()
    }

    /// Lets queued batches drain, then joins every worker. Idempotent.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("render worker panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Splits `pages` into contiguous batches of `max(1, ceil(len / workers))`
/// pages, preserving order.
pub fn split_batches(pages: &[u32], workers: usize) -> Vec<Vec<u32>> {
    if pages.is_empty() {
        return Vec::new();
    }
    let size = pages.len().div_ceil(workers.max(1)).max(1);
    pages.chunks(size).map(<[u32]>::to_vec).collect()
}

fn worker_loop(id: usize, receiver: &flume::Receiver<Batch>, shared: &Shared) {
    log::debug!("render worker {id} started");

    while let Ok(batch) = receiver.recv() {
        let _guard = BatchGuard(&shared.in_flight);
        run_batch(&batch, shared);
    }

    log::debug!("render worker {id} stopped");
}

enum PageOutcome {
    Ready(Artifact),
    Failed(PageRenderError),
    Stale,
}

fn run_batch(batch: &Batch, shared: &Shared) {
    let job = &batch.job;

    for &page in &batch.pages {
        match render_page(job, page, &shared.generation, &shared.counters) {
            PageOutcome::Ready(artifact) => (job.on_finished)(page, &artifact),
            PageOutcome::Failed(err) => {
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("page {page} failed: {err}");
                (job.on_error)(page, &err.to_string());
            }
            PageOutcome::Stale => {
                shared.counters.discarded.fetch_add(1, Ordering::Relaxed);
                log::debug!("discarding page {page} from stale generation {}", job.generation);
            }
        }
    }
}

fn render_page(job: &RenderJob, page: u32, generation: &Generation, counters: &Counters) -> PageOutcome {
    let target = &job.target;
    let key = CacheKey::new(page, target.scale);

    if let Some(artifact) = target.cache.lookup(&key) {
        counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        return if generation.is_current(job.generation) {
            PageOutcome::Ready(artifact)
        } else {
            PageOutcome::Stale
        };
    }

    if !generation.is_current(job.generation) {
        return PageOutcome::Stale;
    }

    // Another batch owns this key; a redundant render is harmless.
    if !target.cache.begin_render(&key) {
        log::debug!("{key} already rendering elsewhere");
    }

    let bytes = match target.source.render(target.handle, page, target.scale.get()) {
        Ok(bytes) => bytes,
        Err(err) => {
            target.cache.mark_failed(&key, err.to_string());
            return PageOutcome::Failed(err.into());
        }
    };

    if !generation.is_current(job.generation) {
        target.cache.mark_failed(&key, "discarded: stale generation");
        return PageOutcome::Stale;
    }

    match target.cache.store(&key, &bytes) {
        Ok(artifact) => {
            counters.rendered.fetch_add(1, Ordering::Relaxed);
            log::debug!("rendered {key}");
            PageOutcome::Ready(artifact)
        }
        Err(err) => PageOutcome::Failed(err.into()),
    }
}

/// Get the number of logical CPU cores.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
