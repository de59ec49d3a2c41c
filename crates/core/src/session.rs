//! Presentation session
//!
//! Wires a document source, the render scheduler, the render cache and the
//! shared state hub together for one presentation. Navigation updates the hub
//! and re-prioritises background rendering around the new current page;
//! rendered pages flow back into the hub from the worker threads.

use crate::config::{ConfigError, ViewerConfig};
use crate::state::{EventKind, NavigationState, SharedState, StateEvent, SubscriptionId, ViewMode};
use podium_cache::{document_namespace, Artifact, CacheError, RenderCache, RenderScale};
use podium_document::{DocumentError, DocumentHandle, DocumentSource, LopdfEngine};
use podium_scheduler::{
    Generation, RenderListener, RenderProgress, RenderScheduler, RenderTarget, SchedulerStats,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to open {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: DocumentError,
    },
    #[error("failed to fingerprint {path}")]
    Fingerprint {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no document loaded")]
    NoDocument,
}

pub type SessionResult<T> = Result<T, SessionError>;

/// `error` followed by each of its sources, colon separated
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn lock_hub(hub: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    hub.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publishes worker results into the hub.
///
/// The generation is re-checked while holding the hub lock. The session
/// advances the generation under the same lock, so a result that passes the
/// check always belongs to the document the hub currently shows.
struct HubListener {
    hub: Arc<Mutex<SharedState>>,
    generation: Generation,
}

impl RenderListener for HubListener {
    fn page_ready(&self, generation: u64, page: u32, artifact: &Artifact) {
        let mut hub = lock_hub(&self.hub);
        if self.generation.is_current(generation) {
            hub.set_page_artifact(page, artifact.clone());
        }
    }

    fn page_failed(&self, generation: u64, page: u32, message: &str) {
        let mut hub = lock_hub(&self.hub);
        if self.generation.is_current(generation) {
            hub.report_page_error(page, message);
        }
    }

    fn progress(&self, generation: u64, progress: RenderProgress) {
        let mut hub = lock_hub(&self.hub);
        if self.generation.is_current(generation) {
            hub.report_progress(progress.completed, progress.total);
        }
    }
}

struct LoadedDocument {
    path: PathBuf,
    handle: DocumentHandle,
    namespace: String,
    cache: RenderCache,
    page_count: u32,
}

/// One presentation: a document, its cache, and everything watching it.
pub struct PresentationSession {
    config: ViewerConfig,
    source: Arc<dyn DocumentSource>,
    hub: Arc<Mutex<SharedState>>,
    scheduler: RenderScheduler,
    scale: RenderScale,
    document: Option<LoadedDocument>,
}

impl PresentationSession {
    /// Session backed by the default `lopdf` engine.
    pub fn new(config: ViewerConfig) -> SessionResult<Self> {
        Self::with_source(config, Arc::new(LopdfEngine::new()))
    }

    pub fn with_source(config: ViewerConfig, source: Arc<dyn DocumentSource>) -> SessionResult<Self> {
        let config = config.validated()?;
        let hub = Arc::new(Mutex::new(SharedState::new()));
        let generation = Generation::new();
        let listener = Arc::new(HubListener { hub: hub.clone(), generation: generation.clone() });
        let scheduler = RenderScheduler::new(config.pool_config(), generation, listener);

        Ok(Self {
            scale: config.render_scale(),
            config,
            source,
            hub,
            scheduler,
            document: None,
        })
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// The hub, for views that subscribe themselves.
    ///
    /// Observers run with the hub locked and must not lock it again.
    pub fn hub(&self) -> Arc<Mutex<SharedState>> {
        self.hub.clone()
    }

    pub fn subscribe<I, F>(&self, kinds: I, observer: F) -> SubscriptionId
    where
        I: IntoIterator<Item = EventKind>,
        F: FnMut(&StateEvent, &NavigationState) + Send + 'static,
    {
        lock_hub(&self.hub).subscribe(kinds, observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock_hub(&self.hub).unsubscribe(id)
    }

    /// Copy of the current navigation state
    pub fn snapshot(&self) -> NavigationState {
        lock_hub(&self.hub).state().clone()
    }

    pub fn current_page(&self) -> Option<u32> {
        lock_hub(&self.hub).current_page()
    }

    pub fn page_count(&self) -> u32 {
        self.document.as_ref().map_or(0, |doc| doc.page_count)
    }

    pub fn document_path(&self) -> Option<&Path> {
        self.document.as_ref().map(|doc| doc.path.as_path())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.document.as_ref().map(|doc| doc.namespace.as_str())
    }

    pub fn cache(&self) -> Option<&RenderCache> {
        self.document.as_ref().map(|doc| &doc.cache)
    }

    pub fn is_loaded(&self) -> bool {
        self.document.is_some()
    }

    pub fn render_scale(&self) -> RenderScale {
        self.scale
    }

    fn target(&self, doc: &LoadedDocument) -> RenderTarget {
        RenderTarget {
            source: self.source.clone(),
            handle: doc.handle,
            cache: doc.cache.clone(),
            scale: self.scale,
        }
    }

    /// Replaces the current document with the one at `path`.
    ///
    /// The new document is opened before anything is torn down; if that
    /// fails the previous document stays loaded and `LoadingFailed` is
    /// published. On success the previous document's cache is cleared, the
    /// hub is reset to page 0 of the new document and rendering starts around
    /// it. Returns the new page count.
    pub fn load_document(&mut self, path: &Path) -> SessionResult<u32> {
        lock_hub(&self.hub).notify_loading_started();

        let next = match self.open_document(path) {
            Ok(next) => next,
            Err(err) => {
                log::error!("loading {} failed: {}", path.display(), error_chain(&err));
                lock_hub(&self.hub).notify_loading_failed(error_chain(&err));
                return Err(err);
            }
        };

        // No straggler may write into a cache that is about to be cleared.
        self.scheduler.wait_for_all();
        if let Some(previous) = self.document.take() {
            self.retire(previous, &next);
        }

        let page_count = next.page_count;
        let target = self.target(&next);
        {
            let mut hub = lock_hub(&self.hub);
            self.scheduler.reset(Some(target), page_count);
            hub.clear_page_artifacts();
            hub.set_total_pages(page_count);
            hub.set_current_page(0);
            hub.set_document_path(Some(next.path.clone()));
            hub.set_document_loaded(true);
        }

        log::info!(
            "loaded {} ({page_count} pages, namespace {})",
            next.path.display(),
            next.namespace
        );
        self.document = Some(next);
        self.scheduler.render_priority_pages(0);

        lock_hub(&self.hub).notify_loading_finished();
        Ok(page_count)
    }

    fn open_document(&self, path: &Path) -> SessionResult<LoadedDocument> {
        let handle = self
            .source
            .open(path)
            .map_err(|source| SessionError::Open { path: path.to_path_buf(), source })?;

        let opened = self.describe(path, handle);
        if opened.is_err() {
            if let Err(err) = self.source.close(handle) {
                log::warn!("closing handle {} failed: {err}", handle.raw());
            }
        }
        opened
    }

    fn describe(&self, path: &Path, handle: DocumentHandle) -> SessionResult<LoadedDocument> {
        let page_count = self.source.page_count(handle)?;
        let namespace = document_namespace(path)
            .map_err(|source| SessionError::Fingerprint { path: path.to_path_buf(), source })?;
        let cache = RenderCache::open(&self.config.cache_dir, &namespace)?;

        Ok(LoadedDocument { path: path.to_path_buf(), handle, namespace, cache, page_count })
    }

    /// Clears the outgoing document's artifacts and closes its handle.
    fn retire(&self, previous: LoadedDocument, next: &LoadedDocument) {
        // Reloading the same file shares a namespace; clear through the fresh
        // cache so its bookkeeping matches the emptied directory.
        let cache = if previous.namespace == next.namespace { &next.cache } else { &previous.cache };
        if let Err(err) = cache.clear() {
            log::warn!("clearing cache for {} failed: {err}", previous.path.display());
        }
        if let Err(err) = self.source.close(previous.handle) {
            log::warn!("closing {} failed: {err}", previous.path.display());
        }
    }

    /// Moves to `page` (clamped) and re-prioritises rendering around it.
    /// Returns `false` if the current page did not change.
    pub fn go_to_page(&self, page: i64) -> bool {
        let current = {
            let mut hub = lock_hub(&self.hub);
            if !hub.set_current_page(page) {
                return false;
            }
            hub.current_page()
        };

        if let Some(current) = current {
            self.scheduler.render_priority_pages(current);
        }
        true
    }

    pub fn next_page(&self) -> bool {
        match self.current_page() {
            Some(current) => self.go_to_page(i64::from(current) + 1),
            None => false,
        }
    }

    pub fn prev_page(&self) -> bool {
        match self.current_page() {
            Some(current) => self.go_to_page(i64::from(current) - 1),
            None => false,
        }
    }

    /// Ignored until a document is loaded.
    pub fn set_view_mode(&self, mode: ViewMode) -> bool {
        self.is_loaded() && lock_hub(&self.hub).set_view_mode(mode)
    }

    pub fn toggle_view_mode(&self) -> Option<ViewMode> {
        self.is_loaded().then(|| lock_hub(&self.hub).toggle_view_mode())
    }

    pub fn set_projector_open(&self, open: bool) -> bool {
        self.is_loaded() && lock_hub(&self.hub).set_projector_open(open)
    }

    /// Changes the render scale (clamped). A different scale starts a new
    /// generation: the rendered-set and artifact mapping are emptied and
    /// rendering restarts around the current page.
    pub fn set_render_scale(&mut self, scale: f32) -> bool {
        let scale = RenderScale::new(scale);
        if scale.millis() == self.scale.millis() {
            return false;
        }
        self.scale = scale;
        log::info!("render scale set to {scale}");

        let Some(doc) = &self.document else {
            return true;
        };

        let target = self.target(doc);
        let current = {
            let mut hub = lock_hub(&self.hub);
            self.scheduler.reset(Some(target), doc.page_count);
            hub.clear_page_artifacts();
            hub.current_page()
        };

        if let Some(current) = current {
            self.scheduler.render_priority_pages(current);
        }
        true
    }

    /// Schedules every page not yet rendered. Returns the number dispatched.
    pub fn render_all_pages(&self) -> usize {
        self.scheduler.render_all_pages()
    }

    /// Deletes every artifact of the current document and forgets what was
    /// rendered. Nothing is rescheduled.
    pub fn clear_cache(&self) -> SessionResult<()> {
        let doc = self.document.as_ref().ok_or(SessionError::NoDocument)?;

        self.scheduler.wait_for_all();
        doc.cache.clear()?;

        let mut hub = lock_hub(&self.hub);
        self.scheduler.clear();
        hub.clear_page_artifacts();
        Ok(())
    }

    /// Renders `page` straight from the source, bypassing the cache.
    pub fn render_page_uncached(&self, page: u32) -> SessionResult<Vec<u8>> {
        let doc = self.document.as_ref().ok_or(SessionError::NoDocument)?;
        Ok(self.source.render(doc.handle, page, self.scale.get())?)
    }

    pub fn is_page_rendered(&self, page: u32) -> bool {
        self.scheduler.is_page_rendered(page)
    }

    pub fn progress(&self) -> RenderProgress {
        self.scheduler.progress()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Blocks until all submitted render work has finished.
    pub fn wait_for_all(&self) {
        self.scheduler.wait_for_all();
    }

    /// Finishes in-flight work, stops the workers and closes the document.
    /// Cached artifacts stay on disk for the next run.
    pub fn shutdown(&mut self) {
        if self.scheduler.is_shut_down() && self.document.is_none() {
            return;
        }
        self.scheduler.wait_for_all();
        self.scheduler.shutdown();

        if let Some(doc) = self.document.take() {
            if let Err(err) = self.source.close(doc.handle) {
                log::warn!("closing {} failed: {err}", doc.path.display());
            }
            lock_hub(&self.hub).set_document_loaded(false);
        }
    }
}

impl Drop for PresentationSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
