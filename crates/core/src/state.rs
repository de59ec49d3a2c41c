//! Shared navigation state and change notifications
//!
//! [`SharedState`] is the single authority for the current page, the page
//! count, the view mode and the page→artifact mapping. Every mutation goes
//! through a method that fires the matching [`StateEvent`] to the observers
//! subscribed to its [`EventKind`], synchronously and in registration order,
//! on the thread that performed the mutation.
//!
//! Observers receive the state as it is *after* the mutation, read-only, so
//! they never need to call back into the hub.

use podium_cache::Artifact;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Which screen the presenter console shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ViewMode {
    /// Grid of page thumbnails
    #[default]
    Overview,
    /// Current and next page with speaker layout
    Presenter,
}

impl ViewMode {
    pub fn toggled(self) -> Self {
        match self {
            ViewMode::Overview => ViewMode::Presenter,
            ViewMode::Presenter => ViewMode::Overview,
        }
    }
}

/// A change published by the hub
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    CurrentPageChanged(u32),
    TotalPagesChanged(u32),
    PageReady { page: u32, artifact: Artifact },
    PageError { page: u32, message: String },
    /// Every page artifact was forgotten while the page count stayed put
    ArtifactsCleared,
    Progress { completed: usize, total: u32 },
    ViewModeChanged(ViewMode),
    ProjectorStatusChanged(bool),
    LoadingStarted,
    LoadingFinished,
    LoadingFailed(String),
}

/// Subscription filter, one per [`StateEvent`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CurrentPageChanged,
    TotalPagesChanged,
    PageReady,
    PageError,
    ArtifactsCleared,
    Progress,
    ViewModeChanged,
    ProjectorStatusChanged,
    LoadingStarted,
    LoadingFinished,
    LoadingFailed,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::CurrentPageChanged,
        EventKind::TotalPagesChanged,
        EventKind::PageReady,
        EventKind::PageError,
        EventKind::ArtifactsCleared,
        EventKind::Progress,
        EventKind::ViewModeChanged,
        EventKind::ProjectorStatusChanged,
        EventKind::LoadingStarted,
        EventKind::LoadingFinished,
        EventKind::LoadingFailed,
    ];
}

impl StateEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StateEvent::CurrentPageChanged(_) => EventKind::CurrentPageChanged,
            StateEvent::TotalPagesChanged(_) => EventKind::TotalPagesChanged,
            StateEvent::PageReady { .. } => EventKind::PageReady,
            StateEvent::PageError { .. } => EventKind::PageError,
            StateEvent::ArtifactsCleared => EventKind::ArtifactsCleared,
            StateEvent::Progress { .. } => EventKind::Progress,
            StateEvent::ViewModeChanged(_) => EventKind::ViewModeChanged,
            StateEvent::ProjectorStatusChanged(_) => EventKind::ProjectorStatusChanged,
            StateEvent::LoadingStarted => EventKind::LoadingStarted,
            StateEvent::LoadingFinished => EventKind::LoadingFinished,
            StateEvent::LoadingFailed(_) => EventKind::LoadingFailed,
        }
    }
}

/// Read-only navigation state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavigationState {
    current_page: u32,
    total_pages: u32,
    view_mode: ViewMode,
    artifacts: BTreeMap<u32, Artifact>,
    document_path: Option<PathBuf>,
    document_loaded: bool,
    projector_open: bool,
}

impl NavigationState {
    /// Current page, or `None` while the document has no pages
    pub fn current_page(&self) -> Option<u32> {
        (self.total_pages > 0).then_some(self.current_page)
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn page_artifact(&self, page: u32) -> Option<&Artifact> {
        self.artifacts.get(&page)
    }

    pub fn has_page_artifact(&self, page: u32) -> bool {
        self.artifacts.contains_key(&page)
    }

    /// Pages with a recorded artifact, ascending
    pub fn artifact_pages(&self) -> impl Iterator<Item = u32> + '_ {
        self.artifacts.keys().copied()
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }

    pub fn document_path(&self) -> Option<&Path> {
        self.document_path.as_deref()
    }

    pub fn is_document_loaded(&self) -> bool {
        self.document_loaded
    }

    pub fn is_projector_open(&self) -> bool {
        self.projector_open
    }
}

/// Identifies one observer registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Observer callback
pub type Observer = Box<dyn FnMut(&StateEvent, &NavigationState) + Send>;

struct Subscription {
    id: SubscriptionId,
    kinds: HashSet<EventKind>,
    observer: Observer,
}

/// The notification hub
#[derive(Default)]
pub struct SharedState {
    nav: NavigationState,
    subscriptions: Vec<Subscription>,
    next_id: u64,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `observer` for the given event kinds.
    pub fn subscribe<I, F>(&mut self, kinds: I, observer: F) -> SubscriptionId
    where
        I: IntoIterator<Item = EventKind>,
        F: FnMut(&StateEvent, &NavigationState) + Send + 'static,
    {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscriptions.push(Subscription {
            id,
            kinds: kinds.into_iter().collect(),
            observer: Box::new(observer),
        });
        id
    }

    /// Removes a registration. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|subscription| subscription.id != id);
        self.subscriptions.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn state(&self) -> &NavigationState {
        &self.nav
    }

    fn emit(&mut self, event: StateEvent) {
        let kind = event.kind();
        let Self { nav, subscriptions, .. } = self;
        for subscription in subscriptions.iter_mut() {
            if subscription.kinds.contains(&kind) {
                (subscription.observer)(&event, &*nav);
            }
        }
    }

    pub fn current_page(&self) -> Option<u32> {
        self.nav.current_page()
    }

    pub fn total_pages(&self) -> u32 {
        self.nav.total_pages
    }

    pub fn view_mode(&self) -> ViewMode {
        self.nav.view_mode
    }

    pub fn page_artifact(&self, page: u32) -> Option<&Artifact> {
        self.nav.page_artifact(page)
    }

    pub fn has_page_artifact(&self, page: u32) -> bool {
        self.nav.has_page_artifact(page)
    }

    /// Moves to `page`, clamped into the document. Notifies only when the
    /// clamped page differs from the current one. No-op without pages.
    pub fn set_current_page(&mut self, page: i64) -> bool {
        if self.nav.total_pages == 0 {
            return false;
        }

        let last = i64::from(self.nav.total_pages - 1);
        let page = page.clamp(0, last) as u32;
        if page == self.nav.current_page {
            return false;
        }

        self.nav.current_page = page;
        self.emit(StateEvent::CurrentPageChanged(page));
        true
    }

    pub fn next_page(&mut self) -> bool {
        self.set_current_page(i64::from(self.nav.current_page) + 1)
    }

    pub fn prev_page(&mut self) -> bool {
        self.set_current_page(i64::from(self.nav.current_page) - 1)
    }

    /// Switches to a document with `total` pages.
    ///
    /// On change, the artifact mapping is emptied and the current page reset
    /// to 0 before a single `TotalPagesChanged` goes out. No separate
    /// `CurrentPageChanged` accompanies it.
    pub fn set_total_pages(&mut self, total: u32) -> bool {
        if total == self.nav.total_pages {
            return false;
        }

        self.nav.artifacts.clear();
        self.nav.current_page = 0;
        self.nav.total_pages = total;
        self.emit(StateEvent::TotalPagesChanged(total));
        true
    }

    /// Records the artifact for `page`. Silently dropped when `page` is not
    /// in the current document.
    pub fn set_page_artifact(&mut self, page: u32, artifact: Artifact) -> bool {
        if page >= self.nav.total_pages {
            log::debug!("dropping artifact for out-of-range page {page}");
            return false;
        }

        self.nav.artifacts.insert(page, artifact.clone());
        self.emit(StateEvent::PageReady { page, artifact });
        true
    }

    /// Forgets every recorded artifact. Publishes `ArtifactsCleared` when
    /// there was anything to forget.
    pub fn clear_page_artifacts(&mut self) -> bool {
        if self.nav.artifacts.is_empty() {
            return false;
        }

        self.nav.artifacts.clear();
        self.emit(StateEvent::ArtifactsCleared);
        true
    }

    pub fn set_view_mode(&mut self, mode: ViewMode) -> bool {
        if mode == self.nav.view_mode {
            return false;
        }

        self.nav.view_mode = mode;
        self.emit(StateEvent::ViewModeChanged(mode));
        true
    }

    pub fn toggle_view_mode(&mut self) -> ViewMode {
        let mode = self.nav.view_mode.toggled();
        self.set_view_mode(mode);
        mode
    }

    pub fn set_projector_open(&mut self, open: bool) -> bool {
        if open == self.nav.projector_open {
            return false;
        }

        self.nav.projector_open = open;
        self.emit(StateEvent::ProjectorStatusChanged(open));
        true
    }

    pub fn set_document_path(&mut self, path: Option<PathBuf>) {
        self.nav.document_path = path;
    }

    pub fn set_document_loaded(&mut self, loaded: bool) {
        self.nav.document_loaded = loaded;
    }

    pub fn report_page_error(&mut self, page: u32, message: impl Into<String>) {
        self.emit(StateEvent::PageError { page, message: message.into() });
    }

    pub fn report_progress(&mut self, completed: usize, total: u32) {
        self.emit(StateEvent::Progress { completed, total });
    }

    pub fn notify_loading_started(&mut self) {
        self.emit(StateEvent::LoadingStarted);
    }

    pub fn notify_loading_finished(&mut self) {
        self.emit(StateEvent::LoadingFinished);
    }

    pub fn notify_loading_failed(&mut self, message: impl Into<String>) {
        self.emit(StateEvent::LoadingFailed(message.into()));
    }

    /// Returns to the no-document state. Observers hear about the page count,
    /// view mode and projector status if they change; subscriptions survive.
    pub fn reset(&mut self) {
        self.nav.document_path = None;
        self.nav.document_loaded = false;
        self.set_total_pages(0);
        self.nav.artifacts.clear();
        self.nav.current_page = 0;
        self.set_view_mode(ViewMode::default());
        self.set_projector_open(false);
    }
}
