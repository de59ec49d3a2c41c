//! Headless view models
//!
//! Each view subscribes to the hub on its own and rebuilds what it would
//! display purely from notifications. None of them knows the others exist.

use crate::state::{EventKind, NavigationState, SharedState, StateEvent, SubscriptionId, ViewMode};
use podium_cache::Artifact;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared handle to a view updated from hub notifications
pub struct ViewHandle<V> {
    view: Arc<Mutex<V>>,
    subscription: SubscriptionId,
}

impl<V> ViewHandle<V> {
    pub fn lock(&self) -> MutexGuard<'_, V> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Stops updates. The view keeps its last content.
    pub fn detach(self, hub: &mut SharedState) -> bool {
        hub.unsubscribe(self.subscription)
    }
}

impl<V: Clone> ViewHandle<V> {
    pub fn snapshot(&self) -> V {
        self.lock().clone()
    }
}

trait HubView: Default + Send + 'static {
    const KINDS: &'static [EventKind];

    fn apply(&mut self, event: &StateEvent, state: &NavigationState);
    fn sync(&mut self, state: &NavigationState);
}

fn attach<V: HubView>(hub: &mut SharedState) -> ViewHandle<V> {
    let mut initial = V::default();
    initial.sync(hub.state());

    let view = Arc::new(Mutex::new(initial));
    let target = view.clone();
    let subscription = hub.subscribe(V::KINDS.iter().copied(), move |event, state| {
        target.lock().unwrap_or_else(PoisonError::into_inner).apply(event, state);
    });

    ViewHandle { view, subscription }
}

/// Full-screen current page for the audience
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectorView {
    page: Option<u32>,
    image: Option<Artifact>,
    open: bool,
}

impl ProjectorView {
    pub fn attach(hub: &mut SharedState) -> ViewHandle<Self> {
        attach(hub)
    }

    pub fn page(&self) -> Option<u32> {
        self.page
    }

    pub fn image(&self) -> Option<&Artifact> {
        self.image.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl HubView for ProjectorView {
    const KINDS: &'static [EventKind] = &[
        EventKind::CurrentPageChanged,
        EventKind::TotalPagesChanged,
        EventKind::PageReady,
        EventKind::ArtifactsCleared,
        EventKind::ProjectorStatusChanged,
        EventKind::LoadingFinished,
    ];

    fn apply(&mut self, event: &StateEvent, state: &NavigationState) {
        match event {
            StateEvent::PageReady { page, artifact } => {
                if self.page == Some(*page) {
                    self.image = Some(artifact.clone());
                }
            }
            StateEvent::ProjectorStatusChanged(open) => self.open = *open,
            _ => self.sync(state),
        }
    }

    fn sync(&mut self, state: &NavigationState) {
        self.page = state.current_page();
        self.image = self.page.and_then(|page| state.page_artifact(page).cloned());
        self.open = state.is_projector_open();
    }
}

/// Speaker console: current slide and a preview of the next one
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenterView {
    current: Option<u32>,
    current_image: Option<Artifact>,
    next: Option<u32>,
    next_image: Option<Artifact>,
    total_pages: u32,
    active: bool,
}

impl PresenterView {
    pub fn attach(hub: &mut SharedState) -> ViewHandle<Self> {
        attach(hub)
    }

    pub fn current(&self) -> Option<u32> {
        self.current
    }

    pub fn current_image(&self) -> Option<&Artifact> {
        self.current_image.as_ref()
    }

    /// Next page, `None` on the last slide
    pub fn next(&self) -> Option<u32> {
        self.next
    }

    pub fn next_image(&self) -> Option<&Artifact> {
        self.next_image.as_ref()
    }

    /// Slide counter as shown to the speaker, e.g. "3 / 12"
    pub fn counter(&self) -> Option<String> {
        self.current.map(|page| format!("{} / {}", page + 1, self.total_pages))
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl HubView for PresenterView {
    const KINDS: &'static [EventKind] = &[
        EventKind::CurrentPageChanged,
        EventKind::TotalPagesChanged,
        EventKind::PageReady,
        EventKind::ArtifactsCleared,
        EventKind::ViewModeChanged,
        EventKind::LoadingFinished,
    ];

    fn apply(&mut self, event: &StateEvent, state: &NavigationState) {
        match event {
            StateEvent::PageReady { page, artifact } => {
                if self.current == Some(*page) {
                    self.current_image = Some(artifact.clone());
                }
                if self.next == Some(*page) {
                    self.next_image = Some(artifact.clone());
                }
            }
            StateEvent::ViewModeChanged(mode) => self.active = *mode == ViewMode::Presenter,
            _ => self.sync(state),
        }
    }

    fn sync(&mut self, state: &NavigationState) {
        self.total_pages = state.total_pages();
        self.current = state.current_page();
        self.next = self.current.map(|page| page + 1).filter(|&page| page < self.total_pages);
        self.current_image = self.current.and_then(|page| state.page_artifact(page).cloned());
        self.next_image = self.next.and_then(|page| state.page_artifact(page).cloned());
        self.active = state.view_mode() == ViewMode::Presenter;
    }
}

/// Thumbnail grid with the current page highlighted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverviewView {
    thumbnails: Vec<Option<Artifact>>,
    highlighted: Option<u32>,
    active: bool,
}

impl OverviewView {
    pub fn attach(hub: &mut SharedState) -> ViewHandle<Self> {
        attach(hub)
    }

    pub fn len(&self) -> usize {
        self.thumbnails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thumbnails.is_empty()
    }

    pub fn thumbnail(&self, page: u32) -> Option<&Artifact> {
        self.thumbnails.get(page as usize).and_then(Option::as_ref)
    }

    /// Number of slots that have an image
    pub fn filled(&self) -> usize {
        self.thumbnails.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn highlighted(&self) -> Option<u32> {
        self.highlighted
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl HubView for OverviewView {
    const KINDS: &'static [EventKind] = &[
        EventKind::CurrentPageChanged,
        EventKind::TotalPagesChanged,
        EventKind::PageReady,
        EventKind::ArtifactsCleared,
        EventKind::ViewModeChanged,
        EventKind::LoadingFinished,
    ];

    fn apply(&mut self, event: &StateEvent, state: &NavigationState) {
        match event {
            StateEvent::CurrentPageChanged(page) => self.highlighted = Some(*page),
            StateEvent::PageReady { page, artifact } => {
                if let Some(slot) = self.thumbnails.get_mut(*page as usize) {
                    *slot = Some(artifact.clone());
                }
            }
            StateEvent::ViewModeChanged(mode) => self.active = *mode == ViewMode::Overview,
            _ => self.sync(state),
        }
    }

    fn sync(&mut self, state: &NavigationState) {
        self.thumbnails = (0..state.total_pages())
            .map(|page| state.page_artifact(page).cloned())
            .collect();
        self.highlighted = state.current_page();
        self.active = state.view_mode() == ViewMode::Overview;
    }
}
