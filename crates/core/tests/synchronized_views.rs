use podium_core::{
    Artifact, EventKind, OverviewView, PresentationSession, PresenterView, ProjectorView,
    StateEvent, ViewHandle, ViewMode, ViewerConfig,
};
use podium_document::{sample_pdf, CountingSource};
use std::fs;
use std::sync::{Arc, Mutex};

fn session(temp: &tempfile::TempDir, threads: usize) -> (PresentationSession, Arc<CountingSource>) {
    let config = ViewerConfig::default()
        .with_cache_dir(temp.path().join("cache"))
        .with_worker_threads(threads)
        .with_render_scale(1.0);
    let source = Arc::new(CountingSource::new());
    let session = PresentationSession::with_source(config, source.clone())
        .expect("session should start");
    (session, source)
}

struct Views {
    projector: ViewHandle<ProjectorView>,
    presenter: ViewHandle<PresenterView>,
    overview: ViewHandle<OverviewView>,
}

fn attach_all(session: &PresentationSession) -> Views {
    let hub = session.hub();
    let mut hub = hub.lock().expect("hub lock");
    Views {
        projector: ProjectorView::attach(&mut hub),
        presenter: PresenterView::attach(&mut hub),
        overview: OverviewView::attach(&mut hub),
    }
}

/// Every image a view shows is the hub's artifact for that page and still
/// exists on disk.
fn assert_views_match_hub(session: &PresentationSession, views: &Views) {
    let state = session.snapshot();
    let on_disk = |artifact: Option<&Artifact>| {
        artifact.map_or(true, |artifact| artifact.path.is_file())
    };

    let projector = views.projector.snapshot();
    let page = projector.page().expect("projector should show a page");
    assert_eq!(projector.image(), state.page_artifact(page), "projector page {page}");
    assert!(on_disk(projector.image()));

    let presenter = views.presenter.snapshot();
    let current = presenter.current().expect("presenter should show a page");
    assert_eq!(presenter.current_image(), state.page_artifact(current));
    if let Some(next) = presenter.next() {
        assert_eq!(presenter.next_image(), state.page_artifact(next), "presenter next {next}");
    }
    assert!(on_disk(presenter.current_image()));
    assert!(on_disk(presenter.next_image()));

    let overview = views.overview.snapshot();
    assert_eq!(overview.len() as u32, state.total_pages());
    for page in 0..state.total_pages() {
        assert_eq!(overview.thumbnail(page), state.page_artifact(page), "thumbnail {page}");
        assert!(on_disk(overview.thumbnail(page)));
    }
}

#[test]
fn every_view_converges_on_the_same_slide() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let deck = temp.path().join("talk.pdf");
    fs::write(&deck, sample_pdf(6)).expect("fixture should be written");
    let (mut session, source) = session(&temp, 3);

    let (projector, presenter, overview) = {
        let hub = session.hub();
        let mut hub = hub.lock().expect("hub lock");
        (
            ProjectorView::attach(&mut hub),
            PresenterView::attach(&mut hub),
            OverviewView::attach(&mut hub),
        )
    };

    session.load_document(&deck).expect("deck should load");
    session.go_to_page(4);
    session.set_view_mode(ViewMode::Presenter);
    session.wait_for_all();

    let projector = projector.snapshot();
    assert_eq!(projector.page(), Some(4));
    assert_eq!(projector.image().map(|artifact| artifact.key.page_index), Some(4));

    let presenter = presenter.snapshot();
    assert!(presenter.is_active());
    assert_eq!(presenter.current(), Some(4));
    assert_eq!(presenter.next_image().map(|artifact| artifact.key.page_index), Some(5));
    assert_eq!(presenter.counter().as_deref(), Some("5 / 6"));

    let overview = overview.snapshot();
    assert!(!overview.is_active());
    assert_eq!(overview.len(), 6);
    assert_eq!(overview.filled(), 6);
    assert_eq!(overview.highlighted(), Some(4));

    assert_eq!(source.render_count(), 6);
}

#[test]
fn progress_and_page_events_cover_the_document() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let deck = temp.path().join("talk.pdf");
    fs::write(&deck, sample_pdf(5)).expect("fixture should be written");
    let (mut session, _source) = session(&temp, 2);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    session.subscribe([EventKind::PageReady, EventKind::Progress], move |event, _| {
        sink.lock().expect("event log lock").push(event.clone());
    });

    session.load_document(&deck).expect("deck should load");
    session.wait_for_all();

    let events = events.lock().expect("event log lock");
    let mut ready: Vec<u32> = events
        .iter()
        .filter_map(|event| match event {
            StateEvent::PageReady { page, .. } => Some(*page),
            _ => None,
        })
        .collect();
    ready.sort_unstable();
    assert_eq!(ready, vec![0, 1, 2, 3, 4]);

    // Workers publish concurrently, so progress events may arrive out of order.
    let best_progress = events
        .iter()
        .filter_map(|event| match event {
            StateEvent::Progress { completed, total } => Some((*completed, *total)),
            _ => None,
        })
        .max();
    assert_eq!(best_progress, Some((5, 5)));
}

#[test]
fn switching_to_a_deck_of_equal_length_refreshes_views() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let first = temp.path().join("monday.pdf");
    let second = temp.path().join("tuesday.pdf");
    fs::write(&first, sample_pdf(3)).expect("fixture should be written");
    fs::write(&second, sample_pdf(3)).expect("fixture should be written");
    let (mut session, source) = session(&temp, 2);
    let views = attach_all(&session);

    session.load_document(&first).expect("first deck should load");
    session.wait_for_all();
    assert_eq!(views.overview.snapshot().filled(), 3);
    assert!(views.presenter.snapshot().next_image().is_some());

    source.fail_page(1);
    session.load_document(&second).expect("second deck should load");
    session.wait_for_all();

    let state = session.snapshot();
    assert_eq!(state.current_page(), Some(0));
    assert!(!state.has_page_artifact(1));
    assert_views_match_hub(&session, &views);
    assert!(views.presenter.snapshot().next_image().is_none());
    assert_eq!(views.overview.snapshot().filled(), 2);
}

#[test]
fn clearing_the_cache_empties_every_view() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let deck = temp.path().join("talk.pdf");
    fs::write(&deck, sample_pdf(4)).expect("fixture should be written");
    let (mut session, _source) = session(&temp, 2);
    let views = attach_all(&session);

    session.load_document(&deck).expect("deck should load");
    session.go_to_page(2);
    session.wait_for_all();
    assert_eq!(views.overview.snapshot().filled(), 4);

    session.clear_cache().expect("cache should clear");

    assert_eq!(session.snapshot().artifact_count(), 0);
    assert_views_match_hub(&session, &views);
    assert!(views.projector.snapshot().image().is_none());
    assert!(views.presenter.snapshot().current_image().is_none());
    assert!(views.presenter.snapshot().next_image().is_none());
    assert_eq!(views.overview.snapshot().filled(), 0);
    assert_eq!(views.overview.snapshot().highlighted(), Some(2));

    session.render_all_pages();
    session.wait_for_all();
    assert_views_match_hub(&session, &views);
    assert_eq!(views.overview.snapshot().filled(), 4);
}

#[test]
fn rescaling_swaps_every_view_to_the_new_artifacts() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let deck = temp.path().join("talk.pdf");
    fs::write(&deck, sample_pdf(3)).expect("fixture should be written");
    let (mut session, _source) = session(&temp, 2);
    let views = attach_all(&session);

    session.load_document(&deck).expect("deck should load");
    session.wait_for_all();
    session.set_render_scale(2.0);
    session.wait_for_all();

    assert_views_match_hub(&session, &views);
    let projector = views.projector.snapshot();
    assert_eq!(projector.image().map(|artifact| artifact.key.scale_millis), Some(2000));
}
