use crate::{DocumentError, DocumentHandle, DocumentResult, DocumentSource, LopdfEngine};
use lopdf::{Dictionary, Document, Object};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// Builds a valid PDF with `page_count` US Letter pages.
///
/// Even-indexed pages are portrait and odd-indexed pages landscape, so tests can
/// tell pages apart by their raster dimensions.
pub fn sample_pdf(page_count: u32) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::with_capacity(page_count as usize);
    for index in 0..page_count {
        let (width, height) = if index % 2 == 0 { (612, 792) } else { (792, 612) };

        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set("Parent", Object::Reference(pages_id));
        page.set(
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(width),
                Object::Integer(height),
            ]),
        );
        kids.push(Object::Reference(doc.add_object(page)));
    }

    let mut pages = Dictionary::new();
    pages.set("Type", Object::Name(b"Pages".to_vec()));
    pages.set("Kids", Object::Array(kids));
    pages.set("Count", Object::Integer(i64::from(page_count)));
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut bytes = Vec::new();
    if let Err(err) = doc.save_to(&mut bytes) {
        panic!("in-memory PDF should serialize: {err}");
    }
    bytes
}

/// Document source that opens real PDFs but renders cheap placeholder bytes
/// and records every render call.
///
/// Pages can be made to fail, and renders can be slowed down, to exercise
/// failure reporting and straggling workers.
#[derive(Debug, Default)]
pub struct CountingSource {
    engine: LopdfEngine,
    renders: AtomicUsize,
    rendered: Mutex<Vec<u32>>,
    failing: Mutex<HashSet<u32>>,
    delay: Mutex<Duration>,
}

impl CountingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        let source = Self::default();
        source.set_delay(delay);
        source
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    /// Makes every later render of `page` fail.
    pub fn fail_page(&self, page: u32) {
        lock(&self.failing).insert(page);
    }

    pub fn heal_page(&self, page: u32) {
        lock(&self.failing).remove(&page);
    }

    /// Number of render calls, failed ones included
    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    /// Pages in the order their render calls started
    pub fn rendered_pages(&self) -> Vec<u32> {
        lock(&self.rendered).clone()
    }

    pub fn renders_of(&self, page: u32) -> usize {
        lock(&self.rendered).iter().filter(|&&p| p == page).count()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DocumentSource for CountingSource {
    fn open(&self, path: &Path) -> DocumentResult<DocumentHandle> {
        self.engine.open(path)
    }

    fn page_count(&self, handle: DocumentHandle) -> DocumentResult<u32> {
        self.engine.page_count(handle)
    }

    fn render(
        &self,
        handle: DocumentHandle,
        page_index: u32,
        scale: f32,
    ) -> DocumentResult<Vec<u8>> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        lock(&self.rendered).push(page_index);

        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let page_count = self.engine.page_count(handle)?;
        if page_index >= page_count {
            return Err(DocumentError::PageOutOfRange { page: page_index, page_count });
        }
        if lock(&self.failing).contains(&page_index) {
            return Err(DocumentError::Backend(format!("injected failure for page {page_index}")));
        }

        Ok(format!("page {page_index} at {scale}").into_bytes())
    }

    fn close(&self, handle: DocumentHandle) -> DocumentResult<()> {
        self.engine.close(handle)
    }
}
