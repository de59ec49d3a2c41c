//! Document source capability for the presenter.
//!
//! A [`DocumentSource`] opens a paginated document, reports its page count and
//! rasterizes one page at one scale to encoded image bytes. Every method takes
//! `&self` so one source can be shared by all render workers; implementations
//! serialize internally where their backend requires it.

use image::{ImageBuffer, ImageFormat, Rgba};
use lopdf::Document;
use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

#[cfg(any(test, feature = "test-support"))]
mod fixture;

#[cfg(any(test, feature = "test-support"))]
pub use fixture::{sample_pdf, CountingSource};

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Page size used when a page carries no readable MediaBox (US Letter).
const FALLBACK_PAGE_SIZE: PageSize = PageSize { width_pt: 612.0, height_pt: 792.0 };

const BORDER: Rgba<u8> = Rgba([220, 220, 220, 255]);
const MARKER: Rgba<u8> = Rgba([64, 64, 64, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("file does not exist: {0}")]
    NotFound(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("image encoding error: {0}")]
    Encode(#[from] image::ImageError),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("document has no pages")]
    Empty,
    #[error("backend error: {0}")]
    Backend(String),
}

pub type DocumentResult<T> = Result<T, DocumentError>;

pub trait DocumentSource: Send + Sync {
    fn open(&self, path: &Path) -> DocumentResult<DocumentHandle>;
    fn page_count(&self, handle: DocumentHandle) -> DocumentResult<u32>;
    /// Rasterizes `page_index` at `scale` and returns PNG-encoded bytes.
    fn render(&self, handle: DocumentHandle, page_index: u32, scale: f32)
        -> DocumentResult<Vec<u8>>;
    fn close(&self, handle: DocumentHandle) -> DocumentResult<()>;
}

#[derive(Debug, Clone)]
struct DocumentRecord {
    path: PathBuf,
    page_sizes: Vec<PageSize>,
}

/// Default document source backed by `lopdf`.
///
/// Page geometry comes from the document; the raster itself is a blank page of
/// the right dimensions with a border and a page marker.
#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: AtomicU64,
    docs: RwLock<HashMap<DocumentHandle, DocumentRecord>>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_sizes(bytes: &[u8]) -> DocumentResult<Vec<PageSize>> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(DocumentError::EncryptedUnsupported);
        }

        let doc = Document::load_mem(bytes)?;
        let pages = doc.get_pages();
        let mut sizes = Vec::with_capacity(pages.len());

        for (_, object_id) in pages {
            let dict = doc.get_dictionary(object_id)?;
            let size = dict
                .get(b"MediaBox")
                .ok()
                .and_then(|obj| obj.as_array().ok())
                .and_then(|array| {
                    if array.len() != 4 {
                        return None;
                    }
                    let x0 = array[0].as_float().ok()?;
                    let y0 = array[1].as_float().ok()?;
                    let x1 = array[2].as_float().ok()?;
                    let y1 = array[3].as_float().ok()?;
                    Some(PageSize { width_pt: (x1 - x0).abs(), height_pt: (y1 - y0).abs() })
                })
                .unwrap_or(FALLBACK_PAGE_SIZE);

            sizes.push(size);
        }

        if sizes.is_empty() {
            return Err(DocumentError::Empty);
        }

        Ok(sizes)
    }

    fn page_size(&self, handle: DocumentHandle, page_index: u32) -> DocumentResult<PageSize> {
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        let record = docs.get(&handle).ok_or(DocumentError::InvalidHandle(handle.raw()))?;

        record.page_sizes.get(page_index as usize).copied().ok_or(
            DocumentError::PageOutOfRange {
                page: page_index,
                page_count: record.page_sizes.len() as u32,
            },
        )
    }

    fn rasterize(page_index: u32, size: PageSize, scale: f32) -> RgbaImage {
        let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
        let width = (size.width_pt * scale).round().max(1.0) as u32;
        let height = (size.height_pt * scale).round().max(1.0) as u32;

        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

        if width >= 4 && height >= 4 {
            for x in 0..width {
                image.put_pixel(x, 0, BORDER);
                image.put_pixel(x, height - 1, BORDER);
            }
            for y in 0..height {
                image.put_pixel(0, y, BORDER);
                image.put_pixel(width - 1, y, BORDER);
            }
        }

        // One marker block per page index so distinct pages never encode identically.
        let block = (4.0 * scale).round().max(1.0) as u32;
        let blocks = (page_index % 32) + 1;
        for n in 0..blocks {
            let x0 = 2 + n * block * 2;
            if x0 + block >= width || 2 + block >= height {
                break;
            }
            for x in x0..x0 + block {
                for y in 2..2 + block {
                    image.put_pixel(x, y, MARKER);
                }
            }
        }

        image
    }
}

impl DocumentSource for LopdfEngine {
    fn open(&self, path: &Path) -> DocumentResult<DocumentHandle> {
        if !path.is_file() {
            return Err(DocumentError::NotFound(path.to_path_buf()));
        }

        let bytes = fs::read(path)?;
        let page_sizes = Self::parse_sizes(&bytes)?;

        let handle = DocumentHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        log::info!("opened {} ({} pages) as handle {}", path.display(), page_sizes.len(), handle.raw());

        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        docs.insert(handle, DocumentRecord { path: path.to_path_buf(), page_sizes });

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> DocumentResult<u32> {
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        let record = docs.get(&handle).ok_or(DocumentError::InvalidHandle(handle.raw()))?;
        Ok(record.page_sizes.len() as u32)
    }

    fn render(
        &self,
        handle: DocumentHandle,
        page_index: u32,
        scale: f32,
    ) -> DocumentResult<Vec<u8>> {
        let size = self.page_size(handle, page_index)?;
        let image = Self::rasterize(page_index, size, scale);

        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;

        log::debug!("rasterized page {page_index} at {scale} ({} bytes)", bytes.len());
        Ok(bytes)
    }

    fn close(&self, handle: DocumentHandle) -> DocumentResult<()> {
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        let record = docs.remove(&handle).ok_or(DocumentError::InvalidHandle(handle.raw()))?;
        log::info!("closed {}", record.path.display());
        Ok(())
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sample(dir: &Path, pages: u32) -> PathBuf {
        let path = dir.join("deck.pdf");
        fs::write(&path, sample_pdf(pages)).expect("fixture should be written");
        path
    }

    #[test]
    fn opens_pdf_and_reads_page_count() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let engine = LopdfEngine::new();
        let handle = engine.open(&write_sample(temp.path(), 3)).expect("open should succeed");

        assert_eq!(engine.page_count(handle).expect("count should succeed"), 3);
    }

    #[test]
    fn render_produces_png_with_scaled_dimensions() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let engine = LopdfEngine::new();
        let handle = engine.open(&write_sample(temp.path(), 1)).expect("open should succeed");

        let bytes = engine.render(handle, 0, 0.5).expect("render should succeed");
        let image = image::load_from_memory(&bytes).expect("bytes should decode");

        assert_eq!(image.width(), 306);
        assert_eq!(image.height(), 396);
    }

    #[test]
    fn distinct_pages_render_distinct_bytes() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let engine = LopdfEngine::new();
        let handle = engine.open(&write_sample(temp.path(), 2)).expect("open should succeed");

        let first = engine.render(handle, 0, 1.0).expect("render should succeed");
        let second = engine.render(handle, 1, 1.0).expect("render should succeed");

        assert_ne!(first, second);
        assert_eq!(first, engine.render(handle, 0, 1.0).expect("render should succeed"));
    }

    #[test]
    fn render_out_of_range_page_fails() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let engine = LopdfEngine::new();
        let handle = engine.open(&write_sample(temp.path(), 2)).expect("open should succeed");

        let err = engine.render(handle, 5, 1.0).expect_err("page 5 should be out of range");
        assert!(matches!(err, DocumentError::PageOutOfRange { page: 5, page_count: 2 }));
    }

    #[test]
    fn open_missing_file_fails() {
        let engine = LopdfEngine::new();
        let err = engine.open(Path::new("/definitely/not/here.pdf")).expect_err("should fail");

        assert!(matches!(err, DocumentError::NotFound(_)));
    }

    #[test]
    fn open_garbage_fails_with_parse_error() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let path = temp.path().join("broken.pdf");
        fs::write(&path, b"not a pdf at all").expect("write should succeed");

        let err = LopdfEngine::new().open(&path).expect_err("should fail");
        assert!(matches!(err, DocumentError::Parse(_)));
    }

    #[test]
    fn closed_handle_becomes_invalid() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let engine = LopdfEngine::new();
        let handle = engine.open(&write_sample(temp.path(), 1)).expect("open should succeed");

        engine.close(handle).expect("close should succeed");
        let err = engine.page_count(handle).expect_err("handle should be gone");

        assert!(matches!(err, DocumentError::InvalidHandle(raw) if raw == handle.raw()));
    }
}
