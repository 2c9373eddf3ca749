//! User-facing facade over a decoding document

use std::sync::Arc;
use std::time::Duration;

use crate::bitmap::BitmapFactory;
use crate::document::Document;
use crate::engine::{DecodeEngine, PageDims};
use crate::page::Page;
use crate::signal::{Signal, WindowFlag};
use crate::stream::ByteSource;
use crate::text::Word;

/// Easy-to-use handle on one decoding document.
///
/// Everything forwards to [`Document`]; this type only fixes the public
/// surface. Dropping the file tears the whole document down: page workers
/// are joined, the pump stops, engine handles are released.
pub struct DjvuFile<E: DecodeEngine, F: BitmapFactory> {
    document: Document<E, F>,
}

impl<E: DecodeEngine, F: BitmapFactory> DjvuFile<E, F> {
    #[must_use]
    pub fn new(engine: Arc<E>, source: Arc<dyn ByteSource>, factory: Arc<F>) -> Self {
        Self {
            document: Document::new(engine, source, factory),
        }
    }

    #[must_use]
    pub fn with_metadata_timeout(
        engine: Arc<E>,
        source: Arc<dyn ByteSource>,
        factory: Arc<F>,
        metadata_timeout: Duration,
    ) -> Self {
        Self {
            document: Document::with_metadata_timeout(engine, source, factory, metadata_timeout),
        }
    }

    /// Whether the document decoded far enough to be usable.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.document.is_valid()
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.document.page_count()
    }

    #[must_use]
    pub fn page_info(&self, page_no: usize) -> Option<PageDims> {
        self.document.page_info(page_no)
    }

    #[must_use]
    pub fn page_text(&self, page_no: usize) -> Vec<Word> {
        self.document.page_text(page_no)
    }

    /// Request asynchronous decode and render of a page.
    pub fn request_page(
        &self,
        id: &str,
        page_no: usize,
        width: u32,
        height: u32,
    ) -> Arc<Page<E, F>> {
        self.document.get_page(id, page_no, width, height)
    }

    /// Request a page and block until it is terminal.
    pub fn request_page_blocking(
        &self,
        id: &str,
        page_no: usize,
        width: u32,
        height: u32,
    ) -> Arc<Page<E, F>> {
        self.document.get_page_blocking(id, page_no, width, height)
    }

    /// Abort and drop the page task under `id`.
    pub fn remove_page(&self, id: &str) {
        self.document.remove_page(id);
    }

    #[must_use]
    pub fn page_ready(&self, id: &str) -> bool {
        self.document.is_bitmap_ready(id)
    }

    #[must_use]
    pub fn page_bitmap(&self, id: &str) -> Option<Arc<F::Bitmap>> {
        self.document.page_bitmap(id)
    }

    /// Last error reported through the engine's message stream, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.document.last_error()
    }

    /// Stop handling engine messages without tearing the document down.
    pub fn stop_message_handling(&self) {
        self.document.stop_message_handling();
    }

    #[must_use]
    pub fn window_signal(&self) -> &Arc<Signal<WindowFlag>> {
        self.document.window_signal()
    }
}
