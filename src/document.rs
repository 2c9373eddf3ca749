//! Document lifecycle: engine handles, message pump, page registry

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::bitmap::BitmapFactory;
use crate::engine::{DecodeEngine, EngineMessage, JobStatus, PageDims, PageInfoFetch, TextFetch};
use crate::page::Page;
use crate::signal::{DocumentFlag, PageFlag, Signal, WindowFlag};
use crate::stream::ByteSource;
use crate::text::{Word, collect_words};

/// Default bound on the wait for document metadata during construction.
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Pump wake-up interval; bounds shutdown latency when no callback fires.
const MESSAGE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Re-check interval while the constructor waits for document metadata.
const INFO_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Fixed chunk size for feeding stream bytes to the engine.
const STREAM_CHUNK_SIZE: usize = 512;

/// Consecutive failed reads tolerated before the byte supply counts as
/// exhausted.
const MAX_READ_RETRIES: u32 = 3;

/// Backoff between retries of not-yet-definitive engine queries.
const RETRY_DELAY: Duration = Duration::from_millis(1);

type PageRegistry<E, F> = Mutex<HashMap<String, Arc<Page<E, F>>>>;

/// Owns the engine context and document handles, the message pump thread
/// and the registry of in-flight page tasks.
///
/// All client-facing methods may be called from any thread. Engine-level
/// failures never surface as errors: a document that could not be created
/// or decoded simply reports `is_valid() == false`, and its page requests
/// retire with empty bitmaps.
pub struct Document<E: DecodeEngine, F: BitmapFactory> {
    engine: Arc<E>,
    factory: Arc<F>,
    context: Option<E::ContextHandle>,
    document: Option<E::DocumentHandle>,
    valid: bool,
    window_signal: Arc<Signal<WindowFlag>>,
    document_signal: Arc<Signal<DocumentFlag>>,
    pages: Arc<PageRegistry<E, F>>,
    last_error: Arc<Mutex<Option<String>>>,
    pump: Option<JoinHandle<()>>,
}

impl<E: DecodeEngine, F: BitmapFactory> Document<E, F> {
    /// Create the engine context and document, start the pump thread and
    /// wait (bounded) for document metadata.
    #[must_use]
    pub fn new(engine: Arc<E>, source: Arc<dyn ByteSource>, factory: Arc<F>) -> Self {
        Self::with_metadata_timeout(engine, source, factory, DEFAULT_METADATA_TIMEOUT)
    }

    /// As [`new`](Self::new) with a custom bound on the metadata wait. A
    /// stream that never yields metadata leaves the document invalid
    /// instead of hanging the constructor.
    #[must_use]
    pub fn with_metadata_timeout(
        engine: Arc<E>,
        source: Arc<dyn ByteSource>,
        factory: Arc<F>,
        metadata_timeout: Duration,
    ) -> Self {
        let mut doc = Self {
            engine: Arc::clone(&engine),
            factory,
            context: None,
            document: None,
            valid: false,
            window_signal: Arc::new(Signal::new()),
            document_signal: Arc::new(Signal::new()),
            pages: Arc::new(Mutex::new(HashMap::new())),
            last_error: Arc::new(Mutex::new(None)),
            pump: None,
        };

        let Some(context) = engine.create_context() else {
            warn!("engine refused to create a context");
            return doc;
        };
        doc.context = Some(context.clone());

        // The callback fires on an engine-internal thread: flip the message
        // flag, nothing else. Engine calls from inside it are unsafe.
        {
            let window = Arc::clone(&doc.window_signal);
            let document = Arc::clone(&doc.document_signal);
            engine.set_message_callback(
                &context,
                Box::new(move || {
                    if !window.check(WindowFlag::Close) {
                        document.set(DocumentFlag::Message);
                    }
                }),
            );
        }

        let Some(handle) = engine.create_document(&context, true) else {
            warn!("engine refused to create a document");
            return doc;
        };
        doc.document = Some(handle.clone());

        doc.pump = Some(std::thread::spawn({
            let engine = Arc::clone(&engine);
            let context = context.clone();
            let handle = handle.clone();
            let source = Arc::clone(&source);
            let pages = Arc::clone(&doc.pages);
            let window_signal = Arc::clone(&doc.window_signal);
            let document_signal = Arc::clone(&doc.document_signal);
            let last_error = Arc::clone(&doc.last_error);
            move || {
                pump_loop(
                    &*engine,
                    &context,
                    &handle,
                    &*source,
                    &pages,
                    &window_signal,
                    &document_signal,
                    &last_error,
                );
            }
        }));
        doc.document_signal.set(DocumentFlag::Create);

        let deadline = Instant::now() + metadata_timeout;
        while !doc.document_signal.check(DocumentFlag::Info) {
            if engine.document_decoding_status(&handle) == JobStatus::Failed {
                break;
            }
            if Instant::now() >= deadline {
                warn!("document metadata did not arrive within {metadata_timeout:?}");
                break;
            }
            doc.document_signal
                .wait_for(INFO_POLL_INTERVAL, Some(DocumentFlag::Info));
        }

        doc.valid = doc.document_signal.check(DocumentFlag::Info)
            && engine.document_decoding_status(&handle) != JobStatus::Failed;
        doc
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.document
            .as_ref()
            .map_or(0, |doc| self.engine.document_page_count(doc))
    }

    /// Page geometry, retried until the engine's answer is definitive.
    /// `None` means the engine failed the directory entry for good.
    #[must_use]
    pub fn page_info(&self, page_no: usize) -> Option<PageDims> {
        let doc = self.document.as_ref()?;
        loop {
            match self.engine.document_page_info(doc, page_no) {
                PageInfoFetch::Ready(dims) => return Some(dims),
                PageInfoFetch::Pending => std::thread::sleep(RETRY_DELAY),
                PageInfoFetch::Failed => return None,
            }
        }
    }

    /// Words and bounding boxes for a page, in document order, boxes in
    /// top-left-origin coordinates.
    #[must_use]
    pub fn page_text(&self, page_no: usize) -> Vec<Word> {
        let Some(doc) = self.document.as_ref() else {
            return Vec::new();
        };
        let Some(dims) = self.page_info(page_no) else {
            return Vec::new();
        };

        loop {
            match self.engine.document_page_text(doc, page_no) {
                TextFetch::Pending => std::thread::sleep(RETRY_DELAY),
                TextFetch::Empty => return Vec::new(),
                TextFetch::Tree(tree) => {
                    let mut words = Vec::new();
                    collect_words(&tree, dims.height as i32, &mut words);
                    return words;
                }
            }
        }
    }

    /// Create, register and start a page task. Decoding proceeds on a
    /// dedicated worker thread; poll [`Page::ready`] or block on
    /// [`Page::wait`].
    ///
    /// Re-requesting an id aborts and retires the previous task under that
    /// id before the slot is reused.
    pub fn get_page(&self, id: &str, page_no: usize, width: u32, height: u32) -> Arc<Page<E, F>> {
        let page = self.register_page(id, page_no, width, height);
        page.start_in_thread();
        page
    }

    /// As [`get_page`](Self::get_page), but runs the state machine on the
    /// caller's thread and returns only once the page is terminal.
    pub fn get_page_blocking(
        &self,
        id: &str,
        page_no: usize,
        width: u32,
        height: u32,
    ) -> Arc<Page<E, F>> {
        let page = self.register_page(id, page_no, width, height);
        page.start();
        page
    }

    fn register_page(&self, id: &str, page_no: usize, width: u32, height: u32) -> Arc<Page<E, F>> {
        let page = Arc::new(Page::new(
            Arc::clone(&self.engine),
            self.document.as_ref(),
            Arc::clone(&self.factory),
            Arc::clone(&self.window_signal),
            page_no,
            width,
            height,
            id.to_string(),
        ));

        let previous = {
            let registry = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
            registry.get(id).cloned()
        };
        if let Some(previous) = previous {
            debug!("page id {id:?} re-requested, retiring the previous task");
            previous.shutdown();
        }

        let mut registry = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        registry.insert(id.to_string(), Arc::clone(&page));
        page
    }

    /// Abort the page task under `id`, join its worker and erase the slot.
    /// The slot is only erased after the worker has retired, and only if
    /// it still holds the task that was joined.
    pub fn remove_page(&self, id: &str) {
        let page = self.find_page(id);
        let Some(page) = page else {
            return;
        };

        page.shutdown();

        let mut registry = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        if registry
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, &page))
        {
            registry.remove(id);
        }
    }

    /// Non-blocking: true once the page under `id` is terminal.
    #[must_use]
    pub fn is_bitmap_ready(&self, id: &str) -> bool {
        self.find_page(id).is_some_and(|page| page.ready())
    }

    #[must_use]
    pub fn page_bitmap(&self, id: &str) -> Option<Arc<F::Bitmap>> {
        self.find_page(id)?.bitmap()
    }

    fn find_page(&self, id: &str) -> Option<Arc<Page<E, F>>> {
        let registry = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        registry.get(id).cloned()
    }

    /// Window-level signal: `Update` fires whenever a page retires, so UI
    /// observers can refresh.
    #[must_use]
    pub fn window_signal(&self) -> &Arc<Signal<WindowFlag>> {
        &self.window_signal
    }

    #[must_use]
    pub fn document_signal(&self) -> &Arc<Signal<DocumentFlag>> {
        &self.document_signal
    }

    /// Last error reported through the engine's message stream, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ask the pump thread to exit without tearing the document down.
    pub fn stop_message_handling(&self) {
        self.window_signal.set(WindowFlag::Close);
        self.document_signal.set(DocumentFlag::Message);
    }
}

impl<E: DecodeEngine, F: BitmapFactory> Drop for Document<E, F> {
    fn drop(&mut self) {
        // Teardown order is load-bearing: every page worker must retire
        // before the pump stops, and both before the engine handles are
        // released (document first, then context).
        let drained: Vec<Arc<Page<E, F>>> = {
            let mut registry = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
            registry.drain().map(|(_, page)| page).collect()
        };
        for page in &drained {
            page.shutdown();
        }
        drop(drained);

        self.stop_message_handling();
        let pump = self.pump.take();
        if let Some(pump) = pump {
            let _ = pump.join();
        }

        let document = self.document.take();
        if let Some(document) = document {
            self.engine.release_document(document);
        }
        let context = self.context.take();
        if let Some(context) = context {
            self.engine.release_context(context);
        }
    }
}

/// The message pump: drains the engine queue, feeds stream bytes on
/// demand and forwards page status changes to their tasks. All engine
/// message retrieval happens here and nowhere else.
#[allow(clippy::too_many_arguments)]
fn pump_loop<E: DecodeEngine, F: BitmapFactory>(
    engine: &E,
    context: &E::ContextHandle,
    document: &E::DocumentHandle,
    source: &dyn ByteSource,
    pages: &PageRegistry<E, F>,
    window_signal: &Signal<WindowFlag>,
    document_signal: &Signal<DocumentFlag>,
    last_error: &Mutex<Option<String>>,
) {
    while !document_signal.check(DocumentFlag::Create) {
        document_signal.wait_for(MESSAGE_POLL_INTERVAL, Some(DocumentFlag::Create));
    }

    // Byte offset already fed to the engine; stream requests continue from
    // here so supplier byte order is preserved.
    let mut cursor = 0usize;

    while !window_signal.check(WindowFlag::Close) {
        if document_signal.check(DocumentFlag::Message) {
            // Re-arm before draining so a callback racing the drain is
            // never lost.
            document_signal.reset(DocumentFlag::Message);
        } else {
            document_signal.wait_for(MESSAGE_POLL_INTERVAL, Some(DocumentFlag::Message));
            if window_signal.check(WindowFlag::Close) {
                break;
            }
            document_signal.reset(DocumentFlag::Message);
        }

        while let Some(message) = engine.peek_message(context) {
            match message {
                EngineMessage::Error { message } => {
                    warn!("engine error: {message}");
                    *last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(message);
                }
                EngineMessage::NewStream { stream_id } => {
                    feed_stream(engine, document, source, stream_id, &mut cursor);
                }
                EngineMessage::DocInfo => {
                    document_signal.set(DocumentFlag::Info);
                }
                EngineMessage::PageInfo { page } => {
                    resolve_page_status(engine, pages, &page);
                }
                EngineMessage::Info
                | EngineMessage::Progress
                | EngineMessage::Chunk
                | EngineMessage::Thumbnail
                | EngineMessage::Relayout
                | EngineMessage::Redisplay => {
                    trace!("ignoring engine message");
                }
            }
            engine.pop_message(context);
        }
    }

    debug!("message pump exiting");
}

/// Feed supplier bytes to a newly requested engine stream in fixed-size
/// chunks, then close it. A premature end of supply closes the stream
/// with the error flag so the engine fails the affected pages.
fn feed_stream<E: DecodeEngine>(
    engine: &E,
    document: &E::DocumentHandle,
    source: &dyn ByteSource,
    stream_id: u32,
    cursor: &mut usize,
) {
    let mut chunk = [0u8; STREAM_CHUNK_SIZE];
    let mut retries = 0u32;
    let mut failed = false;
    let total = source.len();

    while *cursor < total {
        match source.read_at(*cursor, &mut chunk) {
            Ok(0) => {
                warn!("byte supply dried up at {}/{total}", *cursor);
                failed = true;
                break;
            }
            Ok(count) => {
                engine.stream_write(document, stream_id, &chunk[..count]);
                *cursor += count;
                retries = 0;
            }
            Err(err) => {
                if source.is_end_of_data() {
                    warn!("byte supply exhausted at {}/{total}: {err}", *cursor);
                    failed = true;
                    break;
                }
                retries += 1;
                if retries >= MAX_READ_RETRIES {
                    warn!("giving up on byte supply at {}/{total}: {err}", *cursor);
                    failed = true;
                    break;
                }
                std::thread::sleep(RETRY_DELAY);
            }
        }
    }

    debug!("stream {stream_id}: fed {}/{total} bytes", *cursor);
    engine.close_stream(document, stream_id, failed);
}

/// Resolve a page status message to its task and flip the matching flag.
/// The registry lock is held for the lookup only, never across an engine
/// call.
fn resolve_page_status<E: DecodeEngine, F: BitmapFactory>(
    engine: &E,
    pages: &PageRegistry<E, F>,
    handle: &E::PageHandle,
) {
    let status = engine.page_decoding_status(handle);
    let page = {
        let registry = pages.lock().unwrap_or_else(PoisonError::into_inner);
        registry.values().find(|page| page.handle_is(handle)).cloned()
    };
    let Some(page) = page else {
        trace!("status change for an unregistered page handle");
        return;
    };

    match status {
        JobStatus::Ok => page.signal().set(PageFlag::Decoded),
        JobStatus::Failed => page.signal().set(PageFlag::Aborted),
        JobStatus::NotStarted | JobStatus::Started | JobStatus::Stopped => {}
    }
}
