//! Scripted fake engine and bitmap factory for lifecycle tests

// Shared by every test binary; each one uses a subset.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use djvu_pages::{
    BitmapFactory, BitmapSpec, ByteSource, DecodeEngine, EngineMessage, JobStatus, PageDims,
    PageInfoFetch, PageKind, PageRect, PixelLayout, RenderMode, StreamError, TextFetch, TextNode,
};

pub const PAGE_WIDTH: u32 = 64;
pub const PAGE_HEIGHT: u32 = 80;

/// Call once per test that wants pump/worker logging on failures.
pub fn init_logs() {
    let _ = simplelog::SimpleLogger::init(
        simplelog::LevelFilter::Debug,
        simplelog::Config::default(),
    );
}

struct PageState {
    page_no: usize,
    polls_until_decoded: u32,
    status: JobStatus,
    released: u32,
}

struct EngineState {
    doc_status: JobStatus,
    received: Vec<u8>,
    queue: VecDeque<EngineMessage<u64>>,
    pages: HashMap<u64, PageState>,
    /// Chronological record of the interesting engine calls, used for
    /// teardown-ordering assertions.
    events: Vec<String>,
}

/// Deterministic in-process stand-in for the decoding engine.
///
/// Documents decode once the full expected byte count has been streamed
/// in; pages sit in `Started` for a configurable number of status polls
/// and then flip to `Ok` (or `Failed`), posting a page status message and
/// firing the registered callback exactly like the real engine's internal
/// decoder threads would.
pub struct FakeEngine {
    state: Mutex<EngineState>,
    callback: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    next_page: AtomicU64,
    expected_len: usize,
    page_count: usize,
    /// Status polls a page spends in `Started` before becoming definitive.
    pub decode_delay_polls: u32,
    /// Pages whose decode fails outright.
    pub fail_pages: Vec<usize>,
    /// Pages whose render call returns false.
    pub fail_render_pages: Vec<usize>,
    pub bitonal_pages: Vec<usize>,
    pub text_tree: Mutex<Option<TextNode>>,
    /// Simulate a null context / document handle from the engine.
    pub refuse_context: bool,
    pub refuse_document: bool,
}

impl FakeEngine {
    pub fn new(page_count: usize, expected_len: usize) -> Self {
        Self {
            state: Mutex::new(EngineState {
                doc_status: JobStatus::Started,
                received: Vec::new(),
                queue: VecDeque::new(),
                pages: HashMap::new(),
                events: Vec::new(),
            }),
            callback: Mutex::new(None),
            next_page: AtomicU64::new(1),
            expected_len,
            page_count,
            decode_delay_polls: 2,
            fail_pages: Vec::new(),
            fail_render_pages: Vec::new(),
            bitonal_pages: Vec::new(),
            text_tree: Mutex::new(None),
            refuse_context: false,
            refuse_document: false,
        }
    }

    /// Push an error message through the queue, as the engine does for
    /// non-fatal decode problems.
    pub fn post_error(&self, message: &str) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.queue.push_back(EngineMessage::Error {
                message: message.to_string(),
            });
        }
        self.fire_callback();
    }

    pub fn events(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .clone()
    }

    pub fn release_counts(&self) -> HashMap<u64, u32> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pages
            .iter()
            .map(|(id, page)| (*id, page.released))
            .collect()
    }

    pub fn received_bytes(&self) -> Vec<u8> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .received
            .clone()
    }

    fn fire_callback(&self) {
        let callback = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = callback.as_ref() {
            callback();
        }
    }
}

impl DecodeEngine for FakeEngine {
    type ContextHandle = u32;
    type DocumentHandle = u32;
    type PageHandle = u64;

    fn create_context(&self) -> Option<u32> {
        if self.refuse_context {
            return None;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.events.push("create_context".to_string());
        Some(1)
    }

    fn release_context(&self, _ctx: u32) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.events.push("release_context".to_string());
    }

    fn set_message_callback(&self, _ctx: &u32, callback: Box<dyn Fn() + Send + Sync>) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn create_document(&self, _ctx: &u32, _streamed: bool) -> Option<u32> {
        if self.refuse_document {
            return None;
        }
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.events.push("create_document".to_string());
            state
                .queue
                .push_back(EngineMessage::NewStream { stream_id: 1 });
        }
        self.fire_callback();
        Some(1)
    }

    fn release_document(&self, _doc: u32) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.events.push("release_document".to_string());
    }

    fn document_decoding_status(&self, _doc: &u32) -> JobStatus {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .doc_status
    }

    fn document_page_count(&self, _doc: &u32) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.doc_status == JobStatus::Ok {
            self.page_count
        } else {
            0
        }
    }

    fn document_page_info(&self, _doc: &u32, page_no: usize) -> PageInfoFetch {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.doc_status != JobStatus::Ok || page_no >= self.page_count {
            return PageInfoFetch::Failed;
        }
        PageInfoFetch::Ready(PageDims {
            width: PAGE_WIDTH,
            height: PAGE_HEIGHT,
            dpi: 300,
        })
    }

    fn document_page_text(&self, _doc: &u32, _page_no: usize) -> TextFetch {
        let tree = self.text_tree.lock().unwrap_or_else(PoisonError::into_inner);
        match tree.as_ref() {
            Some(tree) => TextFetch::Tree(tree.clone()),
            None => TextFetch::Empty,
        }
    }

    fn create_page(&self, _doc: &u32, page_no: usize) -> Option<u64> {
        let id = self.next_page.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let status = if state.doc_status == JobStatus::Failed {
            JobStatus::Failed
        } else {
            JobStatus::Started
        };
        state.pages.insert(
            id,
            PageState {
                page_no,
                polls_until_decoded: self.decode_delay_polls,
                status,
                released: 0,
            },
        );
        state.events.push(format!("create_page:{id}"));
        Some(id)
    }

    fn release_page(&self, page: u64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = state.pages.get_mut(&page) {
            entry.released += 1;
        }
        state.events.push(format!("release_page:{page}"));
    }

    fn page_decoding_status(&self, page: &u64) -> JobStatus {
        let (status, announce) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = state.pages.get_mut(page) else {
                return JobStatus::Stopped;
            };
            let mut announce = false;
            if entry.status == JobStatus::Started {
                if entry.polls_until_decoded > 0 {
                    entry.polls_until_decoded -= 1;
                } else {
                    entry.status = if self.fail_pages.contains(&entry.page_no) {
                        JobStatus::Failed
                    } else {
                        JobStatus::Ok
                    };
                    announce = true;
                }
            }
            let status = entry.status;
            if announce {
                state.queue.push_back(EngineMessage::PageInfo { page: *page });
            }
            (status, announce)
        };
        if announce {
            self.fire_callback();
        }
        status
    }

    fn stop_page_decoding(&self, page: &u64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = state.pages.get_mut(page) {
            if entry.status == JobStatus::Started || entry.status == JobStatus::NotStarted {
                entry.status = JobStatus::Stopped;
            }
        }
        state.events.push(format!("stop_page:{page}"));
    }

    fn page_kind(&self, page: &u64) -> PageKind {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let bitonal = state
            .pages
            .get(page)
            .is_some_and(|entry| self.bitonal_pages.contains(&entry.page_no));
        if bitonal {
            PageKind::Bitonal
        } else {
            PageKind::Compound
        }
    }

    fn page_width(&self, _page: &u64) -> u32 {
        PAGE_WIDTH
    }

    fn page_height(&self, _page: &u64) -> u32 {
        PAGE_HEIGHT
    }

    fn render_page(
        &self,
        page: &u64,
        _mode: RenderMode,
        _page_rect: &PageRect,
        _target_rect: &PageRect,
        _layout: PixelLayout,
        _row_stride: usize,
        pixels: &mut [u8],
    ) -> bool {
        let failed = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.events.push(format!("render:{page}"));
            state
                .pages
                .get(page)
                .is_some_and(|entry| self.fail_render_pages.contains(&entry.page_no))
        };
        if failed {
            return false;
        }
        pixels.fill(0x5A);
        true
    }

    fn stream_write(&self, _doc: &u32, _stream_id: u32, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.received.extend_from_slice(bytes);
    }

    fn close_stream(&self, _doc: &u32, _stream_id: u32, failed: bool) {
        let announce = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if failed || state.received.len() < self.expected_len {
                state.doc_status = JobStatus::Failed;
                false
            } else {
                state.doc_status = JobStatus::Ok;
                state.queue.push_back(EngineMessage::DocInfo);
                true
            }
        };
        if announce {
            self.fire_callback();
        }
    }

    fn peek_message(&self, _ctx: &u32) -> Option<EngineMessage<u64>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue
            .front()
            .cloned()
    }

    fn pop_message(&self, _ctx: &u32) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue
            .pop_front();
    }
}

/// Bitmap stand-in that copies what the factory contract demands.
#[derive(Clone, Debug)]
pub struct TestBitmap {
    pub spec: BitmapSpec,
    pub byte_count: usize,
    pub first_pixel: u8,
}

pub struct RecordingFactory;

impl BitmapFactory for RecordingFactory {
    type Bitmap = TestBitmap;

    fn create_bitmap(&self, spec: &BitmapSpec, pixels: &[u8]) -> Option<TestBitmap> {
        Some(TestBitmap {
            spec: *spec,
            byte_count: pixels.len(),
            first_pixel: pixels.first().copied().unwrap_or(0),
        })
    }
}

/// Byte source whose backing store fails partway through.
pub struct FlakySource {
    data: Vec<u8>,
    fail_at: usize,
}

impl FlakySource {
    pub fn new(len: usize, fail_at: usize) -> Self {
        Self {
            data: vec![0xD7; len],
            fail_at,
        }
    }
}

impl ByteSource for FlakySource {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, StreamError> {
        if offset >= self.fail_at {
            return Err(StreamError::generic("backing store went away"));
        }
        let end = self.fail_at.min(self.data.len());
        let available = &self.data[offset..end];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        Ok(count)
    }

    fn is_end_of_data(&self) -> bool {
        true
    }
}
