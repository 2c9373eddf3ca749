//! Trait seam for the black-box decoding engine

/// Decoding job status as reported by the engine for documents and pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    NotStarted,
    Started,
    Ok,
    Failed,
    Stopped,
}

/// Coarse page classification; drives the render mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageKind {
    /// Black-and-white mask layer only.
    Bitonal,
    Photo,
    Compound,
    Unknown,
}

/// Rasterization mode passed to the engine's render call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderMode {
    /// Full color rendition.
    Color,
    /// Foreground mask only, used for bitonal pages.
    MaskOnly,
}

/// Pixel layout of the caller-supplied render buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    /// One byte per pixel, grey ramp.
    Grey8,
    /// Three bytes per pixel, blue-green-red order.
    Bgr24,
}

/// Axis-aligned rectangle in page pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PageRect {
    #[must_use]
    pub const fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Page geometry record from the document metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageDims {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
}

/// Outcome of a metadata query that the engine may still be working on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageInfoFetch {
    Ready(PageDims),
    /// The engine has not finished decoding the directory entry; retry.
    Pending,
    /// Definitive failure; retrying will not help.
    Failed,
}

/// One node of the engine's document-structure export for a page.
///
/// Word coordinates are in the engine's bottom-left-origin system; see
/// [`crate::text::collect_words`] for the flip to top-left.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TextNode {
    /// A grouping node (page, column, region, paragraph, line, ...).
    Branch(Vec<TextNode>),
    Word {
        text: String,
        x_min: i32,
        y_min: i32,
        x_max: i32,
        y_max: i32,
    },
}

/// Outcome of requesting the word tree for a page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TextFetch {
    /// Export not ready yet; retry.
    Pending,
    /// The page carries no text layer.
    Empty,
    Tree(TextNode),
}

/// Typed event drained from the engine's message queue.
///
/// `P` is the engine's page handle type so PAGEINFO events can be resolved
/// back to the owning page task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineMessage<P> {
    Error { message: String },
    Info,
    /// The engine wants document bytes written to `stream_id`.
    NewStream { stream_id: u32 },
    /// Document metadata became available.
    DocInfo,
    /// The decoding status of `page` changed.
    PageInfo { page: P },
    Progress,
    Chunk,
    Thumbnail,
    Relayout,
    Redisplay,
}

/// Handle-based interface of the decoding engine.
///
/// The engine is opaque: it owns a context, one streamed document per
/// context here, and page handles created by page number. It reports
/// progress only through the message queue plus a callback that fires on an
/// arbitrary engine-internal thread. Implementations must tolerate calls
/// from multiple threads, but message retrieval (`peek_message` /
/// `pop_message`) is only ever issued from the document's pump thread.
///
/// Creation calls return `None` where the underlying library would return a
/// null handle; no engine failure is surfaced as a Rust error.
pub trait DecodeEngine: Send + Sync + 'static {
    type ContextHandle: Clone + Send + Sync + 'static;
    type DocumentHandle: Clone + Send + Sync + 'static;
    type PageHandle: Clone + PartialEq + Send + Sync + 'static;

    fn create_context(&self) -> Option<Self::ContextHandle>;

    fn release_context(&self, ctx: Self::ContextHandle);

    /// Install the notification hook. The callback runs on an engine-internal
    /// thread and must only flip a signal flag; it must never call back into
    /// the engine.
    fn set_message_callback(&self, ctx: &Self::ContextHandle, callback: Box<dyn Fn() + Send + Sync>);

    fn create_document(
        &self,
        ctx: &Self::ContextHandle,
        streamed: bool,
    ) -> Option<Self::DocumentHandle>;

    fn release_document(&self, doc: Self::DocumentHandle);

    fn document_decoding_status(&self, doc: &Self::DocumentHandle) -> JobStatus;

    fn document_page_count(&self, doc: &Self::DocumentHandle) -> usize;

    fn document_page_info(&self, doc: &Self::DocumentHandle, page_no: usize) -> PageInfoFetch;

    fn document_page_text(&self, doc: &Self::DocumentHandle, page_no: usize) -> TextFetch;

    fn create_page(&self, doc: &Self::DocumentHandle, page_no: usize) -> Option<Self::PageHandle>;

    fn release_page(&self, page: Self::PageHandle);

    fn page_decoding_status(&self, page: &Self::PageHandle) -> JobStatus;

    /// Ask the engine to stop an in-flight decoding job. Cooperative: the
    /// job retires on the engine's schedule, not synchronously.
    fn stop_page_decoding(&self, page: &Self::PageHandle);

    fn page_kind(&self, page: &Self::PageHandle) -> PageKind;

    fn page_width(&self, page: &Self::PageHandle) -> u32;

    fn page_height(&self, page: &Self::PageHandle) -> u32;

    /// Rasterize `page_rect` of the decoded page into `pixels`, which holds
    /// `row_stride * target_rect.height` bytes. Returns false when the
    /// engine could not produce pixels (soft failure).
    #[allow(clippy::too_many_arguments)]
    fn render_page(
        &self,
        page: &Self::PageHandle,
        mode: RenderMode,
        page_rect: &PageRect,
        target_rect: &PageRect,
        layout: PixelLayout,
        row_stride: usize,
        pixels: &mut [u8],
    ) -> bool;

    fn stream_write(&self, doc: &Self::DocumentHandle, stream_id: u32, bytes: &[u8]);

    /// Close a byte stream. `failed` tells the engine the supply ended
    /// prematurely, which fails the affected parts of the document.
    fn close_stream(&self, doc: &Self::DocumentHandle, stream_id: u32, failed: bool);

    fn peek_message(&self, ctx: &Self::ContextHandle) -> Option<EngineMessage<Self::PageHandle>>;

    fn pop_message(&self, ctx: &Self::ContextHandle);
}
