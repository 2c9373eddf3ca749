//! Per-page decode and render worker

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::bitmap::{BitmapFactory, BitmapSpec};
use crate::engine::{DecodeEngine, JobStatus, PageKind, PageRect, PixelLayout, RenderMode};
use crate::signal::{PageFlag, Signal, WindowFlag};

/// Re-poll interval while the engine is still analysing the page. The pump
/// thread also wakes the worker as soon as a page status message arrives,
/// so this only bounds the stale case.
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Bounded re-check interval for blocking waiters.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// State shared between the controller and its worker thread.
///
/// The worker captures this inner value, never the controller itself, so
/// the thread cannot keep its own controller alive and `Drop` can always
/// join it.
struct PageInner<E: DecodeEngine, F: BitmapFactory> {
    engine: Arc<E>,
    factory: Arc<F>,
    page_no: usize,
    width: u32,
    height: u32,
    /// Engine page handle. Cleared exactly once, by whichever of the worker
    /// and `shutdown` gets to it first; `stop_page_decoding` and the final
    /// release are the only engine calls made under this lock.
    handle: Mutex<Option<E::PageHandle>>,
    bitmap: Mutex<Option<Arc<F::Bitmap>>>,
    signal: Signal<PageFlag>,
    window_signal: Arc<Signal<WindowFlag>>,
}

impl<E: DecodeEngine, F: BitmapFactory> PageInner<E, F> {
    /// The page state machine: wait for decode, render once, retire.
    fn run(&self) {
        trace!("page {}: worker starting", self.page_no);

        while !self.signal.check(PageFlag::Decoded) && !self.signal.check(PageFlag::Aborted) {
            match self.handle_status() {
                JobStatus::Ok => self.signal.set(PageFlag::Decoded),
                JobStatus::Failed => self.signal.set(PageFlag::Aborted),
                _ => self.signal.wait_for(STATUS_POLL_INTERVAL, None),
            }
        }

        if self.signal.check(PageFlag::Decoded) && !self.signal.check(PageFlag::Aborted) {
            self.render();
        }

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            self.engine.release_page(handle);
        }

        self.signal.set(PageFlag::Rendered);
        self.window_signal.set(WindowFlag::Update);
        trace!("page {}: worker retired", self.page_no);
    }

    fn handle_status(&self) -> JobStatus {
        let guard = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .map_or(JobStatus::Failed, |handle| self.engine.page_decoding_status(handle))
    }

    /// Single rasterization pass. The handle lock is not held across the
    /// render call, so an abort can still reach the engine mid-render.
    fn render(&self) {
        let page = {
            let guard = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.as_ref() {
                Some(page) => page.clone(),
                None => return,
            }
        };

        let bitonal = self.engine.page_kind(&page) == PageKind::Bitonal;
        let (mode, layout, bytes_per_pixel, palette_size) = if bitonal {
            (RenderMode::MaskOnly, PixelLayout::Grey8, 1, 256)
        } else {
            (RenderMode::Color, PixelLayout::Bgr24, 3, 0)
        };

        let width = if self.width > 0 {
            self.width
        } else {
            self.engine.page_width(&page)
        };
        let height = if self.height > 0 {
            self.height
        } else {
            self.engine.page_height(&page)
        };
        if width == 0 || height == 0 {
            warn!("page {}: nothing to rasterize ({width}x{height})", self.page_no);
            return;
        }

        // Rows padded to a 4-byte boundary.
        let row_stride = ((width as usize * bytes_per_pixel) + 3) / 4 * 4;
        let mut pixels = vec![0u8; row_stride * height as usize];
        let full = PageRect::full(width, height);

        if self
            .engine
            .render_page(&page, mode, &full, &full, layout, row_stride, &mut pixels)
        {
            let spec = BitmapSpec {
                width,
                height,
                bytes_per_pixel,
                palette_size,
                row_stride,
            };
            if let Some(bitmap) = self.factory.create_bitmap(&spec, &pixels) {
                *self.bitmap.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(Arc::new(bitmap));
            }
        } else {
            debug!("page {}: engine render call failed", self.page_no);
        }
        // pixels dropped here; the factory has copied what it needs
    }
}

/// One requested page: a state machine driven by a dedicated worker thread
/// (or synchronously via [`start`](Self::start)) through
/// decode → render → rendered/aborted.
///
/// `Rendered` is terminal and is reached on success, failure and abort
/// alike, so blocking waiters always unblock.
pub struct Page<E: DecodeEngine, F: BitmapFactory> {
    inner: Arc<PageInner<E, F>>,
    id: String,
    started: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<E: DecodeEngine, F: BitmapFactory> Page<E, F> {
    /// Creates the engine page handle but does not start decoding.
    pub(crate) fn new(
        engine: Arc<E>,
        document: Option<&E::DocumentHandle>,
        factory: Arc<F>,
        window_signal: Arc<Signal<WindowFlag>>,
        page_no: usize,
        width: u32,
        height: u32,
        id: String,
    ) -> Self {
        let handle = document.and_then(|doc| engine.create_page(doc, page_no));
        if document.is_some() && handle.is_none() {
            warn!("page {page_no}: engine refused to create a page handle");
        }

        Self {
            inner: Arc::new(PageInner {
                engine,
                factory,
                page_no,
                width,
                height,
                handle: Mutex::new(handle),
                bitmap: Mutex::new(None),
                signal: Signal::new(),
                window_signal,
            }),
            id,
            started: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Start the state machine on a dedicated worker thread. Idempotent.
    pub fn start_in_thread(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let worker = std::thread::spawn(move || inner.run());
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(worker);
    }

    /// Run the state machine synchronously on the caller's thread,
    /// returning once the page is `Rendered`. Idempotent with
    /// [`start_in_thread`](Self::start_in_thread).
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.run();
    }

    /// Non-blocking: true once the page reached its terminal state.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.inner.signal.check(PageFlag::Rendered)
    }

    /// Block until the page reaches its terminal state.
    pub fn wait(&self) {
        while !self.inner.signal.check(PageFlag::Rendered) {
            self.inner
                .signal
                .wait_for(WAIT_POLL_INTERVAL, Some(PageFlag::Rendered));
        }
    }

    /// The rendered bitmap, if any. Empty until `Rendered`, and empty
    /// forever if the page was aborted or the render call failed.
    #[must_use]
    pub fn bitmap(&self) -> Option<Arc<F::Bitmap>> {
        self.inner
            .bitmap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Request cancellation.
    ///
    /// Returns true when the page no longer needs the engine (never
    /// started, or already decoded and rendered); false when an engine job
    /// was actively stopped and the worker is still retiring. Safe to call
    /// concurrently with the worker and with destruction.
    pub fn abort(&self) -> bool {
        self.inner.signal.set(PageFlag::Aborted);

        if !self.started.load(Ordering::SeqCst) {
            // No worker racing us: retire the handle directly.
            let handle = self
                .inner
                .handle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(handle) = handle {
                self.inner.engine.release_page(handle);
            }
            self.inner.signal.set(PageFlag::Rendered);
            return true;
        }

        if self.inner.signal.check(PageFlag::Decoded) {
            return self.inner.signal.check(PageFlag::Rendered);
        }

        let status = {
            let guard = self
                .inner
                .handle
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard
                .as_ref()
                .map_or(JobStatus::Stopped, |handle| {
                    self.inner.engine.page_decoding_status(handle)
                })
        };

        if status == JobStatus::Started {
            let guard = self
                .inner
                .handle
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(handle) = guard.as_ref() {
                self.inner.engine.stop_page_decoding(handle);
            }
            false
        } else {
            // Job never started or already finished; the worker observes
            // the abort flag and retires on its own.
            while !self.inner.signal.check(PageFlag::Rendered) {
                self.inner
                    .signal
                    .wait_for(WAIT_POLL_INTERVAL, Some(PageFlag::Rendered));
            }
            true
        }
    }

    /// Abort, retire the worker and release the engine handle. Idempotent;
    /// the document calls this before its own handles go away, and `Drop`
    /// calls it unconditionally.
    pub(crate) fn shutdown(&self) {
        self.inner.signal.set(PageFlag::Aborted);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = worker.join();
        } else if self.started.load(Ordering::SeqCst) {
            // Started synchronously on some caller's thread; wait for that
            // runner to retire. It owns the handle release.
            while !self.inner.signal.check(PageFlag::Rendered) {
                self.inner
                    .signal
                    .wait_for(WAIT_POLL_INTERVAL, Some(PageFlag::Rendered));
            }
            return;
        }

        let handle = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            self.inner.engine.release_page(handle);
        }

        self.inner.signal.set(PageFlag::Rendered);
    }

    #[must_use]
    pub fn page_no(&self) -> usize {
        self.inner.page_no
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.inner.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.inner.height
    }

    /// The page's lifecycle signal. The pump thread flips `Decoded` and
    /// `Aborted` here as engine status messages arrive; external observers
    /// may wait on it.
    #[must_use]
    pub fn signal(&self) -> &Signal<PageFlag> {
        &self.inner.signal
    }

    /// True if this task owns the given engine page handle.
    pub(crate) fn handle_is(&self, handle: &E::PageHandle) -> bool {
        let guard = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().is_some_and(|own| own == handle)
    }
}

impl<E: DecodeEngine, F: BitmapFactory> Drop for Page<E, F> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
