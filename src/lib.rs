//! Asynchronous per-page decoding and rendering over a message-driven
//! decoding engine.
//!
//! The engine is a black box behind the [`DecodeEngine`] trait: it hands
//! out context, document and page handles, asks for document bytes
//! through its message queue, and reports progress only through that
//! queue plus a payload-free callback. This crate supplies the machinery
//! around it: a per-document pump thread that drains the queue and feeds
//! bytes on demand, one worker thread per requested page driving
//! decode → render with cooperative abort, and the condvar-backed
//! [`Signal`] primitive that coordinates all of it without busy-polling.

pub mod bitmap;
pub mod document;
pub mod engine;
pub mod file;
pub mod page;
pub mod signal;
pub mod stream;
pub mod text;

pub use bitmap::{BitmapFactory, BitmapSpec};
pub use document::{DEFAULT_METADATA_TIMEOUT, Document};
pub use engine::{
    DecodeEngine, EngineMessage, JobStatus, PageDims, PageInfoFetch, PageKind, PageRect,
    PixelLayout, RenderMode, TextFetch, TextNode,
};
pub use file::DjvuFile;
pub use page::Page;
pub use signal::{DocumentFlag, FlagSet, PageFlag, Signal, WindowFlag};
pub use stream::{ByteSource, MemorySource, StreamError};
pub use text::{TextRect, Word};
