//! Byte supplier seam feeding document data to the engine

/// Errors surfaced by a [`ByteSource`].
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("byte source I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("read at {offset} past end of {len}-byte source")]
    OutOfBounds { offset: usize, len: usize },

    #[error("{detail}")]
    Generic { detail: String },
}

impl StreamError {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }
}

/// Supplier of the raw document bytes.
///
/// The pump thread pulls from this whenever the engine requests a new
/// stream, in bounded chunks and in strict offset order. A failed read is
/// retried after re-querying [`is_end_of_data`](Self::is_end_of_data); once
/// the supply is genuinely exhausted the stream is closed with an error
/// flag and the engine fails the affected pages.
pub trait ByteSource: Send + Sync + 'static {
    /// Total number of bytes the source intends to supply.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy bytes starting at `offset` into `buf`, returning the count
    /// copied. A short read is not an error; zero means no more data at
    /// this offset.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, StreamError>;

    /// True once no further bytes will ever become available.
    fn is_end_of_data(&self) -> bool;
}

/// In-memory byte source over a fully materialized document.
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, StreamError> {
        if offset > self.data.len() {
            return Err(StreamError::OutOfBounds {
                offset,
                len: self.data.len(),
            });
        }
        let available = &self.data[offset..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        Ok(count)
    }

    fn is_end_of_data(&self) -> bool {
        true
    }
}
