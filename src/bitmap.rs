//! Bitmap construction seam

/// Geometry and layout of a raw render buffer handed to the factory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitmapSpec {
    pub width: u32,
    pub height: u32,
    /// 1 for bitonal mask renders, 3 for color.
    pub bytes_per_pixel: usize,
    /// Color table size: 256 for bitonal grey renders, 0 for color.
    pub palette_size: usize,
    /// Bytes per row, padded to a 4-byte boundary.
    pub row_stride: usize,
}

/// Turns a raw pixel buffer into an application-specific image object.
///
/// The buffer is borrowed: it is released by the page worker as soon as
/// this call returns, so implementations must copy or otherwise adopt the
/// pixel data internally. Returning `None` leaves the page without a
/// bitmap (treated the same as a failed render).
pub trait BitmapFactory: Send + Sync + 'static {
    type Bitmap: Send + Sync + 'static;

    fn create_bitmap(&self, spec: &BitmapSpec, pixels: &[u8]) -> Option<Self::Bitmap>;
}
