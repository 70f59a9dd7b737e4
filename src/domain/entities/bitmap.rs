//! Decoded bitmaps and load results.

use std::sync::Arc;

use image::RgbaImage;

use super::CacheKey;

/// A decoded, transformed, renderable RGBA bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pixels: RgbaImage,
    source_width: u32,
    source_height: u32,
}

impl Bitmap {
    /// Wraps rendered pixels together with the dimensions of the encoded source.
    #[must_use]
    pub const fn new(pixels: RgbaImage, source_width: u32, source_height: u32) -> Self {
        Self {
            pixels,
            source_width,
            source_height,
        }
    }

    /// Rendered width.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Rendered height.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Intrinsic dimensions of the source image before any transform.
    #[must_use]
    pub const fn source_dimensions(&self) -> (u32, u32) {
        (self.source_width, self.source_height)
    }

    /// Pixel buffer.
    #[must_use]
    pub const fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Bytes accounted against the memory budget.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.pixels.as_raw().len() as u64
    }
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from the in-memory store.
    MemoryCache,
    /// Loaded from the disk store.
    DiskCache,
    /// Downloaded from network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Summary handed to `onLoad` listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapInfo {
    /// Rendered width.
    pub width: u32,
    /// Rendered height.
    pub height: u32,
    /// Where the bytes came from.
    pub source: ImageSource,
}

/// A successfully loaded image.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Cache key of the source.
    pub key: CacheKey,
    /// The rendition requested by the consumer.
    pub bitmap: Arc<Bitmap>,
    /// Which tier satisfied the request.
    pub source: ImageSource,
}

impl LoadedImage {
    /// Returns the listener-facing summary.
    #[must_use]
    pub fn info(&self) -> BitmapInfo {
        BitmapInfo {
            width: self.bitmap.width(),
            height: self.bitmap.height(),
            source: self.source,
        }
    }
}
