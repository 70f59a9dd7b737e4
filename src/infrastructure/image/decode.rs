//! Decode pipeline: encoded bytes to a transformed RGBA bitmap.

use std::io::Cursor;

use bytes::Bytes;
use image::imageops::{self, FilterType};
use image::{ImageFormat, ImageReader, Limits, RgbaImage};
use tracing::{debug, trace};

use crate::domain::entities::{Bitmap, ResizeMode, TargetSize, TintColor, Transform};
use crate::domain::errors::LoadError;

/// Default cap on decoded width and height.
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

/// Where a scaled image lands inside the target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Scaled image width.
    pub width: u32,
    /// Scaled image height.
    pub height: u32,
    /// Horizontal offset inside the box; negative means clipped.
    pub x: i64,
    /// Vertical offset inside the box; negative means clipped.
    pub y: i64,
}

/// Computes how a `source` sized image is placed in `target` under `mode`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn placement(source: (u32, u32), target: TargetSize, mode: ResizeMode) -> Placement {
    let (sw, sh) = (source.0.max(1), source.1.max(1));
    let (tw, th) = (target.width, target.height);
    let scale_x = f64::from(tw) / f64::from(sw);
    let scale_y = f64::from(th) / f64::from(sh);
    let scaled = |scale: f64| {
        (
            ((f64::from(sw) * scale).round() as u32).max(1),
            ((f64::from(sh) * scale).round() as u32).max(1),
        )
    };
    let centered = |w: u32, h: u32| {
        (
            (i64::from(tw) - i64::from(w)) / 2,
            (i64::from(th) - i64::from(h)) / 2,
        )
    };

    let (width, height) = match mode {
        ResizeMode::Stretch => (tw, th),
        ResizeMode::Contain => {
            let (w, h) = scaled(scale_x.min(scale_y));
            (w.min(tw), h.min(th))
        }
        ResizeMode::Cover => {
            let (w, h) = scaled(scale_x.max(scale_y));
            (w.max(tw), h.max(th))
        }
        ResizeMode::Center => (sw, sh),
    };
    let (x, y) = centered(width, height);
    Placement {
        width,
        height,
        x,
        y,
    }
}

/// Source rectangle `(x, y, width, height)` that `Cover` keeps: the largest
/// centered region with the target's aspect ratio. Cropping before resizing
/// keeps the intermediate buffer no larger than the source.
#[must_use]
pub fn cover_crop(source: (u32, u32), target: TargetSize) -> (u32, u32, u32, u32) {
    let (sw, sh) = (u64::from(source.0.max(1)), u64::from(source.1.max(1)));
    let (tw, th) = (u64::from(target.width), u64::from(target.height));

    let (cw, ch) = if sw * th > sh * tw {
        (((sh * tw + th / 2) / th).clamp(1, sw), sh)
    } else {
        (sw, ((sw * th + tw / 2) / tw).clamp(1, sh))
    };
    let narrow = |v: u64| u32::try_from(v).unwrap_or(u32::MAX);
    (
        narrow((sw - cw) / 2),
        narrow((sh - ch) / 2),
        narrow(cw),
        narrow(ch),
    )
}

/// Turns encoded bytes into bitmaps.
#[derive(Debug, Clone, Copy)]
pub struct DecodePipeline {
    filter: FilterType,
    max_dimension: u32,
}

impl Default for DecodePipeline {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION)
    }
}

impl DecodePipeline {
    /// Creates a pipeline refusing images wider or taller than `max_dimension`.
    #[must_use]
    pub const fn new(max_dimension: u32) -> Self {
        Self {
            filter: FilterType::Lanczos3,
            max_dimension,
        }
    }

    /// Rejects target boxes larger than the dimension limit.
    ///
    /// # Errors
    /// Returns `LoadError::DecodeError` naming the oversized target.
    pub fn check_target(&self, transform: &Transform) -> Result<(), LoadError> {
        match transform.target_size {
            Some(target)
                if target.width > self.max_dimension || target.height > self.max_dimension =>
            {
                Err(LoadError::decode(format!(
                    "target {}x{} exceeds the {} pixel limit",
                    target.width, target.height, self.max_dimension
                )))
            }
            _ => Ok(()),
        }
    }

    /// Decodes on the blocking pool so callers never stall on CPU work.
    ///
    /// # Errors
    /// Returns `LoadError::DecodeError` for corrupt, truncated or unsupported input.
    pub async fn decode_async(&self, bytes: Bytes, transform: Transform) -> Result<Bitmap, LoadError> {
        let pipeline = *self;
        tokio::task::spawn_blocking(move || pipeline.decode(&bytes, &transform))
            .await
            .map_err(|e| LoadError::decode(format!("Decode task panicked: {e}")))?
    }

    /// Decodes `bytes` and applies resize and tint.
    ///
    /// # Errors
    /// Returns `LoadError::DecodeError` for corrupt, truncated or unsupported input.
    pub fn decode(&self, bytes: &[u8], transform: &Transform) -> Result<Bitmap, LoadError> {
        self.check_target(transform)?;

        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| LoadError::decode(format!("Failed to read image: {e}")))?;
        let format = reader
            .format()
            .ok_or_else(|| LoadError::decode("unrecognized image format"))?;

        ensure_complete(format, bytes)?;

        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        reader.limits(limits);

        let decoded = reader
            .decode()
            .map_err(|e| LoadError::decode(format!("Failed to decode image: {e}")))?;
        let (source_width, source_height) = (decoded.width(), decoded.height());
        trace!(?format, source_width, source_height, "Decoded image");

        let mut pixels = match transform.target_size {
            Some(target) => self.fit(decoded.to_rgba8(), target, transform.resize_mode),
            None => decoded.to_rgba8(),
        };
        if let Some(tint) = transform.tint {
            apply_tint(&mut pixels, tint);
        }

        debug!(
            width = pixels.width(),
            height = pixels.height(),
            mode = %transform.resize_mode,
            "Rendered bitmap"
        );
        Ok(Bitmap::new(pixels, source_width, source_height))
    }

    fn fit(&self, source: RgbaImage, target: TargetSize, mode: ResizeMode) -> RgbaImage {
        match mode {
            ResizeMode::Stretch => self.resized(source, target.width, target.height),
            ResizeMode::Cover => {
                let (x, y, w, h) = cover_crop(source.dimensions(), target);
                let cropped = if (w, h) == source.dimensions() {
                    source
                } else {
                    imageops::crop_imm(&source, x, y, w, h).to_image()
                };
                self.resized(cropped, target.width, target.height)
            }
            ResizeMode::Contain | ResizeMode::Center => {
                let place = placement(source.dimensions(), target, mode);
                let scaled = self.resized(source, place.width, place.height);
                let mut canvas = RgbaImage::new(target.width, target.height);
                imageops::replace(&mut canvas, &scaled, place.x, place.y);
                canvas
            }
        }
    }

    fn resized(&self, source: RgbaImage, width: u32, height: u32) -> RgbaImage {
        if source.dimensions() == (width, height) {
            source
        } else {
            imageops::resize(&source, width, height, self.filter)
        }
    }
}

/// Recolors every non-transparent pixel, keeping its alpha.
pub fn apply_tint(pixels: &mut RgbaImage, tint: TintColor) {
    for pixel in pixels.pixels_mut() {
        if pixel[3] > 0 {
            pixel[0] = tint.r;
            pixel[1] = tint.g;
            pixel[2] = tint.b;
        }
    }
}

/// Rejects streams whose format trailer is missing, so a truncated download
/// is never rendered partially.
fn ensure_complete(format: ImageFormat, bytes: &[u8]) -> Result<(), LoadError> {
    let trimmed = match bytes.iter().rposition(|&b| b != 0) {
        Some(last) => &bytes[..=last],
        None => &[][..],
    };

    let complete = match format {
        ImageFormat::Png => bytes
            .windows(4)
            .rposition(|w| w == b"IEND")
            .is_some_and(|pos| pos + 8 <= bytes.len()),
        ImageFormat::Jpeg => trimmed.ends_with(&[0xFF, 0xD9]),
        ImageFormat::Gif => trimmed.last() == Some(&0x3B),
        _ => true,
    };

    if complete {
        Ok(())
    } else {
        Err(LoadError::decode(format!("truncated {format:?} stream")))
    }
}
