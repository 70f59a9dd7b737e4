//! Callback port mirroring the binding layer's image lifecycle props.

use crate::domain::entities::{BitmapInfo, LoadEvent, LoadedImage};
use crate::domain::errors::LoadError;

/// Receives lifecycle callbacks for one load. All methods default to no-ops.
pub trait LoadListener: Send + Sync {
    /// `onLoadStart`.
    fn on_load_start(&self) {}

    /// `onProgress`.
    fn on_progress(&self, _loaded: u64, _total: Option<u64>) {}

    /// `onLoad`.
    fn on_load(&self, _info: BitmapInfo, _image: &LoadedImage) {}

    /// `onError`.
    fn on_error(&self, _error: &LoadError) {}

    /// `onLoadEnd`.
    fn on_load_end(&self) {}

    /// Routes one event to the matching callback.
    fn dispatch(&self, event: &LoadEvent) {
        match event {
            LoadEvent::LoadStart => self.on_load_start(),
            LoadEvent::Progress { loaded, total } => self.on_progress(*loaded, *total),
            LoadEvent::Load(image) => self.on_load(image.info(), image),
            LoadEvent::Error(error) => self.on_error(error),
            LoadEvent::LoadEnd => self.on_load_end(),
        }
    }
}
