//! Domain entity definitions.

mod bitmap;
mod cache_entry;
mod cache_key;
mod default_source;
mod load_event;
mod request;

pub use bitmap::{Bitmap, BitmapInfo, ImageSource, LoadedImage};
pub use cache_entry::{CacheEntry, HttpValidators, RevalidationMode};
pub use cache_key::CacheKey;
pub use default_source::{DefaultSource, ResolvedSource};
pub use load_event::{FlightState, LoadEvent};
pub use request::{
    CachePolicy, ImageRequest, Priority, ResizeMode, TargetSize, TintColor, Transform,
};
