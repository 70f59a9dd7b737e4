mod default_source_port;
mod image_fetcher_port;
mod load_listener_port;

pub use default_source_port::DefaultSourcePort;
pub use image_fetcher_port::{FetchOutcome, FetchRequest, ImageFetcherPort, ProgressFn};
pub use load_listener_port::LoadListener;

#[cfg(test)]
pub use default_source_port::MockDefaultSourcePort;
