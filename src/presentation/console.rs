//! Prints load lifecycle events to the terminal.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::entities::{BitmapInfo, LoadedImage};
use crate::domain::errors::LoadError;
use crate::domain::ports::LoadListener;

const NO_PROGRESS: u64 = u64::MAX;

/// A [`LoadListener`] writing one line per lifecycle step.
///
/// Progress is printed in steps of ten percent, or once per mebibyte when the
/// total size is unknown.
pub struct ConsoleReporter<W: Write + Send> {
    label: String,
    out: parking_lot::Mutex<W>,
    last_step: AtomicU64,
}

impl ConsoleReporter<std::io::Stdout> {
    /// Creates a reporter printing to stdout.
    #[must_use]
    pub fn stdout(label: impl Into<String>) -> Self {
        Self::new(label, std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleReporter<W> {
    /// Creates a reporter writing to `out`.
    pub fn new(label: impl Into<String>, out: W) -> Self {
        Self {
            label: label.into(),
            out: parking_lot::Mutex::new(out),
            last_step: AtomicU64::new(NO_PROGRESS),
        }
    }

    /// Returns the writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn line(&self, text: &str) {
        let mut out = self.out.lock();
        let _ = writeln!(out, "[{}] {text}", self.label);
    }
}

impl<W: Write + Send> LoadListener for ConsoleReporter<W> {
    fn on_load_start(&self) {
        self.line("load start");
    }

    fn on_progress(&self, loaded: u64, total: Option<u64>) {
        let step = match total {
            Some(total) if total > 0 => loaded.saturating_mul(10) / total,
            _ => loaded / (1024 * 1024),
        };
        if self.last_step.swap(step, Ordering::Relaxed) == step {
            return;
        }
        match total {
            Some(total) => self.line(&format!("progress {loaded}/{total} bytes")),
            None => self.line(&format!("progress {loaded} bytes")),
        }
    }

    fn on_load(&self, info: BitmapInfo, image: &LoadedImage) {
        let (source_width, source_height) = image.bitmap.source_dimensions();
        self.line(&format!(
            "loaded {}x{} from {} (source {}x{}, key {})",
            info.width, info.height, info.source, source_width, source_height, image.key
        ));
    }

    fn on_error(&self, error: &LoadError) {
        self.line(&format!("error {}: {error}", error.reason()));
    }

    fn on_load_end(&self) {
        self.line("load end");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(reporter: ConsoleReporter<Vec<u8>>) -> String {
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    #[test]
    fn test_progress_is_throttled() {
        let reporter = ConsoleReporter::new("a", Vec::new());
        for loaded in (0..=100).step_by(5) {
            reporter.on_progress(loaded, Some(100));
        }
        let text = output(reporter);
        assert_eq!(text.lines().count(), 11);
        assert!(text.ends_with("[a] progress 100/100 bytes\n"));
    }

    #[test]
    fn test_error_line_carries_reason() {
        let reporter = ConsoleReporter::new("b", Vec::new());
        reporter.on_load_start();
        reporter.on_error(&LoadError::Timeout);
        reporter.on_load_end();
        assert_eq!(
            output(reporter),
            "[b] load start\n[b] error Timeout: deadline exceeded\n[b] load end\n"
        );
    }
}
