//! Presentation layer for the command line.

/// Console lifecycle reporter.
pub mod console;

pub use console::ConsoleReporter;
