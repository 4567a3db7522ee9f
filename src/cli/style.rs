//! Terminal styling helpers
//!
//! Output goes through `anstream`, which strips these escapes when stdout
//! is not a terminal.

use owo_colors::{OwoColorize, Style};
use std::fmt::Display;

/// Check mark for passed items
pub const CHECK: &str = "✓";
/// Cross for failed items
pub const CROSS: &str = "✗";

/// Semantic styles for CLI output
pub trait Stylize: Display + Sized {
    /// De-emphasised secondary text
    fn muted(&self) -> String {
        self.style(Style::new().dimmed()).to_string()
    }

    /// Headings and key values
    fn emphasis(&self) -> String {
        self.style(Style::new().bold()).to_string()
    }

    /// Identifiers such as refs and shas
    fn accent(&self) -> String {
        self.style(Style::new().cyan()).to_string()
    }

    /// Passed
    fn success(&self) -> String {
        self.style(Style::new().green()).to_string()
    }

    /// Degraded or skipped
    fn warn(&self) -> String {
        self.style(Style::new().yellow()).to_string()
    }

    /// Failed
    fn error(&self) -> String {
        self.style(Style::new().red().bold()).to_string()
    }
}

impl<T: Display> Stylize for T {}

/// Green check mark
pub fn check() -> String {
    CHECK.success()
}

/// Red cross
pub fn cross() -> String {
    CROSS.error()
}

/// Abbreviate a sha for display
pub fn short_sha(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}
