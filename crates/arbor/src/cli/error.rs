//! Operator-facing errors
//!
//! Every error carries what went wrong, optional context and suggestions
//! for how to fix it.

use std::fmt;

#[derive(Debug)]
pub struct HelpfulError {
    pub message: String,
    pub context: Option<String>,
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Configuration rejected at startup
    pub fn invalid_config(err: impl fmt::Display) -> Self {
        Self::new(format!("Invalid configuration: {}", err))
            .with_context("Configuration is validated once at startup and never retried")
            .with_suggestion("TRY: Check the [tree], [scheduler] and [worker] sections of arbor.toml")
    }

    /// Ledger store could not be opened
    pub fn ledger_unavailable(url: &str, err: impl fmt::Display) -> Self {
        Self::new(format!("Failed to open ledger: {}", err))
            .with_context(format!("Ledger URL: {}", url))
            .with_suggestion("TRY: Use sqlite:<path> for a shared ledger or memory: for a dry run")
            .with_suggestion("TRY: Override the URL with --ledger")
    }

    /// Content service could not be opened
    pub fn content_unavailable(url: &str, err: impl fmt::Display) -> Self {
        Self::new(format!("Failed to open content service: {}", err))
            .with_context(format!("Content URL: {}", url))
            .with_suggestion("TRY: Set [worker] content_url to fs:<dir> or memory:")
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpful_error_display() {
        let err = HelpfulError::new("Something went wrong")
            .with_context("While seeding")
            .with_suggestion("Try again");

        let display = format!("{}", err);
        assert!(display.contains("ERROR: Something went wrong"));
        assert!(display.contains("CONTEXT: While seeding"));
        assert!(display.contains("Try again"));
    }

    #[test]
    fn test_ledger_unavailable_names_url() {
        let err = HelpfulError::ledger_unavailable("postgres://x", "unsupported");
        let display = err.to_string();
        assert!(display.contains("postgres://x"));
        assert!(display.contains("--ledger"));
    }
}
