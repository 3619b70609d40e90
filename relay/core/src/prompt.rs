//! Prompt augmentation
//!
//! Every prompt is sent with a fixed disclaimer appended, asking the model to
//! answer in English and to warn that a small local model makes more mistakes.

/// Disclaimer appended to every prompt unless configured otherwise
pub const DEFAULT_DISCLAIMER: &str = "\n\n Please answer in English and warn the user about the fact that you are the 8b parameter model and can make mistakes more than the latest r1 model.";

/// Builds the prompt actually sent to the backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptBuilder {
    disclaimer: String,
}

impl PromptBuilder {
    /// Create a builder with a custom disclaimer
    pub fn new(disclaimer: impl Into<String>) -> Self {
        Self {
            disclaimer: disclaimer.into(),
        }
    }

    /// Append the disclaimer to the literal user input
    ///
    /// The input is not trimmed or otherwise altered.
    #[must_use]
    pub fn augment(&self, prompt: &str) -> String {
        let mut full = String::with_capacity(prompt.len() + self.disclaimer.len());
        full.push_str(prompt);
        full.push_str(&self.disclaimer);
        full
    }
}
