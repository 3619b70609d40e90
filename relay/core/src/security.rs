//! Input validation
//!
//! Prompts arrive from a browser page, so they are checked where they enter
//! the relay:
//! - blank prompts (after trimming) never reach the backend
//! - oversized prompts are refused
//!
//! Anything else, control characters included, is passed to the model as
//! typed. Pasted terminal output routinely carries ANSI escapes.

/// Result of prompt validation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationResult {
    /// Prompt may be sent
    Valid,
    /// Prompt is empty or whitespace only; ignore it silently
    Empty,
    /// Prompt exceeds the size limit
    TooLarge {
        /// Prompt size in bytes
        size: usize,
        /// Configured limit
        max: usize,
    },
}

/// Validator for prompts received from panels
#[derive(Clone, Debug)]
pub struct InputValidator {
    max_prompt_bytes: usize,
}

impl InputValidator {
    /// Create a validator with the given size limit
    #[must_use]
    pub fn new(max_prompt_bytes: usize) -> Self {
        Self { max_prompt_bytes }
    }

    /// Validate a prompt
    #[must_use]
    pub fn validate_prompt(&self, prompt: &str) -> ValidationResult {
        if prompt.trim().is_empty() {
            return ValidationResult::Empty;
        }

        if prompt.len() > self.max_prompt_bytes {
            return ValidationResult::TooLarge {
                size: prompt.len(),
                max: self.max_prompt_bytes,
            };
        }

        ValidationResult::Valid
    }
}
