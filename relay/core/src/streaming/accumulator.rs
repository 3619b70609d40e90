//! Response accumulator
//!
//! Running concatenation of every fragment seen in one streaming session.

/// Append-only buffer for one response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseAccumulator {
    text: String,
    fragments: u32,
}

impl ResponseAccumulator {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment
    pub fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        self.fragments += 1;
    }

    /// The whole response so far
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of fragments appended
    #[must_use]
    pub fn fragment_count(&self) -> u32 {
        self.fragments
    }

    /// Length in bytes
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.text.len()
    }
}
