//! Streaming sentence segmenter.
//!
//! Splits an LLM token stream into sentences as soon as a terminator is
//! seen, holding back the trailing fragment until more text or stream end.
//! Total and lossless: concatenating every yielded sentence with the final
//! residual buffer reproduces the concatenation of all pushed chunks
//! (modulo the whitespace trimming each yielded sentence gets).

use regex::Regex;
use std::sync::LazyLock;

const TERMINATORS: &str = "。！？.!?;；:：";

static SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<term>[。！？.!?;；:：])\s*").expect("valid sentence-boundary regex")
});

pub struct SentenceSegmenter {
    buffer: String,
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Pushes a text chunk, returning any newly completed sentences. The
    /// trailing, not-yet-terminated fragment stays buffered.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        if !self.buffer.contains(|c| TERMINATORS.contains(c)) {
            return Vec::new();
        }

        let fragments = split_into_sentences(&self.buffer);
        if fragments.is_empty() {
            return Vec::new();
        }

        // The buffer may not end on a terminator — in that case the last
        // fragment is a partial sentence and stays in the buffer.
        let buffer_ends_on_terminator = self
            .buffer
            .trim_end()
            .ends_with(|c: char| TERMINATORS.contains(c));

        if buffer_ends_on_terminator {
            self.buffer.clear();
            fragments
        } else {
            let last = fragments.last().cloned().unwrap_or_default();
            let complete = fragments[..fragments.len() - 1].to_vec();
            self.buffer = last;
            complete
        }
    }

    /// Flushes the residual buffer as a final sentence, if non-empty.
    pub fn finish(&mut self) -> Option<String> {
        let remaining = std::mem::take(&mut self.buffer);
        let trimmed = remaining.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Splits `text` on the regex boundary `look-behind(terminator)·optional-whitespace`,
/// dropping whitespace-only fragments.
pub fn split_into_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut last_end = 0;

    for caps in SPLIT_RE.captures_iter(text) {
        let m = caps.get(0).expect("match 0 always present");
        sentences.push(text[last_end..m.end()].trim().to_string());
        last_end = m.end();
    }
    if last_end < text.len() {
        sentences.push(text[last_end..].trim().to_string());
    }

    sentences.into_iter().filter(|s| !s.is_empty()).collect()
}
