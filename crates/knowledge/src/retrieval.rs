//! Rendering retrieved passages into prompt context.

use crate::types::{RetrievalHit, RetrievalResult};

impl RetrievalResult {
    /// Numbered passages for a prompt, stopping before `max_chars` is exceeded.
    ///
    /// Each passage is tagged with its [`DocumentRef`](crate::DocumentRef) so
    /// the model can cite it back.
    pub fn to_prompt_context(&self, max_chars: usize) -> String {
        let parts: Vec<String> = self.rendered(max_chars).iter().map(format_hit).collect();
        if parts.is_empty() {
            return String::new();
        }
        format!("## Relevant Knowledge Base Passages\n\n{}", parts.join("\n\n"))
    }

    /// The leading hits that fit in `max_chars` of prompt context.
    pub fn rendered(&self, max_chars: usize) -> &[RetrievalHit] {
        let mut used = 0;
        let mut count = 0;
        for hit in &self.hits {
            let len = format_hit(hit).len();
            if used + len > max_chars {
                break;
            }
            used += len;
            count += 1;
        }
        &self.hits[..count]
    }
}

fn format_hit(hit: &RetrievalHit) -> String {
    format!(
        "[{}] (relevance {:.2})\n{}",
        hit.document.id,
        hit.score,
        hit.document.text
    )
}

/// Shortens `s` to at most `max_len` characters, appending an ellipsis.
pub fn truncate(s: &str, max_len: usize) -> String {
    match s.char_indices().nth(max_len) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
