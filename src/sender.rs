//! `Sender` — formats and delivers the agent's reply to its origin channel
//! (spec §4.1 step 14).
//!
//! Long replies are split into chunks that respect the channel's maximum
//! message length, preferring to break on paragraph or sentence boundaries
//! and never splitting inside a fenced code block. Each chunk is sent with
//! the original message id as `reply_to`.

use std::sync::Arc;

use crate::channels::ChannelManager;
use crate::model::OutgoingMessage;

pub struct Sender {
    channels: Arc<ChannelManager>,
}

impl Sender {
    pub fn new(channels: Arc<ChannelManager>) -> Self {
        Self { channels }
    }

    /// Split `text` to fit `channel`'s max length and send each chunk,
    /// logging (rather than failing the whole pipeline) if delivery fails.
    pub async fn send(&self, channel: &str, chat_id: &str, text: &str, reply_to: Option<String>) {
        let max_len = self.channels.max_message_length(channel).await;
        let chunks = split_message(text, max_len);
        for chunk in chunks {
            let message = OutgoingMessage { content: chunk, reply_to: reply_to.clone() };
            if let Err(e) = self.channels.send(channel, chat_id, &message).await {
                tracing::warn!(channel, chat_id, error = %e, "failed to deliver reply chunk");
            }
        }
    }
}

/// Split `text` into chunks no longer than `max_len`, preserving fenced code
/// blocks intact and preferring to break between paragraphs, then sentences,
/// then words, in that order of preference.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let units = split_preserving_code_fences(text);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for unit in units {
        if current.is_empty() && unit.len() > max_len {
            chunks.extend(hard_wrap(&unit, max_len));
            continue;
        }
        if !current.is_empty() && current.len() + unit.len() + 2 > max_len {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&unit);
        if current.len() > max_len {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Split `text` into paragraphs, except that a fenced code block (delimited
/// by ``` lines) is always kept as a single unit regardless of its own
/// internal blank lines.
fn split_preserving_code_fences(text: &str) -> Vec<String> {
    let mut units = Vec::new();
    let mut lines = text.lines().peekable();
    let mut current = String::new();

    while let Some(line) = lines.next() {
        if line.trim_start().starts_with("```") {
            let mut block = vec![line.to_string()];
            for inner in lines.by_ref() {
                block.push(inner.to_string());
                if inner.trim_start().starts_with("```") {
                    break;
                }
            }
            if !current.trim().is_empty() {
                units.push(std::mem::take(&mut current).trim().to_string());
            }
            units.push(block.join("\n"));
            continue;
        }
        if line.trim().is_empty() {
            if !current.trim().is_empty() {
                units.push(std::mem::take(&mut current).trim().to_string());
            }
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    if !current.trim().is_empty() {
        units.push(current.trim().to_string());
    }
    units
}

/// Break an over-long single unit at sentence boundaries, falling back to
/// word boundaries, falling back to a hard byte cut.
fn hard_wrap(text: &str, max_len: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = text;
    while rest.len() > max_len {
        let cut = best_cut_point(rest, max_len);
        let (head, tail) = rest.split_at(cut);
        out.push(head.trim().to_string());
        rest = tail.trim_start();
    }
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}

fn best_cut_point(text: &str, max_len: usize) -> usize {
    let mut boundary = max_len.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    let window = &text[..boundary];
    if let Some(idx) = window.rfind(". ") {
        return idx + 2;
    }
    if let Some(idx) = window.rfind(' ') {
        return idx;
    }
    boundary.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_is_a_single_chunk() {
        let chunks = split_message("hello world", 100);
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn long_message_splits_on_paragraph_boundaries() {
        let text = format!("{}\n\n{}", "a".repeat(50), "b".repeat(50));
        let chunks = split_message(&text, 60);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains(&"a".repeat(50)));
        assert!(chunks[1].contains(&"b".repeat(50)));
    }

    #[test]
    fn code_fence_is_never_split() {
        let code = "```rust\nfn main() {\n    println!(\"hi\");\n}\n```";
        let text = format!("Here is some code:\n\n{code}\n\nAnd some more text after it.");
        let chunks = split_message(&text, 40);
        let fence_chunk = chunks.iter().find(|c| c.contains("fn main")).unwrap();
        assert!(fence_chunk.contains("```rust"));
        assert!(fence_chunk.contains("```\n") || fence_chunk.ends_with("```"));
    }

    #[test]
    fn oversized_single_paragraph_hard_wraps() {
        let text = "word ".repeat(100);
        let chunks = split_message(&text, 50);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 60, "chunk too long: {}", chunk.len());
        }
    }
}
