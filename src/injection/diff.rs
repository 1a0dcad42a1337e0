//! Minimal edit between two versions of injected text.

/// Delete `backspace_count` characters, then type `insert_text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub backspace_count: usize,
    pub insert_text: String,
}

impl TextEdit {
    pub fn is_noop(&self) -> bool {
        self.backspace_count == 0 && self.insert_text.is_empty()
    }
}

/// Compute the dumb-terminal edit turning `old` into `new`: erase
/// everything after the longest common prefix, then type the rest.
///
/// The prefix is character-wise, not grapheme-cluster-aware, matching
/// how backspaces are counted by the synthetic-event capability. There
/// is deliberately no suffix matching — live transcript updates only
/// append or replace the tail, and a general diff would produce edits
/// the caret model cannot express.
pub fn diff(old: &str, new: &str) -> TextEdit {
    let prefix_len = old
        .chars()
        .zip(new.chars())
        .take_while(|(a, b)| a == b)
        .count();

    let old_len = old.chars().count();
    let insert_text: String = new.chars().skip(prefix_len).collect();

    TextEdit {
        backspace_count: old_len.saturating_sub(prefix_len),
        insert_text,
    }
}
