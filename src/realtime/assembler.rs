//! Transcript assembler.
//!
//! Maintains an ordered, deduplicated sequence of transcript segments
//! keyed by server-assigned item ids. Display order is governed solely
//! by commit linkage, never by event arrival order: completions and
//! deltas may race the commit notifications and still land in the
//! right place.

use log::debug;
use std::collections::HashMap;

use super::protocol::ServerEvent;

/// One transcript segment. Once final, the text is immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptSegment {
    pub text: String,
    pub is_final: bool,
}

/// Assembles out-of-order streaming events into stable display text.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    segments: HashMap<String, TranscriptSegment>,
    /// Item ids in display order. Append-only: an id, once present,
    /// is never removed or reordered.
    order: Vec<String>,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn segment(&self, item_id: &str) -> Option<&TranscriptSegment> {
        self.segments.get(item_id)
    }

    /// Dispatch one server event to the matching operation. Errors and
    /// unknown events are not the assembler's concern.
    pub fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::InputAudioCommitted {
                item_id,
                previous_item_id,
            } => self.apply_committed(item_id, previous_item_id.as_deref()),
            ServerEvent::TranscriptionDelta { item_id, delta, .. } => {
                self.apply_delta(item_id, delta)
            }
            ServerEvent::TranscriptionCompleted {
                item_id, transcript, ..
            } => self.apply_completed(item_id, transcript),
            ServerEvent::Error { .. } | ServerEvent::Unknown { .. } => {}
        }
    }

    /// Record the server's causal ordering hint for an item.
    ///
    /// Idempotent: an already-ordered id is left where it is. If the
    /// previous item is known, the new id goes immediately after it;
    /// otherwise it is appended.
    pub fn apply_committed(&mut self, item_id: &str, previous_item_id: Option<&str>) {
        if self.order.iter().any(|id| id == item_id) {
            return;
        }

        let position = previous_item_id
            .and_then(|prev| self.order.iter().position(|id| id == prev))
            .map(|i| i + 1)
            .unwrap_or(self.order.len());
        self.order.insert(position, item_id.to_string());
        debug!("committed item {} at position {}", item_id, position);
    }

    /// Append incremental text to an item's segment.
    ///
    /// Creates an empty non-final segment if none exists yet, and makes
    /// sure the id is ordered even when the commit has not arrived.
    /// Deltas arriving after finalization are dropped.
    pub fn apply_delta(&mut self, item_id: &str, delta: &str) {
        self.ensure_ordered(item_id);
        let segment = self
            .segments
            .entry(item_id.to_string())
            .or_insert_with(|| TranscriptSegment {
                text: String::new(),
                is_final: false,
            });
        if segment.is_final {
            debug!("dropping late delta for finalized item {}", item_id);
            return;
        }
        segment.text.push_str(delta);
    }

    /// Replace an item's text with the authoritative full transcript
    /// and mark it final.
    pub fn apply_completed(&mut self, item_id: &str, transcript: &str) {
        self.ensure_ordered(item_id);
        self.segments.insert(
            item_id.to_string(),
            TranscriptSegment {
                text: transcript.to_string(),
                is_final: true,
            },
        );
    }

    fn ensure_ordered(&mut self, item_id: &str) {
        if !self.order.iter().any(|id| id == item_id) {
            self.order.push(item_id.to_string());
        }
    }

    /// Concatenate segment texts in order, inserting a single space
    /// between adjacent non-empty segments unless the boundary already
    /// has whitespace, starts with closing punctuation, or ends with
    /// opening punctuation. Empty segments contribute nothing, not even
    /// a separator.
    pub fn display_text(&self) -> String {
        let mut out = String::new();
        for id in &self.order {
            let Some(segment) = self.segments.get(id) else {
                continue;
            };
            if segment.text.is_empty() {
                continue;
            }
            if !out.is_empty() && needs_space(&out, &segment.text) {
                out.push(' ');
            }
            out.push_str(&segment.text);
        }
        out
    }
}

const CLOSING_PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':', ')', ']', '}'];
const OPENING_PUNCTUATION: &[char] = &['(', '[', '{'];

fn needs_space(left: &str, right: &str) -> bool {
    let Some(last) = left.chars().last() else {
        return false;
    };
    let Some(first) = right.chars().next() else {
        return false;
    };
    if last.is_whitespace() || first.is_whitespace() {
        return false;
    }
    if CLOSING_PUNCTUATION.contains(&first) {
        return false;
    }
    if OPENING_PUNCTUATION.contains(&last) {
        return false;
    }
    true
}
