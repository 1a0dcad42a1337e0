//! Text injection into the focused application.
//!
//! The platform calls themselves (accessibility tree writes, synthetic
//! key events, clipboard pastes, frontmost-app lookup) live in the host
//! behind the narrow capability traits below; the controller only
//! decides what to type where.

pub mod controller;
pub mod diff;

pub use controller::{DictationInjectionResult, InjectionController};
pub use diff::{diff, TextEdit};

/// Value and caret position of the focused text element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusedTextContext {
    pub value: String,
    /// Caret offset in characters from the start of `value`.
    pub caret_index: usize,
}

/// Reports the focused element's text and caret, if the target app
/// permits inspection.
pub trait FocusedTextSource {
    fn focused_text_context(&self) -> Option<FocusedTextContext>;
}

/// Identifies the application that currently has keyboard focus.
pub trait FrontmostApp {
    fn frontmost_app_id(&self) -> Option<String>;
}

/// One insertion strategy (direct element-value write, or a
/// clipboard-paste fallback). Returns whether the insertion succeeded.
pub trait TextInserter {
    fn insert(&self, text: &str) -> bool;
}

/// Posts synthetic key events, used to erase the stale tail before an
/// insertion.
pub trait KeyEventSink {
    fn post_backspaces(&self, count: usize) -> bool;
    fn post_text(&self, text: &str) -> bool;
}
