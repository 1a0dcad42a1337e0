//! Per-session injection state machine.
//!
//! Decides what leading prefix (if any) to prepend, erases the stale
//! tail of previously injected text, and picks among competing
//! insertion strategies with a single deterministic fallback hop per
//! call. Retrying is the caller's business — each new transcript
//! revision drives another `insert_final`.

use log::{debug, warn};

use super::diff::diff;
use super::{FocusedTextSource, FrontmostApp, KeyEventSink, TextInserter};

/// Applications known to reject direct element-value insertion; for
/// these the clipboard-paste fallback is used exclusively.
const DIRECT_INSERT_DENYLIST: &[&str] = &[
    "com.apple.Terminal",
    "com.googlecode.iterm2",
    "org.alacritty",
    "net.kovidgoyal.kitty",
    "com.microsoft.VSCode",
];

/// Produced once per session at session end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictationInjectionResult {
    /// No automatic insertion succeeded for the session's final text;
    /// the caller must surface a manual-paste affordance.
    pub requires_manual_paste: bool,
}

#[derive(Debug, Clone)]
struct PreviousInjection {
    text: String,
    app_id: String,
}

pub struct InjectionController {
    own_app_id: String,
    frontmost: Box<dyn FrontmostApp>,
    focused_text: Box<dyn FocusedTextSource>,
    primary: Box<dyn TextInserter>,
    fallback: Box<dyn TextInserter>,
    keys: Box<dyn KeyEventSink>,

    // Per-session state, reset by `start_session`.
    last_injected: String,
    injected: bool,
    failed: bool,
    /// Leading-space prefix, decided once at the first non-empty
    /// insertion and reused for the rest of the session.
    prefix: Option<String>,
    target_app: Option<String>,

    // Survives across sessions for the denied-introspection heuristic.
    previous: Option<PreviousInjection>,
}

impl InjectionController {
    pub fn new(
        own_app_id: impl Into<String>,
        frontmost: Box<dyn FrontmostApp>,
        focused_text: Box<dyn FocusedTextSource>,
        primary: Box<dyn TextInserter>,
        fallback: Box<dyn TextInserter>,
        keys: Box<dyn KeyEventSink>,
    ) -> Self {
        Self {
            own_app_id: own_app_id.into(),
            frontmost,
            focused_text,
            primary,
            fallback,
            keys,
            last_injected: String::new(),
            injected: false,
            failed: false,
            prefix: None,
            target_app: None,
            previous: None,
        }
    }

    /// Reset all per-session state.
    pub fn start_session(&mut self) {
        self.last_injected.clear();
        self.injected = false;
        self.failed = false;
        self.prefix = None;
        self.target_app = None;
    }

    /// Inject `text`, replacing whatever this session injected before.
    ///
    /// Returns whether this call succeeded. One attempt, one fallback
    /// hop; no internal retries.
    pub fn insert_final(&mut self, text: &str) -> bool {
        if text.is_empty() {
            // Fails the call, not the session.
            return false;
        }

        let app_id = self.frontmost.frontmost_app_id();
        if app_id.as_deref() == Some(self.own_app_id.as_str()) {
            warn!("refusing to inject into our own app");
            self.failed = true;
            return false;
        }

        if self.prefix.is_none() {
            let prefix = self.compute_prefix(text, app_id.as_deref());
            debug!("session prefix decided: {:?}", prefix);
            self.prefix = Some(prefix);
        }
        let effective = format!("{}{}", self.prefix.as_deref().unwrap_or(""), text);

        let edit = diff(&self.last_injected, &effective);
        if edit.is_noop() {
            self.record_success(effective, app_id);
            return true;
        }

        if edit.backspace_count > 0 {
            if !self.keys.post_backspaces(edit.backspace_count) {
                self.failed = true;
                return false;
            }
            // The target now holds only the common prefix; remember
            // that so a failed insertion below still leaves our
            // bookkeeping accurate for the next call.
            let kept = effective.chars().count() - edit.insert_text.chars().count();
            self.last_injected = effective.chars().take(kept).collect();
        }

        if edit.insert_text.is_empty() {
            self.record_success(effective, app_id);
            return true;
        }

        let denied = app_id
            .as_deref()
            .map(|id| DIRECT_INSERT_DENYLIST.contains(&id))
            .unwrap_or(false);
        let ok = if denied {
            debug!("frontmost app rejects direct insertion, using fallback");
            self.fallback.insert(&edit.insert_text)
        } else {
            self.primary.insert(&edit.insert_text) || self.fallback.insert(&edit.insert_text)
        };

        if ok {
            self.record_success(effective, app_id);
        } else {
            self.failed = true;
        }
        ok
    }

    /// End the session and report whether the caller must offer a
    /// manual paste. On success the injected text and its target app
    /// are remembered for the next session's prefix heuristic; on
    /// failure they are cleared.
    pub fn finish_session(&mut self) -> DictationInjectionResult {
        let requires_manual_paste = self.failed || !self.injected;
        if requires_manual_paste {
            self.previous = None;
        } else {
            self.previous = self.target_app.take().map(|app_id| PreviousInjection {
                text: self.last_injected.clone(),
                app_id,
            });
        }
        DictationInjectionResult {
            requires_manual_paste,
        }
    }

    fn record_success(&mut self, effective: String, app_id: Option<String>) {
        self.last_injected = effective;
        self.injected = true;
        self.target_app = app_id;
    }

    /// Decide the session's leading-space prefix.
    fn compute_prefix(&self, text: &str, app_id: Option<&str>) -> String {
        let starts_glued = text
            .chars()
            .next()
            .map(|c| c.is_whitespace() || c.is_ascii_punctuation())
            .unwrap_or(true);
        if starts_glued {
            return String::new();
        }

        match self.focused_text.focused_text_context() {
            Some(ctx) => {
                if ctx.caret_index == 0 {
                    return String::new();
                }
                let chars: Vec<char> = ctx.value.chars().collect();
                if ctx.caret_index > chars.len() {
                    return String::new();
                }
                if chars[ctx.caret_index - 1].is_whitespace() {
                    String::new()
                } else {
                    " ".to_string()
                }
            }
            // The target denies inspection. Approximate continuity: if
            // the previous session put text ending in a non-whitespace
            // character into this same app, assume the caret still
            // trails it.
            None => match (&self.previous, app_id) {
                (Some(prev), Some(app))
                    if prev.app_id == app
                        && prev
                            .text
                            .chars()
                            .last()
                            .map(|c| !c.is_whitespace())
                            .unwrap_or(false) =>
                {
                    " ".to_string()
                }
                _ => String::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injection::FocusedTextContext;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    const OWN_APP: &str = "com.taptype.app";
    const EDITOR: &str = "com.example.editor";

    struct FakeFrontmost(Option<String>);
    impl FrontmostApp for FakeFrontmost {
        fn frontmost_app_id(&self) -> Option<String> {
            self.0.clone()
        }
    }

    struct FakeFocus(Option<FocusedTextContext>);
    impl FocusedTextSource for FakeFocus {
        fn focused_text_context(&self) -> Option<FocusedTextContext> {
            self.0.clone()
        }
    }

    #[derive(Clone)]
    struct FakeInserter {
        accept: Rc<Cell<bool>>,
        calls: Rc<RefCell<Vec<String>>>,
    }
    impl FakeInserter {
        fn new(accept: bool) -> Self {
            Self {
                accept: Rc::new(Cell::new(accept)),
                calls: Rc::new(RefCell::new(Vec::new())),
            }
        }
    }
    impl TextInserter for FakeInserter {
        fn insert(&self, text: &str) -> bool {
            self.calls.borrow_mut().push(text.to_string());
            self.accept.get()
        }
    }

    #[derive(Clone)]
    struct FakeKeys {
        accept: Rc<Cell<bool>>,
        backspaces: Rc<RefCell<Vec<usize>>>,
    }
    impl FakeKeys {
        fn new() -> Self {
            Self {
                accept: Rc::new(Cell::new(true)),
                backspaces: Rc::new(RefCell::new(Vec::new())),
            }
        }
    }
    impl KeyEventSink for FakeKeys {
        fn post_backspaces(&self, count: usize) -> bool {
            self.backspaces.borrow_mut().push(count);
            self.accept.get()
        }
        fn post_text(&self, _text: &str) -> bool {
            self.accept.get()
        }
    }

    struct Harness {
        primary: FakeInserter,
        fallback: FakeInserter,
        keys: FakeKeys,
        controller: InjectionController,
    }

    fn harness(
        frontmost: Option<&str>,
        focus: Option<FocusedTextContext>,
        primary_ok: bool,
        fallback_ok: bool,
    ) -> Harness {
        let primary = FakeInserter::new(primary_ok);
        let fallback = FakeInserter::new(fallback_ok);
        let keys = FakeKeys::new();
        let controller = InjectionController::new(
            OWN_APP,
            Box::new(FakeFrontmost(frontmost.map(str::to_string))),
            Box::new(FakeFocus(focus)),
            Box::new(primary.clone()),
            Box::new(fallback.clone()),
            Box::new(keys.clone()),
        );
        Harness {
            primary,
            fallback,
            keys,
            controller,
        }
    }

    fn caret(value: &str, caret_index: usize) -> Option<FocusedTextContext> {
        Some(FocusedTextContext {
            value: value.to_string(),
            caret_index,
        })
    }

    #[test]
    fn refuses_to_inject_into_self() {
        let mut h = harness(Some(OWN_APP), caret("", 0), true, true);
        h.controller.start_session();
        assert!(!h.controller.insert_final("hello"));
        assert!(h.primary.calls.borrow().is_empty());
        let result = h.controller.finish_session();
        assert!(result.requires_manual_paste);
    }

    #[test]
    fn mid_word_caret_gets_leading_space() {
        let mut h = harness(Some(EDITOR), caret("foo", 3), true, true);
        h.controller.start_session();
        assert!(h.controller.insert_final("bar"));
        assert_eq!(h.primary.calls.borrow().as_slice(), &[" bar".to_string()]);
        assert!(!h.controller.finish_session().requires_manual_paste);
    }

    #[test]
    fn no_prefix_at_line_start_or_after_whitespace() {
        let mut h = harness(Some(EDITOR), caret("foo", 0), true, true);
        h.controller.start_session();
        assert!(h.controller.insert_final("bar"));
        assert_eq!(h.primary.calls.borrow().as_slice(), &["bar".to_string()]);

        let mut h = harness(Some(EDITOR), caret("foo ", 4), true, true);
        h.controller.start_session();
        assert!(h.controller.insert_final("bar"));
        assert_eq!(h.primary.calls.borrow().as_slice(), &["bar".to_string()]);
    }

    #[test]
    fn no_prefix_for_punctuation_or_out_of_bounds_caret() {
        let mut h = harness(Some(EDITOR), caret("foo", 3), true, true);
        h.controller.start_session();
        assert!(h.controller.insert_final(", right"));
        assert_eq!(h.primary.calls.borrow().as_slice(), &[", right".to_string()]);

        let mut h = harness(Some(EDITOR), caret("foo", 17), true, true);
        h.controller.start_session();
        assert!(h.controller.insert_final("bar"));
        assert_eq!(h.primary.calls.borrow().as_slice(), &["bar".to_string()]);
    }

    #[test]
    fn prefix_is_decided_once_per_session() {
        let mut h = harness(Some(EDITOR), caret("foo", 3), true, true);
        h.controller.start_session();
        assert!(h.controller.insert_final("bar"));
        assert!(h.controller.insert_final("bar baz"));
        // Second call reuses the prefix and only types the new tail.
        assert_eq!(
            h.primary.calls.borrow().as_slice(),
            &[" bar".to_string(), " baz".to_string()]
        );
        assert!(h.keys.backspaces.borrow().is_empty());
    }

    #[test]
    fn revision_erases_stale_tail_before_typing() {
        let mut h = harness(Some(EDITOR), caret("", 0), true, true);
        h.controller.start_session();
        assert!(h.controller.insert_final("hello world"));
        assert!(h.controller.insert_final("hello there"));
        assert_eq!(h.keys.backspaces.borrow().as_slice(), &[5]);
        assert_eq!(
            h.primary.calls.borrow().as_slice(),
            &["hello world".to_string(), "there".to_string()]
        );
    }

    #[test]
    fn denylisted_app_skips_primary() {
        let mut h = harness(Some("com.apple.Terminal"), caret("", 0), true, true);
        h.controller.start_session();
        assert!(h.controller.insert_final("ls -la"));
        assert!(h.primary.calls.borrow().is_empty());
        assert_eq!(h.fallback.calls.borrow().as_slice(), &["ls -la".to_string()]);
    }

    #[test]
    fn primary_failure_falls_back_once() {
        let mut h = harness(Some(EDITOR), caret("", 0), false, true);
        h.controller.start_session();
        assert!(h.controller.insert_final("hello"));
        assert_eq!(h.primary.calls.borrow().len(), 1);
        assert_eq!(h.fallback.calls.borrow().as_slice(), &["hello".to_string()]);
        assert!(!h.controller.finish_session().requires_manual_paste);
    }

    #[test]
    fn both_strategies_failing_requires_manual_paste() {
        let mut h = harness(Some(EDITOR), caret("", 0), false, false);
        h.controller.start_session();
        assert!(!h.controller.insert_final("hello"));
        assert!(h.controller.finish_session().requires_manual_paste);
    }

    #[test]
    fn empty_text_fails_the_call_not_the_session() {
        let mut h = harness(Some(EDITOR), caret("", 0), true, true);
        h.controller.start_session();
        assert!(!h.controller.insert_final(""));
        assert!(h.controller.insert_final("hello"));
        assert!(!h.controller.finish_session().requires_manual_paste);
    }

    #[test]
    fn nothing_injected_requires_manual_paste() {
        let mut h = harness(Some(EDITOR), caret("", 0), true, true);
        h.controller.start_session();
        assert!(h.controller.finish_session().requires_manual_paste);
    }

    #[test]
    fn denied_introspection_uses_previous_session_continuity() {
        let mut h = harness(Some(EDITOR), None, true, true);

        // First session succeeds; its text ends in a non-whitespace
        // character and is remembered for the editor app.
        h.controller.start_session();
        assert!(h.controller.insert_final("first"));
        assert!(!h.controller.finish_session().requires_manual_paste);

        // Same app, still no introspection: continuity applies.
        h.controller.start_session();
        assert!(h.controller.insert_final("second"));
        assert_eq!(
            h.primary.calls.borrow().as_slice(),
            &["first".to_string(), " second".to_string()]
        );
    }

    #[test]
    fn failed_session_clears_continuity() {
        let mut h = harness(Some(EDITOR), None, true, true);
        h.controller.start_session();
        assert!(h.controller.insert_final("first"));
        h.controller.finish_session();

        // A failed session wipes the remembered injection.
        h.primary.accept.set(false);
        h.fallback.accept.set(false);
        h.controller.start_session();
        assert!(!h.controller.insert_final("broken"));
        assert!(h.controller.finish_session().requires_manual_paste);

        h.primary.accept.set(true);
        h.fallback.accept.set(true);
        h.controller.start_session();
        assert!(h.controller.insert_final("third"));
        // No continuity: no leading space.
        assert_eq!(h.primary.calls.borrow().last().unwrap(), "third");
    }
}
