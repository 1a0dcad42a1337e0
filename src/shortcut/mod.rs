//! Shortcut definitions and the chord engine.
//!
//! The host feeds raw keyboard events into [`ChordEngine::handle`] and
//! receives edge-triggered press/release triggers back; nothing here
//! talks to the platform directly.

pub mod chord;
pub mod modifiers;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub use chord::{ChordEngine, ChordState, ShortcutEvent};
pub use modifiers::Modifiers;

#[derive(Debug, Error)]
pub enum ShortcutParseError {
    #[error("unknown modifier: {0}")]
    UnknownModifier(String),
}

/// The closed set of shortcuts the pipeline knows about.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ShortcutId {
    /// Push-to-talk dictation of the raw transcript.
    Dictate,
    /// Dictation followed by the formatting pass.
    DictateFormatted,
    /// Abort the in-flight session without injecting anything.
    Cancel,
}

/// Whether a binding acts while held or flips on each press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerBehavior {
    PushToTalk,
    Toggle,
}

/// A user-configurable shortcut binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortcutDefinition {
    pub id: ShortcutId,
    pub name: String,
    /// Non-modifier key code, if the binding has one.
    pub key: Option<u16>,
    pub modifiers: Modifiers,
    pub behavior: TriggerBehavior,
}

impl ShortcutDefinition {
    /// A definition with no key and no modifiers is unset and must
    /// never match any event.
    pub fn is_unset(&self) -> bool {
        self.key.is_none() && self.modifiers.is_empty()
    }

    /// Exact-match test against the current chord state.
    pub(crate) fn matches(&self, state: &ChordState) -> bool {
        if self.is_unset() {
            return false;
        }
        match self.key {
            Some(key) => state.pressed_key == Some(key) && state.modifiers == self.modifiers,
            // Modifier-only bindings ignore the pressed key entirely.
            None => state.modifiers == self.modifiers,
        }
    }
}

/// Phase of an edge-triggered shortcut event.
///
/// Consumers must not re-derive the phase from chord state; the trigger
/// is the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPhase {
    Pressed,
    Released,
}

/// One edge event for one shortcut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortcutTrigger {
    pub id: ShortcutId,
    pub phase: TriggerPhase,
}

/// What a trigger means for the dictation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Stop,
}

/// Maps triggers to start/stop commands under each binding's behavior.
///
/// Push-to-talk: press starts, release stops. Toggle: each press flips
/// between start and stop, releases are ignored.
#[derive(Debug, Default)]
pub struct BehaviorDispatcher {
    active_toggles: HashMap<ShortcutId, bool>,
}

impl BehaviorDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(
        &mut self,
        trigger: ShortcutTrigger,
        behavior: TriggerBehavior,
    ) -> Option<SessionCommand> {
        match behavior {
            TriggerBehavior::PushToTalk => match trigger.phase {
                TriggerPhase::Pressed => Some(SessionCommand::Start),
                TriggerPhase::Released => Some(SessionCommand::Stop),
            },
            TriggerBehavior::Toggle => {
                if trigger.phase != TriggerPhase::Pressed {
                    return None;
                }
                let active = self.active_toggles.entry(trigger.id).or_insert(false);
                *active = !*active;
                if *active {
                    Some(SessionCommand::Start)
                } else {
                    Some(SessionCommand::Stop)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(phase: TriggerPhase) -> ShortcutTrigger {
        ShortcutTrigger {
            id: ShortcutId::Dictate,
            phase,
        }
    }

    #[test]
    fn push_to_talk_dispatch() {
        let mut dispatcher = BehaviorDispatcher::new();
        assert_eq!(
            dispatcher.dispatch(trigger(TriggerPhase::Pressed), TriggerBehavior::PushToTalk),
            Some(SessionCommand::Start)
        );
        assert_eq!(
            dispatcher.dispatch(trigger(TriggerPhase::Released), TriggerBehavior::PushToTalk),
            Some(SessionCommand::Stop)
        );
    }

    #[test]
    fn toggle_dispatch_alternates_on_press() {
        let mut dispatcher = BehaviorDispatcher::new();
        assert_eq!(
            dispatcher.dispatch(trigger(TriggerPhase::Pressed), TriggerBehavior::Toggle),
            Some(SessionCommand::Start)
        );
        assert_eq!(
            dispatcher.dispatch(trigger(TriggerPhase::Released), TriggerBehavior::Toggle),
            None
        );
        assert_eq!(
            dispatcher.dispatch(trigger(TriggerPhase::Pressed), TriggerBehavior::Toggle),
            Some(SessionCommand::Stop)
        );
    }
}
