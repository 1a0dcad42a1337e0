//! Chord state machine.
//!
//! Converts raw key-down/key-up/modifier-change events into an
//! active-shortcut set and edge-triggered press/release events. Purely
//! event-driven: no timers, no debouncing, deterministic given the
//! event sequence. Key-repeat events are suppressed upstream and never
//! reach `handle`.

use log::debug;
use std::collections::BTreeSet;

use super::modifiers::Modifiers;
use super::{ShortcutDefinition, ShortcutId, ShortcutTrigger, TriggerPhase};

/// A raw keyboard event as delivered by the host's event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutEvent {
    /// A non-repeat key-down of a non-modifier key.
    KeyDown { key: u16 },
    /// A key-up of a non-modifier key.
    KeyUp { key: u16 },
    /// A modifier key changed state. The platform reports only the key
    /// code, so the bit is toggled: one event per press, one per
    /// release.
    ModifierChange { key: u16 },
}

/// Currently held modifiers plus at most one pressed non-modifier key.
///
/// Mutated only by applying one event at a time; never shared across
/// threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChordState {
    pub modifiers: Modifiers,
    pub pressed_key: Option<u16>,
}

impl ChordState {
    fn apply(&mut self, event: ShortcutEvent) {
        match event {
            ShortcutEvent::KeyDown { key } => {
                self.pressed_key = Some(key);
            }
            ShortcutEvent::KeyUp { key } => {
                // Stale key-ups (for a key that is not the currently
                // pressed one) are ignored.
                if self.pressed_key == Some(key) {
                    self.pressed_key = None;
                }
            }
            ShortcutEvent::ModifierChange { key } => {
                if let Some(flag) = Modifiers::from_key_code(key) {
                    self.modifiers.toggle(flag);
                }
            }
        }
    }
}

/// Edge-triggered shortcut detector.
///
/// Tracks the chord state and the previously-active shortcut set;
/// each call to [`handle`](ChordEngine::handle) diffs the new match set
/// against the old one and emits presses before releases.
#[derive(Debug, Default)]
pub struct ChordEngine {
    state: ChordState,
    active: BTreeSet<ShortcutId>,
}

impl ChordEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current chord state, for diagnostics.
    pub fn state(&self) -> ChordState {
        self.state
    }

    /// Apply one event and report which shortcuts were pressed or
    /// released as a result.
    ///
    /// A single event can produce both: a key-up may release a chord
    /// and simultaneously re-activate a modifier-only shortcut whose
    /// modifier set is now exactly held again.
    pub fn handle(
        &mut self,
        event: ShortcutEvent,
        shortcuts: &[ShortcutDefinition],
    ) -> Vec<ShortcutTrigger> {
        self.state.apply(event);

        let matching: BTreeSet<ShortcutId> = shortcuts
            .iter()
            .filter(|def| def.matches(&self.state))
            .map(|def| def.id)
            .collect();

        let mut triggers = Vec::new();
        for id in matching.difference(&self.active) {
            debug!("shortcut pressed: {:?}", id);
            triggers.push(ShortcutTrigger {
                id: *id,
                phase: TriggerPhase::Pressed,
            });
        }
        for id in self.active.difference(&matching) {
            debug!("shortcut released: {:?}", id);
            triggers.push(ShortcutTrigger {
                id: *id,
                phase: TriggerPhase::Released,
            });
        }

        self.active = matching;
        triggers
    }
}
