//! Settings model and storage port.
//!
//! Nothing here is a singleton: components receive the store (or the
//! already-loaded settings) through their constructors, and the host
//! decides where the JSON actually lives.

use log::{error, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::realtime::VadMode;
use crate::shortcut::{Modifiers, ShortcutDefinition, ShortcutId, TriggerBehavior};

/// One user-curated vocabulary entry, embedded into the formatting
/// prompt. Lifecycle belongs to the host UI; the pipeline only reads
/// these.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PersonalGlossaryEntry {
    pub term: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DictationSettings {
    pub bindings: HashMap<ShortcutId, ShortcutDefinition>,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    #[serde(default)]
    pub vad: VadMode,
    #[serde(default = "default_true")]
    pub formatting_enabled: bool,
    #[serde(default = "default_formatting_model")]
    pub formatting_model: String,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_max_format_attempts")]
    pub max_format_attempts: u32,
    #[serde(default = "default_retained_sessions")]
    pub retained_sessions: usize,
    #[serde(default)]
    pub glossary: Vec<PersonalGlossaryEntry>,
}

fn default_true() -> bool {
    true
}

fn default_transcription_model() -> String {
    "gpt-4o-transcribe".to_string()
}

fn default_formatting_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_similarity_threshold() -> f64 {
    crate::formatting::DEFAULT_SIMILARITY_THRESHOLD
}

fn default_max_format_attempts() -> u32 {
    crate::formatting::DEFAULT_MAX_ATTEMPTS
}

fn default_retained_sessions() -> usize {
    crate::recorder::DEFAULT_RETAINED_SESSIONS
}

const KEY_SPACE: u16 = 49;

impl Default for DictationSettings {
    fn default() -> Self {
        let mut bindings = HashMap::new();
        bindings.insert(
            ShortcutId::Dictate,
            ShortcutDefinition {
                id: ShortcutId::Dictate,
                name: "Dictate".to_string(),
                key: Some(KEY_SPACE),
                modifiers: Modifiers::OPT_LEFT,
                behavior: TriggerBehavior::PushToTalk,
            },
        );
        bindings.insert(
            ShortcutId::DictateFormatted,
            ShortcutDefinition {
                id: ShortcutId::DictateFormatted,
                name: "Dictate (formatted)".to_string(),
                key: Some(KEY_SPACE),
                modifiers: Modifiers::OPT_LEFT | Modifiers::SHIFT_LEFT,
                behavior: TriggerBehavior::PushToTalk,
            },
        );
        // Unset until the user records one.
        bindings.insert(
            ShortcutId::Cancel,
            ShortcutDefinition {
                id: ShortcutId::Cancel,
                name: "Cancel".to_string(),
                key: None,
                modifiers: Modifiers::empty(),
                behavior: TriggerBehavior::PushToTalk,
            },
        );

        Self {
            bindings,
            transcription_model: default_transcription_model(),
            vad: VadMode::Disabled,
            formatting_enabled: default_true(),
            formatting_model: default_formatting_model(),
            similarity_threshold: default_similarity_threshold(),
            max_format_attempts: default_max_format_attempts(),
            retained_sessions: default_retained_sessions(),
            glossary: Vec::new(),
        }
    }
}

pub const SETTINGS_KEY: &str = "settings";

/// Load/save-by-key storage. The host injects an implementation.
pub trait SettingsStore {
    fn load(&self, key: &str) -> Option<Value>;
    fn save(&self, key: &str, value: Value);
}

pub fn load_or_default(store: &dyn SettingsStore) -> DictationSettings {
    match store.load(SETTINGS_KEY) {
        Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            warn!("failed to parse settings, falling back to defaults: {e}");
            DictationSettings::default()
        }),
        None => {
            let settings = DictationSettings::default();
            write_settings(store, &settings);
            settings
        }
    }
}

pub fn write_settings(store: &dyn SettingsStore, settings: &DictationSettings) {
    match serde_json::to_value(settings) {
        Ok(value) => store.save(SETTINGS_KEY, value),
        Err(e) => error!("failed to serialize settings: {e}"),
    }
}

/// File-backed store: one JSON object per file, rewritten atomically
/// (tmp + rename) on every save.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> serde_json::Map<String, Value> {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return serde_json::Map::new();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("settings file is corrupt, starting fresh: {e}");
            serde_json::Map::new()
        })
    }
}

impl SettingsStore for JsonFileStore {
    fn load(&self, key: &str) -> Option<Value> {
        self.read_all().get(key).cloned()
    }

    fn save(&self, key: &str, value: Value) {
        let mut all = self.read_all();
        all.insert(key.to_string(), value);

        let tmp = self.path.with_extension("json.tmp");
        let write = || -> std::io::Result<()> {
            fs::write(&tmp, serde_json::to_vec_pretty(&all)?)?;
            fs::rename(&tmp, &self.path)
        };
        if let Err(e) = write() {
            error!("failed to persist settings: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let settings = DictationSettings::default();
        let json = serde_json::to_value(&settings).unwrap();
        let back: DictationSettings = serde_json::from_value(json).unwrap();
        assert_eq!(back.transcription_model, settings.transcription_model);
        assert_eq!(back.bindings.len(), 3);
        assert!(back.bindings[&ShortcutId::Cancel].is_unset());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let settings: DictationSettings = serde_json::from_value(serde_json::json!({
            "bindings": {}
        }))
        .unwrap();
        assert_eq!(settings.similarity_threshold, 0.78);
        assert_eq!(settings.max_format_attempts, 2);
        assert_eq!(settings.retained_sessions, 5);
        assert!(settings.formatting_enabled);
        assert_eq!(settings.vad, VadMode::Disabled);
    }

    #[test]
    fn json_file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("settings.json"));

        assert!(store.load(SETTINGS_KEY).is_none());
        let settings = load_or_default(&store);
        // First load writes defaults back.
        assert!(store.load(SETTINGS_KEY).is_some());

        let mut changed = settings;
        changed.formatting_enabled = false;
        write_settings(&store, &changed);

        let reloaded = load_or_default(&store);
        assert!(!reloaded.formatting_enabled);
    }

    #[test]
    fn corrupt_value_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{\"settings\": 42}").unwrap();
        let store = JsonFileStore::new(path);

        let settings = load_or_default(&store);
        assert_eq!(settings.transcription_model, "gpt-4o-transcribe");
    }
}
