//! Settings persistence.
//!
//! The settings file is a flat JSON object mapping upper-case keys to
//! scalar values. Every key has a typed parser and a validation range, so
//! values entered by an operator are either accepted as the right type or
//! rejected outright.

use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StagefocusError, StagefocusResult};

/// A known settings key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    /// Index of the physical webcam to capture from.
    WebcamId,
    /// EMA weight of the new target box, in `(0, 1]`.
    SmoothingFactor,
    /// Fraction of the subject box added on every side, `>= 0`.
    PaddingFactor,
}

impl SettingKey {
    pub const ALL: [SettingKey; 3] = [
        SettingKey::WebcamId,
        SettingKey::SmoothingFactor,
        SettingKey::PaddingFactor,
    ];

    /// Name as stored in the settings file.
    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::WebcamId => "WEBCAM_ID",
            SettingKey::SmoothingFactor => "SMOOTHING_FACTOR",
            SettingKey::PaddingFactor => "PADDING_FACTOR",
        }
    }

    /// Look up a key by its file name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /// Parse operator-entered text into a validated value for this key.
    pub fn parse_text(self, text: &str) -> StagefocusResult<SettingValue> {
        let text = text.trim();
        let number: f64 = text.parse().map_err(|_| {
            StagefocusError::invalid_setting(self.as_str(), format!("'{text}' is not a number"))
        })?;
        self.validate_number(number)
            .map_err(|reason| StagefocusError::invalid_setting(self.as_str(), reason))
    }

    /// Interpret a JSON value loaded from the settings file.
    fn parse_json(self, value: &Value) -> Result<SettingValue, String> {
        let number = value
            .as_f64()
            .ok_or_else(|| format!("expected a number, found {value}"))?;
        self.validate_number(number)
    }

    fn validate_number(self, number: f64) -> Result<SettingValue, String> {
        if !number.is_finite() {
            return Err("must be a finite number".to_string());
        }
        match self {
            SettingKey::WebcamId => {
                if number.fract() != 0.0 || number < 0.0 || number > u32::MAX as f64 {
                    return Err("must be a non-negative integer".to_string());
                }
                Ok(SettingValue::Integer(number as u32))
            }
            SettingKey::SmoothingFactor => {
                if number <= 0.0 || number > 1.0 {
                    return Err("must be in (0, 1]".to_string());
                }
                Ok(SettingValue::Float(number))
            }
            SettingKey::PaddingFactor => {
                if number < 0.0 {
                    return Err("must be >= 0".to_string());
                }
                Ok(SettingValue::Float(number))
            }
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated setting value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingValue {
    Integer(u32),
    Float(f64),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Integer(v) => write!(f, "{v}"),
            SettingValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// The full set of persisted settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "WEBCAM_ID")]
    pub webcam_id: u32,

    #[serde(rename = "SMOOTHING_FACTOR")]
    pub smoothing_factor: f64,

    #[serde(rename = "PADDING_FACTOR")]
    pub padding_factor: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            webcam_id: 0,
            smoothing_factor: 0.07,
            padding_factor: 0.4,
        }
    }
}

impl Settings {
    /// Current value for a key.
    pub fn get(&self, key: SettingKey) -> SettingValue {
        match key {
            SettingKey::WebcamId => SettingValue::Integer(self.webcam_id),
            SettingKey::SmoothingFactor => SettingValue::Float(self.smoothing_factor),
            SettingKey::PaddingFactor => SettingValue::Float(self.padding_factor),
        }
    }

    /// Apply an already-validated value.
    fn apply(&mut self, key: SettingKey, value: SettingValue) -> StagefocusResult<()> {
        match (key, value) {
            (SettingKey::WebcamId, SettingValue::Integer(v)) => self.webcam_id = v,
            (SettingKey::SmoothingFactor, SettingValue::Float(v)) => self.smoothing_factor = v,
            (SettingKey::PaddingFactor, SettingValue::Float(v)) => self.padding_factor = v,
            (key, value) => {
                return Err(StagefocusError::invalid_setting(
                    key.as_str(),
                    format!("value {value} has the wrong type"),
                ))
            }
        }
        Ok(())
    }

    /// Build settings from a parsed JSON document.
    ///
    /// Returns the settings and whether any known key had to fall back to
    /// its default.
    fn from_json(doc: &Value) -> StagefocusResult<(Self, bool)> {
        let map = doc
            .as_object()
            .ok_or_else(|| StagefocusError::settings("settings file is not a JSON object"))?;

        let mut settings = Settings::default();
        let mut defaulted = false;

        for key in SettingKey::ALL {
            let Some(raw) = map.get(key.as_str()) else {
                tracing::warn!(key = %key, "Setting missing; using default");
                defaulted = true;
                continue;
            };
            let applied = key
                .parse_json(raw)
                .and_then(|v| settings.apply(key, v).map_err(|e| e.to_string()));
            if let Err(reason) = applied {
                tracing::warn!(key = %key, %reason, "Invalid setting; using default");
                defaulted = true;
            }
        }

        for name in map.keys() {
            if SettingKey::from_name(name).is_none() {
                tracing::warn!(key = %name, "Ignoring unknown setting");
            }
        }

        Ok((settings, defaulted))
    }
}

/// File-backed settings store shared between the streaming driver and the
/// control surface.
///
/// Writers serialize on `write` and hold it across the disk update; `data`
/// is only locked to copy or commit, so readers never wait on the disk.
pub struct SettingsStore {
    path: PathBuf,
    data: Mutex<Settings>,
    write: Mutex<()>,
}

impl SettingsStore {
    /// Open the store at `path`, loading it from disk.
    ///
    /// A missing or unreadable file yields defaults, which are written back
    /// immediately so the operator has a file to edit.
    pub fn new(path: PathBuf) -> Self {
        let (data, rewrite) = match Self::load(&path) {
            Ok((settings, defaulted)) => (settings, defaulted),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Settings file not found or invalid; creating with defaults");
                (Settings::default(), true)
            }
        };

        let store = Self {
            path,
            data: Mutex::new(data),
            write: Mutex::new(()),
        };
        if rewrite {
            if let Err(e) = store.save() {
                tracing::warn!(error = %e, "Failed to write settings file");
            }
        }
        store
    }

    /// Load settings from a JSON file.
    ///
    /// Returns an error for a missing or unparsable file; individual bad
    /// keys fall back to defaults and set the returned flag.
    pub fn load(path: &Path) -> StagefocusResult<(Settings, bool)> {
        if !path.exists() {
            return Err(StagefocusError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path)?;
        let doc: Value = serde_json::from_str(&contents)?;
        Settings::from_json(&doc)
    }

    /// Save current settings to disk.
    pub fn save(&self) -> StagefocusResult<()> {
        let _write = self.write.lock();
        write_settings_file(&self.path, &self.snapshot())
    }

    /// Copy of the current settings.
    pub fn snapshot(&self) -> Settings {
        *self.data.lock()
    }

    /// Update one key and persist the result.
    ///
    /// The in-memory value only changes once the file has been written.
    pub fn set(&self, key: SettingKey, value: SettingValue) -> StagefocusResult<()> {
        let _write = self.write.lock();
        let mut next = self.snapshot();
        next.apply(key, value)?;
        write_settings_file(&self.path, &next)?;
        *self.data.lock() = next;
        tracing::info!(key = %key, %value, "Setting updated");
        Ok(())
    }

    /// Parse operator text for a named key and persist it.
    pub fn set_from_text(&self, name: &str, text: &str) -> StagefocusResult<SettingValue> {
        let key = SettingKey::from_name(name).ok_or_else(|| {
            StagefocusError::settings(format!("Unknown setting '{}'", name.trim()))
        })?;
        let value = key.parse_text(text)?;
        self.set(key, value)?;
        Ok(value)
    }

    /// Restore and persist the built-in defaults.
    pub fn reset(&self) -> StagefocusResult<()> {
        let _write = self.write.lock();
        let defaults = Settings::default();
        write_settings_file(&self.path, &defaults)?;
        *self.data.lock() = defaults;
        Ok(())
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Write settings as 4-space indented JSON (write `.tmp` then rename).
fn write_settings_file(path: &Path, settings: &Settings) -> StagefocusResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    settings.serialize(&mut ser)?;
    buf.push(b'\n');

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &buf)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Standard settings file location.
pub fn default_settings_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("stagefocus").join("config.json")
}
