//! Inspect and edit the persisted settings file.

use std::path::{Path, PathBuf};

use stagefocus_common::config::{SettingKey, Settings, SettingsStore};

pub fn show(settings_path: PathBuf, json: bool) -> anyhow::Result<()> {
    let store = SettingsStore::new(settings_path);
    let settings = store.snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(&settings)?);
    } else {
        print_settings(&settings);
    }
    Ok(())
}

pub fn set(settings_path: PathBuf, key: &str, value: &str) -> anyhow::Result<()> {
    let store = SettingsStore::new(settings_path);
    let value = store.set_from_text(key, value)?;
    println!("{} = {value}", key.trim().to_ascii_uppercase());
    Ok(())
}

pub fn reset(settings_path: PathBuf) -> anyhow::Result<()> {
    let store = SettingsStore::new(settings_path);
    store.reset()?;
    println!("Settings restored to defaults in {}", store.path().display());
    print_settings(&store.snapshot());
    Ok(())
}

pub fn path(settings_path: &Path) -> anyhow::Result<()> {
    println!("{}", settings_path.display());
    Ok(())
}

/// Print every key as `KEY = value`.
pub fn print_settings(settings: &Settings) {
    for key in SettingKey::ALL {
        println!("  {:<18} = {}", key.as_str(), settings.get(key));
    }
}
