use anyhow::Result;
use callwire::{CallSettings, SettingsStore};
use tempfile::TempDir;

fn fallback() -> CallSettings {
    CallSettings {
        threshold_percent: 45,
        silence_timeout_ms: 1500,
    }
}

#[test]
fn test_missing_file_uses_fallback() -> Result<()> {
    let dir = TempDir::new()?;
    let store = SettingsStore::new(dir.path().join("absent.json"));

    assert_eq!(store.load_or(fallback()), fallback());
    Ok(())
}

#[test]
fn test_saved_settings_are_loaded_back() -> Result<()> {
    let dir = TempDir::new()?;
    let store = SettingsStore::new(dir.path().join("call.json"));
    let chosen = CallSettings {
        threshold_percent: 25,
        silence_timeout_ms: 2400,
    };

    store.save(&chosen)?;
    assert_eq!(store.load_or(fallback()), chosen);

    // A fresh store on the same path sees the same values
    let reopened = SettingsStore::new(store.path());
    assert_eq!(reopened.load_or(fallback()), chosen);
    Ok(())
}

#[test]
fn test_save_creates_parent_directories() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("nested/deeper/call.json");
    let store = SettingsStore::new(&path);

    store.save(&fallback())?;
    assert!(path.exists());
    Ok(())
}

#[test]
fn test_unparseable_file_uses_fallback() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("call.json");
    std::fs::write(&path, "threshold = 12")?;

    let store = SettingsStore::new(&path);
    assert_eq!(store.load_or(fallback()), fallback());
    Ok(())
}

#[test]
fn test_out_of_range_values_use_fallback() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("call.json");
    std::fs::write(&path, r#"{"threshold_percent": 400, "silence_timeout_ms": 1500}"#)?;

    let store = SettingsStore::new(&path);
    assert_eq!(store.load_or(fallback()), fallback());
    Ok(())
}
