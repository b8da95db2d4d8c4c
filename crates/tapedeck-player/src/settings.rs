// crates/tapedeck-player/src/settings.rs
//
// Persisted player settings: volume, the five memory markers, and the last
// opened file. Written as JSON to the platform config directory on exit,
// loaded (best-effort, defaulting on any error) at startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tapedeck_core::commands::MemoryMarkers;

/// `%APPDATA%\TapeDeck` on Windows, `~/Library/Application Support/TapeDeck`
/// on macOS, `~/.config/tapedeck` elsewhere.
pub fn config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    let base = std::env::var("APPDATA")
        .map(|p| PathBuf::from(p).join("TapeDeck"))
        .unwrap_or_else(|_| std::env::temp_dir().join("tapedeck"));
    #[cfg(target_os = "macos")]
    let base = std::env::var("HOME")
        .map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("TapeDeck")
        })
        .unwrap_or_else(|_| std::env::temp_dir().join("tapedeck"));
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let base = std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".config").join("tapedeck"))
        .unwrap_or_else(|_| std::env::temp_dir().join("tapedeck"));
    base
}

#[derive(Serialize, Deserialize)]
pub struct Settings {
    pub volume:    f64,
    pub markers:   MemoryMarkers,
    pub last_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            volume:    1.0,
            markers:   MemoryMarkers::new(),
            last_file: None,
        }
    }
}

impl Settings {
    pub fn load() -> Self {
        Self::load_from(&config_dir().join("settings.json"))
    }

    pub fn save(&self) {
        self.save_to(&config_dir().join("settings.json"));
    }

    fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    fn save_to(&self, path: &Path) {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    eprintln!("[player] failed to save settings: {e}");
                }
            }
            Err(e) => eprintln!("[player] failed to serialize settings: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut s = Settings::default();
        s.volume = 0.7;
        s.markers.set(2, 123.5);
        s.last_file = Some(PathBuf::from("/media/reel.mp4"));
        s.save_to(&path);

        let loaded = Settings::load_from(&path);
        assert_eq!(loaded.volume, 0.7);
        assert_eq!(loaded.markers.get(2), Some(123.5));
        assert_eq!(loaded.last_file.as_deref(), Some(Path::new("/media/reel.mp4")));
    }

    #[test]
    fn missing_or_garbage_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Settings::load_from(&dir.path().join("nope.json"));
        assert_eq!(missing.volume, 1.0);

        let garbage = dir.path().join("bad.json");
        std::fs::write(&garbage, "{not json").unwrap();
        let loaded = Settings::load_from(&garbage);
        assert_eq!(loaded.volume, 1.0);
        assert_eq!(loaded.markers.get(0), None);
    }
}
