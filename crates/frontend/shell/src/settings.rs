//! Host settings persisted to config.json beside the executable.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use vmhost_core::WindowGeometry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Start VMs fullscreen unless the boot parameters say otherwise.
    pub start_fullscreen: bool,
    /// Embed the display in the main window instead of a separate one.
    pub render_to_main: bool,
    /// Skip the BIOS intro unless the boot parameters say otherwise.
    pub fast_boot: bool,
    /// Load the quick-resume slot automatically on fast boot.
    pub resume_on_boot: bool,
    /// Save the quick-resume slot automatically on shutdown.
    pub save_resume_on_shutdown: bool,
    /// Pause the VM when the display window loses focus.
    pub pause_on_focus_loss: bool,
    #[serde(default)]
    pub last_disc_path: Option<String>,
    /// Geometry of the standalone display window, persisted before
    /// the surface is torn down.
    #[serde(default)]
    pub display_geometry: Option<WindowGeometry>,
    /// Override for the save-state directory.
    #[serde(default)]
    pub savestate_root: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            start_fullscreen: false,
            render_to_main: true,
            fast_boot: true,
            resume_on_boot: false,
            save_resume_on_shutdown: false,
            pause_on_focus_loss: false,
            last_disc_path: None,
            display_geometry: None,
            savestate_root: None,
        }
    }
}

impl Settings {
    /// Get the config file path relative to the executable
    pub fn config_path() -> PathBuf {
        let mut path = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        path.push("config.json");
        path
    }

    /// Load settings from config.json, falling back to defaults on error
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &PathBuf) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!("failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                // File doesn't exist or can't be read, use defaults
                Self::default()
            }
        }
    }

    /// Save settings to config.json immediately
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &PathBuf) -> std::io::Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(!settings.start_fullscreen);
        assert!(settings.render_to_main);
        assert!(settings.fast_boot);
        assert!(!settings.resume_on_boot);
        assert_eq!(settings.last_disc_path, None);
        assert_eq!(settings.display_geometry, None);
    }

    #[test]
    fn test_settings_serialization() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).expect("Failed to serialize");
        let deserialized: Settings = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(deserialized.render_to_main, settings.render_to_main);
        assert_eq!(deserialized.fast_boot, settings.fast_boot);
    }

    #[test]
    fn test_settings_save_load() {
        let test_dir = std::env::temp_dir().join("vmhost_test_settings");
        fs::create_dir_all(&test_dir).unwrap();
        let test_config = test_dir.join("config.json");

        let settings = Settings {
            last_disc_path: Some("/games/demo.iso".to_string()),
            start_fullscreen: true,
            display_geometry: Some(WindowGeometry {
                x: 10,
                y: 20,
                width: 800,
                height: 600,
            }),
            ..Default::default()
        };

        settings.save_to(&test_config).unwrap();
        let loaded = Settings::load_from(&test_config);

        assert_eq!(loaded.last_disc_path, Some("/games/demo.iso".to_string()));
        assert!(loaded.start_fullscreen);
        assert_eq!(
            loaded.display_geometry,
            Some(WindowGeometry {
                x: 10,
                y: 20,
                width: 800,
                height: 600,
            })
        );

        fs::remove_dir_all(&test_dir).unwrap();
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let missing = std::env::temp_dir().join("vmhost_no_such_config.json");
        let loaded = Settings::load_from(&missing);
        assert!(loaded.render_to_main);
    }
}
