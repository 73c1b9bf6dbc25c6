//! Boot parameters and game identity.

use std::path::PathBuf;

/// Where the boot image comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscSource {
    /// Boot from a disc/image file.
    #[default]
    Disc,
    /// Boot the BIOS with no disc inserted.
    BiosOnly,
}

/// Parameters for a single VM boot.
///
/// Constructed on the UI thread and handed to the worker by shared
/// ownership (`Arc`) exactly once; immutable after handoff.
#[derive(Debug, Clone, Default)]
pub struct BootParameters {
    /// Disc/image path. `None` only makes sense with
    /// [`DiscSource::BiosOnly`].
    pub disc_path: Option<PathBuf>,
    pub source: DiscSource,
    /// Save state to resume from immediately after boot.
    pub save_state_path: Option<PathBuf>,
    /// Skip the BIOS intro. `None` falls back to the configured
    /// default.
    pub fast_boot: Option<bool>,
    /// Start fullscreen. `None` falls back to the configured default.
    pub fullscreen: Option<bool>,
}

impl BootParameters {
    pub fn for_disc(path: impl Into<PathBuf>) -> Self {
        Self {
            disc_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn bios_only() -> Self {
        Self {
            source: DiscSource::BiosOnly,
            ..Default::default()
        }
    }
}

/// Identity of the booted game, reported by the runtime after a
/// successful boot and keyed into the save-state registry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameInfo {
    pub serial: String,
    pub crc: u32,
    pub title: String,
    pub disc_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disc_boot_defaults() {
        let boot = BootParameters::for_disc("/games/demo.iso");
        assert_eq!(boot.source, DiscSource::Disc);
        assert_eq!(boot.disc_path, Some(PathBuf::from("/games/demo.iso")));
        assert_eq!(boot.save_state_path, None);
        assert_eq!(boot.fast_boot, None);
        assert_eq!(boot.fullscreen, None);
    }

    #[test]
    fn bios_boot_has_no_disc() {
        let boot = BootParameters::bios_only();
        assert_eq!(boot.source, DiscSource::BiosOnly);
        assert_eq!(boot.disc_path, None);
    }
}
