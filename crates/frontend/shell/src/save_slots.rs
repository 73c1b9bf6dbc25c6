//! Save-state slot registry.
//!
//! A slot is addressed by `(serial, crc, slot index)`. Slot -1 is the
//! implicit quick-resume slot, checked automatically on fast boot when
//! the resume preference is enabled; slots 1..=USER_SLOT_COUNT are
//! user slots. The registry only maps keys to files and answers
//! existence/timestamp queries; the actual load/save commands are
//! marshaled through the worker.

use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use sha2::{Digest, Sha256};

/// The implicit quick-resume slot.
pub const QUICK_RESUME_SLOT: i32 = -1;

/// Number of user-visible save slots.
pub const USER_SLOT_COUNT: i32 = 10;

/// One entry in a slot listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveSlotInfo {
    pub slot: i32,
    pub path: PathBuf,
    pub exists: bool,
    pub modified: Option<SystemTime>,
}

impl SaveSlotInfo {
    /// Human-readable modification time for menu annotation, or
    /// "empty" for slots without a file.
    pub fn timestamp_string(&self) -> String {
        match self.modified {
            Some(time) => {
                let local: DateTime<Local> = time.into();
                local.format("%Y-%m-%d %H:%M:%S").to_string()
            }
            None => "empty".to_string(),
        }
    }
}

/// Maps save-state keys to files under a per-installation root.
#[derive(Debug, Clone)]
pub struct SaveSlotRegistry {
    root: PathBuf,
}

impl SaveSlotRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default saves directory next to the executable.
    pub fn default_root() -> PathBuf {
        let mut path = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        path.push("savestates");
        path
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Deterministic path for a `(serial, crc, slot)` key. Pure:
    /// identical inputs always yield the identical path, and the
    /// resume slot can never collide with a numbered slot.
    pub fn state_path(&self, serial: &str, crc: u32, slot: i32) -> PathBuf {
        let file = if slot == QUICK_RESUME_SLOT {
            format!("{}_{:08X}.resume.sav", serial, crc)
        } else {
            format!("{}_{:08X}.{:02}.sav", serial, crc, slot)
        };
        self.root.join(file)
    }

    /// Existence and modification time for one slot.
    pub fn slot_info(&self, serial: &str, crc: u32, slot: i32) -> SaveSlotInfo {
        let path = self.state_path(serial, crc, slot);
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();
        SaveSlotInfo {
            slot,
            exists: modified.is_some(),
            modified,
            path,
        }
    }

    /// Slots offered in a load menu: resume slot first, then user
    /// slots, filtered to those whose file exists.
    pub fn list_for_load(&self, serial: &str, crc: u32) -> Vec<SaveSlotInfo> {
        self.list_all(serial, crc)
            .into_iter()
            .filter(|info| info.exists)
            .collect()
    }

    /// Slots offered in a save menu: every slot, empty ones included
    /// (annotated via [`SaveSlotInfo::timestamp_string`]).
    pub fn list_for_save(&self, serial: &str, crc: u32) -> Vec<SaveSlotInfo> {
        self.list_all(serial, crc)
    }

    fn list_all(&self, serial: &str, crc: u32) -> Vec<SaveSlotInfo> {
        let mut slots = Vec::with_capacity(1 + USER_SLOT_COUNT as usize);
        slots.push(self.slot_info(serial, crc, QUICK_RESUME_SLOT));
        for slot in 1..=USER_SLOT_COUNT {
            slots.push(self.slot_info(serial, crc, slot));
        }
        slots
    }

    /// Create the saves directory if missing. Called before issuing a
    /// save command so the runtime can write the file directly.
    pub fn ensure_root(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.root)
    }
}

/// Whether `slot` addresses the resume slot or a user slot.
pub fn is_valid_slot(slot: i32) -> bool {
    slot == QUICK_RESUME_SLOT || (1..=USER_SLOT_COUNT).contains(&slot)
}

/// Stable content checksum for images whose runtime does not report a
/// crc: the first four bytes of the SHA-256 digest.
pub fn image_checksum(data: &[u8]) -> u32 {
    let digest = Sha256::digest(data);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_path_is_pure() {
        let registry = SaveSlotRegistry::new("/tmp/saves");
        let a = registry.state_path("SLUS-12345", 0xDEADBEEF, 3);
        let b = registry.state_path("SLUS-12345", 0xDEADBEEF, 3);
        assert_eq!(a, b);
        assert_eq!(a, PathBuf::from("/tmp/saves/SLUS-12345_DEADBEEF.03.sav"));
    }

    #[test]
    fn resume_slot_never_collides_with_user_slots() {
        let registry = SaveSlotRegistry::new("/tmp/saves");
        let resume = registry.state_path("SLUS-12345", 0x1234, QUICK_RESUME_SLOT);
        for slot in 1..=USER_SLOT_COUNT {
            assert_ne!(resume, registry.state_path("SLUS-12345", 0x1234, slot));
        }
    }

    #[test]
    fn different_keys_map_to_different_paths() {
        let registry = SaveSlotRegistry::new("/tmp/saves");
        let base = registry.state_path("SLUS-12345", 0x1234, 1);
        assert_ne!(base, registry.state_path("SLUS-12346", 0x1234, 1));
        assert_ne!(base, registry.state_path("SLUS-12345", 0x1235, 1));
        assert_ne!(base, registry.state_path("SLUS-12345", 0x1234, 2));
    }

    #[test]
    fn load_listing_filters_to_existing_files() {
        let root = std::env::temp_dir().join("vmhost_test_slots_load");
        fs::create_dir_all(&root).unwrap();
        let registry = SaveSlotRegistry::new(&root);

        fs::write(registry.state_path("TEST-0001", 0xAB, 2), b"state").unwrap();

        let loadable = registry.list_for_load("TEST-0001", 0xAB);
        assert_eq!(loadable.len(), 1);
        assert_eq!(loadable[0].slot, 2);
        assert!(loadable[0].exists);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn save_listing_includes_empty_slots() {
        let root = std::env::temp_dir().join("vmhost_test_slots_save");
        fs::create_dir_all(&root).unwrap();
        let registry = SaveSlotRegistry::new(&root);

        let all = registry.list_for_save("TEST-0002", 0xCD);
        assert_eq!(all.len(), 1 + USER_SLOT_COUNT as usize);
        assert_eq!(all[0].slot, QUICK_RESUME_SLOT);
        assert!(all.iter().all(|info| !info.exists));
        assert_eq!(all[1].timestamp_string(), "empty");

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn slot_info_reports_timestamp_for_existing_file() {
        let root = std::env::temp_dir().join("vmhost_test_slots_info");
        fs::create_dir_all(&root).unwrap();
        let registry = SaveSlotRegistry::new(&root);

        fs::write(registry.state_path("TEST-0003", 0xEF, 1), b"state").unwrap();
        let info = registry.slot_info("TEST-0003", 0xEF, 1);
        assert!(info.exists);
        assert!(info.modified.is_some());
        assert_ne!(info.timestamp_string(), "empty");

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn slot_validity_covers_resume_and_user_range() {
        assert!(is_valid_slot(QUICK_RESUME_SLOT));
        assert!(is_valid_slot(1));
        assert!(is_valid_slot(USER_SLOT_COUNT));
        assert!(!is_valid_slot(0));
        assert!(!is_valid_slot(-2));
        assert!(!is_valid_slot(USER_SLOT_COUNT + 1));
    }

    #[test]
    fn image_checksum_is_stable() {
        let data = b"disc image contents";
        assert_eq!(image_checksum(data), image_checksum(data));
        assert_ne!(image_checksum(data), image_checksum(b"other contents"));
    }
}
