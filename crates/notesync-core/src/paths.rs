use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const NOTESYNC_DIR: &str = ".notesync";
pub const CONFIG_FILE: &str = ".notesync/config.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn notesync_dir(root: &Path) -> PathBuf {
    root.join(NOTESYNC_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}
