use crate::error::{NotesyncError, Result};
use crate::status::Status;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One update in a batch file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestUpdate {
    pub task_id: String,
    /// Free text; unknown values are recorded as planned.
    pub status: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_set_status")]
    pub set_status: bool,
}

fn default_set_status() -> bool {
    true
}

impl ManifestUpdate {
    pub fn status(&self) -> Status {
        Status::parse(&self.status)
    }
}

/// A batch of updates applied in file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub updates: Vec<ManifestUpdate>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let mut manifest: Manifest = serde_yaml::from_str(data)?;
        manifest.check()?;
        // Block scalars end in a newline; the entry adds its own separator.
        for update in &mut manifest.updates {
            let len = update.content.trim_end_matches(['\n', '\r']).len();
            update.content.truncate(len);
        }
        Ok(manifest)
    }

    fn check(&self) -> Result<()> {
        for (i, update) in self.updates.iter().enumerate() {
            if update.task_id.trim().is_empty() {
                return Err(NotesyncError::InvalidManifest(format!(
                    "update #{} has an empty task_id",
                    i + 1
                )));
            }
        }
        Ok(())
    }
}
