use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use log::info;

use crate::{error::SettingsError, models::task::TaskConfig};

/// JSON file holding the last submitted run configuration.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, config: &TaskConfig) -> Result<(), SettingsError> {
        let json = serde_json::to_string_pretty(config)?;
        let io_err = |source: std::io::Error| SettingsError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&self.path, json).map_err(io_err)?;
        info!("Settings saved to {}", self.path.display());
        Ok(())
    }

    /// Returns `Ok(None)` when nothing was saved yet.
    pub fn load(&self) -> Result<Option<TaskConfig>, SettingsError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SettingsError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        Ok(Some(serde_json::from_str(&text)?))
    }
}
