//! Platform-aware data storage directory management
//!
//! ## Platform Paths
//!
//! | Type | Windows | macOS | Linux |
//! |------|---------|-------|-------|
//! | Data | `%APPDATA%\CfgVault\` | `~/Library/Application Support/CfgVault/` | `$XDG_DATA_HOME/cfgvault/` |

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

use super::config::AppConfig;
use super::constants::{
    APP_DOT_FOLDER, APP_NAME, AUDIT_FILE_NAME, ENV_DATA_DIR, SETTINGS_FILE_NAME,
};
use crate::utils::file::expand_path;

/// Data subdirectories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSubdir {
    Sqlite,
    Settings,
    Audit,
}

impl DataSubdir {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DataSubdir::Sqlite => "sqlite",
            DataSubdir::Settings => "settings",
            DataSubdir::Audit => "audit",
        }
    }

    /// Returns subdirectories that are always created.
    pub const fn all() -> &'static [DataSubdir] {
        &[DataSubdir::Sqlite, DataSubdir::Settings, DataSubdir::Audit]
    }
}

/// Application storage manager
#[derive(Debug, Clone)]
pub struct AppStorage {
    data_dir: PathBuf,
    settings_file: PathBuf,
    audit_file: PathBuf,
}

impl AppStorage {
    /// Initialize storage with platform-appropriate data directory
    pub async fn init(config: &AppConfig) -> Result<Self> {
        let data_dir = Self::resolve_data_dir();

        // Create directories first (canonicalize requires path to exist)
        Self::ensure_directories(&data_dir).await?;

        let data_dir = data_dir.canonicalize().unwrap_or(data_dir);

        let settings_file = config
            .storage
            .file
            .clone()
            .unwrap_or_else(|| Self::default_path(&data_dir, DataSubdir::Settings, SETTINGS_FILE_NAME));
        let audit_file = config
            .audit
            .path
            .clone()
            .unwrap_or_else(|| Self::default_path(&data_dir, DataSubdir::Audit, AUDIT_FILE_NAME));

        // Overridden paths may live outside the data directory
        for path in [&settings_file, &audit_file] {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
        }

        tracing::debug!(
            data_dir = %data_dir.display(),
            settings_file = %settings_file.display(),
            audit_file = %audit_file.display(),
            "Storage initialized"
        );

        Ok(Self {
            data_dir,
            settings_file,
            audit_file,
        })
    }

    /// Resolve data directory from env var or platform default
    pub fn resolve_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            return expand_path(&dir);
        }

        if let Some(proj_dirs) = ProjectDirs::from("", "", APP_NAME) {
            return proj_dirs.data_dir().to_path_buf();
        }

        // Fallback to local .cfgvault
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        cwd.join(APP_DOT_FOLDER)
    }

    async fn ensure_directories(data_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        for subdir in DataSubdir::all() {
            let path = data_dir.join(subdir.as_str());
            tokio::fs::create_dir_all(&path).await.with_context(|| {
                format!(
                    "Failed to create {} directory: {}",
                    subdir.as_str(),
                    path.display()
                )
            })?;
        }

        Ok(())
    }

    fn default_path(data_dir: &Path, subdir: DataSubdir, filename: &str) -> PathBuf {
        data_dir.join(subdir.as_str()).join(filename)
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get path to a file within a subdirectory
    pub fn subdir_path(&self, subdir: DataSubdir, filename: &str) -> PathBuf {
        Self::default_path(&self.data_dir, subdir, filename)
    }

    /// Settings document used by the file backend
    pub fn settings_file(&self) -> &Path {
        &self.settings_file
    }

    /// Active audit log file
    pub fn audit_file(&self) -> &Path {
        &self.audit_file
    }

    /// Create AppStorage for testing with a specific data directory
    #[cfg(test)]
    pub fn init_for_test(data_dir: PathBuf) -> Self {
        for subdir in DataSubdir::all() {
            let _ = std::fs::create_dir_all(data_dir.join(subdir.as_str()));
        }
        let settings_file = Self::default_path(&data_dir, DataSubdir::Settings, SETTINGS_FILE_NAME);
        let audit_file = Self::default_path(&data_dir, DataSubdir::Audit, AUDIT_FILE_NAME);
        Self {
            data_dir,
            settings_file,
            audit_file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_subdir_as_str() {
        assert_eq!(DataSubdir::Sqlite.as_str(), "sqlite");
        assert_eq!(DataSubdir::Settings.as_str(), "settings");
        assert_eq!(DataSubdir::Audit.as_str(), "audit");
    }

    #[test]
    fn test_data_subdir_all() {
        let all = DataSubdir::all();
        assert_eq!(all.len(), 3);
        assert!(all.contains(&DataSubdir::Sqlite));
        assert!(all.contains(&DataSubdir::Audit));
    }

    #[test]
    fn test_default_file_locations() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = AppStorage::init_for_test(temp_dir.path().to_path_buf());
        assert_eq!(
            storage.settings_file(),
            temp_dir.path().join("settings").join(SETTINGS_FILE_NAME)
        );
        assert_eq!(
            storage.audit_file(),
            temp_dir.path().join("audit").join(AUDIT_FILE_NAME)
        );
        assert!(temp_dir.path().join("sqlite").is_dir());
    }

    #[test]
    fn test_resolve_data_dir_fallback() {
        // SAFETY: Test runs single-threaded, no concurrent access to env var
        unsafe { std::env::remove_var(ENV_DATA_DIR) };
        let path = AppStorage::resolve_data_dir();
        assert!(!path.as_os_str().is_empty());
    }
}
