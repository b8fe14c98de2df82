//! Pipeline settings loaded from a YAML file and threaded, immutably, into
//! every stage. Nothing in the crate reads configuration from globals.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub folders: FolderSettings,
    pub mail: MailSettings,
    /// Path to the SQL statement template applied to every normalized row.
    pub template: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSettings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FolderSettings {
    /// Raw spreadsheet attachments land here after harvesting.
    pub attachments: PathBuf,
    /// Normalized row tables await statement generation here.
    pub normalized: PathBuf,
    /// Rendered statement batches await execution here.
    pub pending: PathBuf,
    /// Batches that have been applied to the database rest here.
    pub archive: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailSettings {
    /// Root of the maildir tree to harvest from.
    pub root: PathBuf,
    /// Label (subfolder) whose messages carry meter spreadsheets.
    pub label: String,
}

fn default_port() -> u16 {
    5432
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Opening settings file {path:?}"))?;
        let settings: Settings = serde_yaml::from_str(&raw)
            .with_context(|| format!("Parsing settings file {path:?}"))?;
        Ok(settings)
    }
}

impl FolderSettings {
    /// Creates any missing staging folders so a fresh deployment can run
    /// without hand-built directories.
    pub fn ensure_exist(&self) -> Result<()> {
        for folder in [
            &self.attachments,
            &self.normalized,
            &self.pending,
            &self.archive,
        ] {
            fs::create_dir_all(folder)
                .with_context(|| format!("Creating staging folder {folder:?}"))?;
        }
        Ok(())
    }
}
