//! Files written next to the payloads at the corpus root.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

pub const AUTO_INCREMENT_REPORT: &str = "auto_increment_report.json";
pub const EXPORT_REPORT: &str = "export_report.md";
pub const HANDLE_REPORT: &str = "handle_report.md";

/// Per-model row counts captured at export time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoIncrementReport {
    pub items: Vec<AutoIncrementItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoIncrementItem {
    pub model: String,
    pub total_rows: u64,
}

impl AutoIncrementReport {
    /// Read `auto_increment_report.json` from a corpus root, if present.
    pub fn load(root: &Path) -> Result<Option<Self>> {
        let path = root.join(AUTO_INCREMENT_REPORT);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read(&path)?;
        let report = serde_json::from_slice(&content)
            .map_err(|e| MigrateError::payload(&path, e.to_string()))?;
        Ok(Some(report))
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        write_atomic(
            &root.join(AUTO_INCREMENT_REPORT),
            serde_json::to_string_pretty(self)?.as_bytes(),
        )
    }
}

/// Write a file through a temp file and rename.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}
