//! Single-model payload files.
//!
//! A payload is one JSON object per model:
//! `{"model": "app.Model", "exported_at": "...Z", "data": [...], "stats": {"total": N}}`.
//! [`PayloadWriter`] streams rows into a `.json.tmp` file and renames it into
//! place on [`finish`](PayloadWriter::finish), so a partially written payload
//! is never observed under its final name.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::core::identifier::parse_model_label;
use crate::core::value::RowDict;
use crate::error::{MigrateError, Result};

/// Payload statistics. `total` always equals the number of rows in `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadStats {
    pub total: usize,

    /// Any other counters carried by the file.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Content of one payload file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportPayload {
    /// `app_label.ModelName`.
    pub model: String,
    /// ISO-8601 UTC timestamp with `Z` suffix.
    pub exported_at: String,
    pub data: Vec<RowDict>,
    pub stats: PayloadStats,
}

impl ExportPayload {
    pub fn new(model: impl Into<String>, data: Vec<RowDict>) -> Self {
        let total = data.len();
        Self {
            model: model.into(),
            exported_at: export_timestamp(),
            data,
            stats: PayloadStats {
                total,
                extra: Map::new(),
            },
        }
    }
}

/// Current time in the payload timestamp format.
pub fn export_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// `<root>/<app_label>/<ModelName>.json`
pub fn payload_path(root: &Path, model: &str) -> Result<PathBuf> {
    let (app_label, model_name) = parse_model_label(model)?;
    Ok(root.join(app_label).join(format!("{}.json", model_name)))
}

/// Read and check a payload file.
pub fn read_payload(path: &Path) -> Result<ExportPayload> {
    let content = fs::read(path)?;
    let payload: ExportPayload = serde_json::from_slice(&content)
        .map_err(|e| MigrateError::payload(path, e.to_string()))?;
    parse_model_label(&payload.model)
        .map_err(|e| MigrateError::payload(path, e.to_string()))?;
    if payload.stats.total != payload.data.len() {
        warn!(
            "{}: stats.total is {} but data holds {} rows, using the rows",
            path.display(),
            payload.stats.total,
            payload.data.len()
        );
    }
    Ok(payload)
}

/// Streaming payload writer.
///
/// Dropping a writer that was not finished removes its temp file.
pub struct PayloadWriter {
    model: String,
    path: PathBuf,
    temp_path: PathBuf,
    writer: Option<BufWriter<File>>,
    total: usize,
    bytes: u64,
    write_empty: bool,
}

impl PayloadWriter {
    /// Open `<root>/<app>/<Model>.json.tmp` and write the payload header.
    pub fn create(root: &Path, model: &str, write_empty: bool) -> Result<Self> {
        let path = payload_path(root, model)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("json.tmp");
        let mut writer = BufWriter::new(File::create(&temp_path)?);

        let header = format!(
            "{{\"model\": {}, \"exported_at\": {}, \"data\": [",
            serde_json::to_string(model)?,
            serde_json::to_string(&export_timestamp())?
        );
        writer.write_all(header.as_bytes())?;

        Ok(Self {
            model: model.to_string(),
            bytes: header.len() as u64,
            path,
            temp_path,
            writer: Some(writer),
            total: 0,
            write_empty,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Rows written so far.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Append rows to the data array.
    pub fn write_rows(&mut self, rows: &[RowDict]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            MigrateError::payload(&self.path, "payload writer already closed")
        })?;
        for row in rows {
            let encoded = serde_json::to_vec(row)?;
            if self.total > 0 {
                writer.write_all(b", ")?;
                self.bytes += 2;
            }
            writer.write_all(&encoded)?;
            self.bytes += encoded.len() as u64;
            self.total += 1;
        }
        Ok(())
    }

    /// Close the payload and move it into place.
    ///
    /// Returns `None` when no rows were written and empty files are skipped.
    pub fn finish(mut self) -> Result<Option<WrittenPayload>> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(None);
        };
        let footer = format!("], \"stats\": {{\"total\": {}}}}}", self.total);
        writer.write_all(footer.as_bytes())?;
        writer.flush()?;
        drop(writer);

        if self.total == 0 && !self.write_empty {
            fs::remove_file(&self.temp_path)?;
            debug!("{}: no rows, skipping empty file", self.model);
            return Ok(None);
        }

        fs::rename(&self.temp_path, &self.path)?;
        Ok(Some(WrittenPayload {
            path: self.path.clone(),
            rows: self.total,
            bytes: self.bytes + footer.len() as u64,
        }))
    }
}

impl Drop for PayloadWriter {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            if let Err(e) = fs::remove_file(&self.temp_path) {
                warn!("Failed to remove {}: {}", self.temp_path.display(), e);
            }
        }
    }
}

/// A payload moved into its final location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenPayload {
    pub path: PathBuf,
    pub rows: usize,
    pub bytes: u64,
}

/// Write a whole payload in one call.
pub fn write_payload(
    root: &Path,
    model: &str,
    rows: &[RowDict],
    write_empty: bool,
) -> Result<Option<WrittenPayload>> {
    let mut writer = PayloadWriter::create(root, model, write_empty)?;
    writer.write_rows(rows)?;
    writer.finish()
}
