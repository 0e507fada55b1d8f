//! Payload file discovery.
//!
//! Strict layout is `<root>/<app_label>/<ModelName>.json`. The nested layout
//! also accepts one bucket directory in front, which is what a split-by-biz
//! handle run produces: `<root>/<bucket>/<app_label>/<ModelName>.json`.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::core::identifier::parse_model_label;
use crate::error::Result;

/// A payload file found under a corpus root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFile {
    /// `app_label.ModelName` inferred from the path.
    pub model: String,
    pub path: PathBuf,
    /// Bucket directory for nested layouts.
    pub bucket: Option<String>,
}

/// Files laid out as `<root>/<app>/<Model>.json`.
pub fn discover_strict(root: &Path) -> Result<Vec<PayloadFile>> {
    discover(root, false)
}

/// Files laid out as `<root>/<app>/<Model>.json` or
/// `<root>/<bucket>/<app>/<Model>.json`.
pub fn discover_nested(root: &Path) -> Result<Vec<PayloadFile>> {
    discover(root, true)
}

fn discover(root: &Path, nested: bool) -> Result<Vec<PayloadFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let parts: Vec<&str> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();

        let (bucket, app, file) = match parts.as_slice() {
            [_sidecar] => {
                debug!("Skipping root file {}", path.display());
                continue;
            }
            [app, file] => (None, *app, *file),
            [bucket, app, file] if nested => (Some((*bucket).to_string()), *app, *file),
            _ => {
                warn!("Skipping {}: not an <app>/<Model>.json payload", path.display());
                continue;
            }
        };

        let model_name = file.trim_end_matches(".json");
        let model = format!("{}.{}", app, model_name);
        if parse_model_label(&model).is_err() {
            warn!("Skipping {}: cannot infer a model label", path.display());
            continue;
        }
        files.push(PayloadFile {
            model,
            path: path.to_path_buf(),
            bucket,
        });
    }
    Ok(files)
}
