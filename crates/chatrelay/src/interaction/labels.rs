//! Address labels: human-readable names for caller addresses.
//!
//! Labels configured in `chatrelay.yaml` take precedence over labels stored
//! on disk. Every change is written back as pretty JSON using an atomic
//! temp-file rename.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// File name of the label map inside the log directory.
pub const LABELS_FILE: &str = "ip_labels.json";

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("label file I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("label file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl LabelError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Maps caller addresses to labels.
#[async_trait]
pub trait LabelStore: Send + Sync {
    /// The label for `address`, or the address itself when unmapped.
    fn get_label(&self, address: &str) -> String;

    async fn set_label(&self, address: &str, label: &str) -> Result<(), LabelError>;

    /// Returns whether a label was removed.
    async fn remove_label(&self, address: &str) -> Result<bool, LabelError>;

    fn list_labels(&self) -> BTreeMap<String, String>;
}

/// Label store backed by a JSON file.
pub struct FileLabelStore {
    path: PathBuf,
    labels: DashMap<String, String>,
    save_lock: Mutex<()>,
}

impl FileLabelStore {
    /// Load labels from `path`, layering `configured` labels on top.
    ///
    /// A missing or unreadable file is not fatal.
    pub async fn load(path: impl Into<PathBuf>, configured: &HashMap<String, String>) -> Self {
        let path = path.into();
        let labels = DashMap::new();

        match read_labels(&path).await {
            Ok(stored) => {
                debug!(path = %path.display(), count = stored.len(), "Loaded address labels");
                for (address, label) in stored {
                    labels.insert(address, label);
                }
            }
            Err(LabelError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "Failed to load address labels"),
        }

        for (address, label) in configured {
            if !address.is_empty() && !label.is_empty() {
                labels.insert(address.clone(), label.clone());
            }
        }

        Self {
            path,
            labels,
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self) -> Result<(), LabelError> {
        let _guard = self.save_lock.lock().await;
        write_labels(&self.path, &self.list_labels()).await
    }
}

#[async_trait]
impl LabelStore for FileLabelStore {
    fn get_label(&self, address: &str) -> String {
        self.labels
            .get(address)
            .map(|label| label.value().clone())
            .unwrap_or_else(|| address.to_string())
    }

    async fn set_label(&self, address: &str, label: &str) -> Result<(), LabelError> {
        self.labels.insert(address.to_string(), label.to_string());
        self.save().await.inspect_err(|e| {
            warn!(error = %e, address = %address, "Failed to persist address label");
        })
    }

    async fn remove_label(&self, address: &str) -> Result<bool, LabelError> {
        if self.labels.remove(address).is_none() {
            return Ok(false);
        }
        self.save().await.inspect_err(|e| {
            warn!(error = %e, address = %address, "Failed to persist address label removal");
        })?;
        Ok(true)
    }

    fn list_labels(&self) -> BTreeMap<String, String> {
        self.labels
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

async fn read_labels(path: &Path) -> Result<HashMap<String, String>, LabelError> {
    let contents = fs::read(path).await.map_err(|e| LabelError::io(path, e))?;
    Ok(serde_json::from_slice(&contents)?)
}

/// Replace the label file with `labels` through a synced staging file and a
/// rename. A failed write leaves the previous file untouched.
async fn write_labels(path: &Path, labels: &BTreeMap<String, String>) -> Result<(), LabelError> {
    let json = serde_json::to_vec_pretty(labels)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| LabelError::io(dir, e))?;
    }

    let staging = path.with_extension(format!("{}.tmp", ulid::Ulid::new()));
    if let Err(e) = write_synced(&staging, &json).await {
        if let Err(cleanup) = fs::remove_file(&staging).await {
            debug!(error = %cleanup, path = %staging.display(), "No staging file to clean up");
        }
        return Err(LabelError::io(&staging, e));
    }
    fs::rename(&staging, path)
        .await
        .map_err(|e| LabelError::io(path, e))
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}
