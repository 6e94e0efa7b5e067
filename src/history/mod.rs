//! Persistent history of finished reports.
//!
//! Records are kept newest-first in a single JSON file. The store is bounded;
//! records pushed past the capacity are evicted together with their work
//! directories.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::HistoryError;
use crate::metadata::ReportMetadata;

/// Default number of records kept.
pub const DEFAULT_CAPACITY: usize = 100;

/// Default page size for listings.
pub const DEFAULT_LIST_LIMIT: usize = 20;

/// One finished report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub session_id: String,
    pub task_id: String,
    pub experiment_name: String,
    pub student_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub document_path: PathBuf,
    pub source_path: PathBuf,
    pub work_dir: PathBuf,
    #[serde(default)]
    pub metadata: ReportMetadata,
    #[serde(default)]
    pub corrective_retries: u32,
    #[serde(default)]
    pub figure_count: usize,
    #[serde(default)]
    pub fallback_count: usize,
}

impl HistoryRecord {
    /// Whether the compiled document still exists on disk.
    pub fn has_document(&self) -> bool {
        self.document_path.is_file()
    }

    fn matches(&self, needle: &str) -> bool {
        self.experiment_name.to_lowercase().contains(needle)
            || self.student_name.to_lowercase().contains(needle)
    }
}

/// Aggregate counts over the stored records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_records: usize,
    pub valid_records: usize,
    pub experiments: BTreeMap<String, usize>,
}

/// JSON-file backed record store.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    capacity: usize,
    records: Mutex<Vec<HistoryRecord>>,
}

impl HistoryStore {
    /// Opens the store at `path`. A missing file starts an empty history; an
    /// unreadable one is logged and replaced on the next write.
    pub async fn open(path: impl Into<PathBuf>, capacity: usize) -> Result<Self, HistoryError> {
        let path = path.into();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<Vec<HistoryRecord>>(&content) {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "History file is corrupt, starting empty");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), records = records.len(), "Opened history");
        Ok(Self {
            path,
            capacity: capacity.max(1),
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inserts a record, or replaces the one with the same id in place.
    ///
    /// A replaced record keeps its creation time and gains an update time.
    pub async fn upsert(&self, mut record: HistoryRecord) -> Result<HistoryRecord, HistoryError> {
        let mut records = self.records.lock().await;
        let mut stale_dirs = Vec::new();

        if let Some(existing) = records.iter_mut().find(|r| r.id == record.id) {
            record.created_at = existing.created_at;
            record.updated_at = Some(Utc::now());
            if existing.work_dir != record.work_dir {
                stale_dirs.push(existing.work_dir.clone());
            }
            *existing = record.clone();
        } else {
            records.insert(0, record.clone());
        }

        if records.len() > self.capacity {
            for evicted in records.drain(self.capacity..) {
                tracing::info!(history_id = %evicted.id, "Evicted history record");
                stale_dirs.push(evicted.work_dir);
            }
        }

        self.save(&records).await?;
        drop(records);

        for dir in stale_dirs {
            remove_work_dir(&dir).await;
        }
        Ok(record)
    }

    /// Newest records whose document still exists.
    pub async fn list(&self, limit: usize) -> Vec<HistoryRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.has_document())
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: &str) -> Result<HistoryRecord, HistoryError> {
        self.records
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| HistoryError::NotFound(id.to_string()))
    }

    /// Removes a record and its work directory.
    pub async fn delete(&self, id: &str) -> Result<HistoryRecord, HistoryError> {
        let mut records = self.records.lock().await;
        let position = records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| HistoryError::NotFound(id.to_string()))?;
        let removed = records.remove(position);
        self.save(&records).await?;
        drop(records);

        remove_work_dir(&removed.work_dir).await;
        tracing::info!(history_id = %id, "Deleted history record");
        Ok(removed)
    }

    /// Case-insensitive search over experiment and student names.
    pub async fn search(&self, query: &str) -> Vec<HistoryRecord> {
        let needle = query.trim().to_lowercase();
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.matches(&needle) && r.has_document())
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> HistoryStats {
        let records = self.records.lock().await;
        let mut stats = HistoryStats {
            total_records: records.len(),
            ..Default::default()
        };
        for record in records.iter() {
            if record.has_document() {
                stats.valid_records += 1;
            }
            let name = if record.experiment_name.trim().is_empty() {
                "unknown".to_string()
            } else {
                record.experiment_name.clone()
            };
            *stats.experiments.entry(name).or_insert(0) += 1;
        }
        stats
    }

    async fn save(&self, records: &[HistoryRecord]) -> Result<(), HistoryError> {
        let json = serde_json::to_vec_pretty(records)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> Result<(), HistoryError> {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)?;
            let mut file = tempfile::NamedTempFile::new_in(dir)?;
            std::io::Write::write_all(&mut file, &json)?;
            file.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| HistoryError::Io(std::io::Error::other(e)))?
    }
}

async fn remove_work_dir(dir: &Path) {
    if dir.as_os_str().is_empty() || !dir.exists() {
        return;
    }
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove work directory");
    }
}
