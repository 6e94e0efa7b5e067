//! Per-session upload storage.
//!
//! A session owns a directory with the uploaded guide, data sheet and
//! preview report files, plus the latest result bundle produced for it.
//! Sessions live in memory and are removed explicitly or when idle longer
//! than the retention window.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::SessionError;
use crate::extract::{ExtractedTable, GuideSection};
use crate::metadata::ReportMetadata;
use crate::synth::ReportSection;

/// File extensions accepted for upload.
pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg", "gif", "txt", "csv"];

const MAX_SESSION_ID_LEN: usize = 64;

/// What an uploaded file is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    Guide,
    DataSheet,
    PreviewReport,
}

impl ArtifactRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactRole::Guide => "guide",
            ArtifactRole::DataSheet => "data_sheet",
            ArtifactRole::PreviewReport => "preview_report",
        }
    }
}

impl std::str::FromStr for ArtifactRole {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "guide" => Ok(ArtifactRole::Guide),
            "data_sheet" => Ok(ArtifactRole::DataSheet),
            "preview_report" => Ok(ArtifactRole::PreviewReport),
            other => Err(SessionError::UnknownRole(other.to_string())),
        }
    }
}

/// A file received from the client.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: String,
    pub data: Vec<u8>,
}

/// A stored upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadedArtifact {
    pub id: String,
    pub role: ArtifactRole,
    pub original_name: String,
    pub stored_name: String,
    #[serde(skip)]
    pub stored_path: PathBuf,
    pub size: u64,
    pub sha256: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Everything a finished task produced, kept for modification requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBundle {
    pub task_id: String,
    pub history_id: String,
    pub metadata: ReportMetadata,
    pub guide_text: String,
    pub guide_parts: Vec<(GuideSection, String)>,
    pub tables: Vec<ExtractedTable>,
    pub sections: Vec<ReportSection>,
    pub source_path: PathBuf,
    pub document_path: PathBuf,
    pub workspace: PathBuf,
}

/// One user's working context.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub artifacts: Vec<UploadedArtifact>,
    pub latest: Option<ResultBundle>,
}

impl Session {
    fn new(id: String, dir: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id,
            dir,
            created_at: now,
            last_activity: now,
            artifacts: Vec::new(),
            latest: None,
        }
    }

    /// Stored paths of the uploads with `role`, in upload order.
    pub fn paths(&self, role: ArtifactRole) -> Vec<PathBuf> {
        self.artifacts
            .iter()
            .filter(|a| a.role == role)
            .map(|a| a.stored_path.clone())
            .collect()
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Session ids are client-visible path components.
pub fn validate_session_id(id: &str) -> Result<(), SessionError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(SessionError::InvalidId(id.to_string()))
    }
}

/// Lower-cased extension of an uploaded file name, if allowed.
pub fn allowed_extension(name: &str) -> Result<String, SessionError> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(SessionError::UnsupportedFileType(name.to_string()))
    }
}

/// In-memory registry of sessions backed by per-session directories.
#[derive(Debug)]
pub struct SessionStore {
    root: PathBuf,
    max_upload_bytes: u64,
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>, max_upload_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_upload_bytes,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn get_or_create(&self, id: &str) -> Arc<Mutex<Session>> {
        if let Some(session) = self.sessions.read().await.get(id) {
            return session.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::info!(session_id = %id, "Created session");
                Arc::new(Mutex::new(Session::new(id.to_string(), self.root.join(id))))
            })
            .clone()
    }

    /// Stores files under a session, creating the session when needed.
    ///
    /// The whole batch is validated before anything is written. Uploads to
    /// the same session are serialized.
    pub async fn upload(
        &self,
        session_id: Option<&str>,
        role: ArtifactRole,
        files: Vec<IncomingFile>,
    ) -> Result<(String, Vec<UploadedArtifact>), SessionError> {
        let id = match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => {
                validate_session_id(id)?;
                id.to_string()
            }
            None => Uuid::new_v4().to_string(),
        };

        let mut checked = Vec::with_capacity(files.len());
        for file in files {
            let ext = allowed_extension(&file.name)?;
            let size = file.data.len() as u64;
            if size > self.max_upload_bytes {
                return Err(SessionError::TooLarge {
                    name: file.name,
                    size,
                    limit: self.max_upload_bytes,
                });
            }
            checked.push((file, ext));
        }

        let session = self.get_or_create(&id).await;
        let mut session = session.lock().await;
        tokio::fs::create_dir_all(&session.dir).await?;

        let mut stored = Vec::with_capacity(checked.len());
        for (file, ext) in checked {
            let artifact_id = Uuid::new_v4().to_string();
            let stored_name = format!("{}_{}.{}", role.as_str(), artifact_id, ext);
            let stored_path = session.dir.join(&stored_name);
            tokio::fs::write(&stored_path, &file.data).await?;

            let artifact = UploadedArtifact {
                id: artifact_id,
                role,
                original_name: file.name,
                stored_name,
                stored_path,
                size: file.data.len() as u64,
                sha256: hex::encode(Sha256::digest(&file.data)),
                uploaded_at: Utc::now(),
            };
            tracing::debug!(
                session_id = %id,
                role = role.as_str(),
                name = %artifact.original_name,
                size = artifact.size,
                "Stored upload"
            );
            session.artifacts.push(artifact.clone());
            stored.push(artifact);
        }
        session.touch();

        Ok((id, stored))
    }

    /// Copy of a session's current state.
    pub async fn snapshot(&self, id: &str) -> Result<Session, SessionError> {
        let session = self
            .sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let mut session = session.lock().await;
        session.touch();
        Ok(session.clone())
    }

    /// Records the latest result bundle for a session.
    pub async fn set_latest(&self, id: &str, bundle: ResultBundle) -> Result<(), SessionError> {
        let session = self
            .sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let mut session = session.lock().await;
        session.latest = Some(bundle);
        session.touch();
        Ok(())
    }

    /// Removes a session and its upload directory.
    pub async fn delete(&self, id: &str) -> Result<(), SessionError> {
        validate_session_id(id)?;
        let removed = self.sessions.write().await.remove(id);
        let Some(session) = removed else {
            return Err(SessionError::NotFound(id.to_string()));
        };
        let dir = session.lock().await.dir.clone();
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        tracing::info!(session_id = %id, "Deleted session");
        Ok(())
    }

    /// Removes sessions idle for longer than `retention`. Returns how many
    /// were removed.
    pub async fn sweep_expired(&self, retention: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(1));

        let mut expired = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (id, session) in sessions.iter() {
                if session.lock().await.last_activity < cutoff {
                    expired.push(id.clone());
                }
            }
        }

        let mut removed = 0;
        for id in expired {
            match self.delete(&id).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(session_id = %id, error = %e, "Failed to remove expired session"),
            }
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, data: &[u8]) -> IncomingFile {
        IncomingFile {
            name: name.into(),
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("data_sheet".parse::<ArtifactRole>().unwrap(), ArtifactRole::DataSheet);
        assert!(matches!(
            "other".parse::<ArtifactRole>(),
            Err(SessionError::UnknownRole(_))
        ));
    }

    #[test]
    fn test_session_id_validation() {
        assert!(validate_session_id("3f2b9c1e-1d2a-4c55-9a8e-0b6f7d3e2a10").is_ok());
        assert!(validate_session_id("../etc").is_err());
        assert!(validate_session_id("").is_err());
    }

    #[tokio::test]
    async fn test_upload_creates_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), 1024);

        let (id, stored) = store
            .upload(None, ArtifactRole::DataSheet, vec![file("Sheet.CSV", b"a,b\n1,2\n")])
            .await
            .unwrap();

        assert_eq!(stored.len(), 1);
        let artifact = &stored[0];
        assert_eq!(artifact.original_name, "Sheet.CSV");
        assert!(artifact.stored_name.starts_with("data_sheet_"));
        assert!(artifact.stored_name.ends_with(".csv"));
        assert_eq!(artifact.sha256.len(), 64);
        assert!(artifact.stored_path.exists());

        let session = store.snapshot(&id).await.unwrap();
        assert_eq!(session.paths(ArtifactRole::DataSheet).len(), 1);
        assert!(session.paths(ArtifactRole::Guide).is_empty());
    }

    #[tokio::test]
    async fn test_upload_appends_to_existing_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), 1024);

        let (id, _) = store
            .upload(None, ArtifactRole::Guide, vec![file("guide.txt", b"Purpose")])
            .await
            .unwrap();
        let (same, _) = store
            .upload(Some(&id), ArtifactRole::DataSheet, vec![file("d.csv", b"1,2")])
            .await
            .unwrap();

        assert_eq!(id, same);
        assert_eq!(store.snapshot(&id).await.unwrap().artifacts.len(), 2);
    }

    #[tokio::test]
    async fn test_upload_rejects_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), 4);

        let err = store
            .upload(None, ArtifactRole::Guide, vec![file("run.exe", b"x")])
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::UnsupportedFileType(_)));

        let err = store
            .upload(None, ArtifactRole::Guide, vec![file("big.txt", b"12345")])
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::TooLarge { size: 5, .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), 1024);
        let (id, _) = store
            .upload(None, ArtifactRole::Guide, vec![file("g.txt", b"x")])
            .await
            .unwrap();
        let session_dir = store.snapshot(&id).await.unwrap().dir;

        store.delete(&id).await.unwrap();
        assert!(!session_dir.exists());
        assert!(matches!(
            store.snapshot(&id).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), 1024);
        store
            .upload(None, ArtifactRole::Guide, vec![file("g.txt", b"x")])
            .await
            .unwrap();

        assert_eq!(store.sweep_expired(Duration::from_secs(3600)).await, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.sweep_expired(Duration::from_millis(1)).await, 1);
        assert_eq!(store.len().await, 0);
    }
}
