//! On-disk file store: one subtree per resource kind plus a private staging area.
//!
//! Uploads are written to staging first and only renamed into their final
//! subtree once the owning database row has been inserted. An uncommitted
//! [`StagedUpload`] removes its staging file when dropped.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::error::AppError;
use crate::policy::ResourceKind;

const STAGING_DIR: &str = ".staging";

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn init(&self) -> io::Result<()> {
        for kind in [ResourceKind::Material, ResourceKind::Submission] {
            fs::create_dir_all(self.dir(kind)).await?;
        }
        fs::create_dir_all(self.root.join(STAGING_DIR)).await
    }

    pub fn dir(&self, kind: ResourceKind) -> PathBuf {
        self.root.join(kind.segment())
    }

    /// Writes the bytes to staging under a fresh storage key.
    pub async fn stage(
        &self,
        kind: ResourceKind,
        bytes: &[u8],
        original_filename: &str,
        owner_id: Option<i64>,
    ) -> Result<StagedUpload, AppError> {
        let safe_name = sanitize_filename(original_filename).ok_or(AppError::EmptyFilename)?;
        let stored_filename = storage_key(kind, &safe_name, owner_id);

        let staging_path = self
            .root
            .join(STAGING_DIR)
            .join(Uuid::new_v4().simple().to_string());
        fs::write(&staging_path, bytes).await?;

        Ok(StagedUpload {
            final_path: self.dir(kind).join(&stored_filename),
            staging_path,
            original_filename: safe_name,
            stored_filename,
            committed: false,
        })
    }

    /// Stages and immediately commits; for callers with no row to coordinate with.
    pub async fn save_upload(
        &self,
        kind: ResourceKind,
        bytes: &[u8],
        original_filename: &str,
        owner_id: Option<i64>,
    ) -> Result<(String, PathBuf), AppError> {
        let mut staged = self.stage(kind, bytes, original_filename, owner_id).await?;
        staged.commit()?;
        Ok((staged.stored_filename.clone(), staged.final_path.clone()))
    }

    pub async fn read_upload(
        &self,
        kind: ResourceKind,
        stored_filename: &str,
    ) -> Result<fs::File, AppError> {
        if sanitize_filename(stored_filename).as_deref() != Some(stored_filename) {
            return Err(AppError::NotFound);
        }
        match fs::File::open(self.dir(kind).join(stored_filename)).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(AppError::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug)]
pub struct StagedUpload {
    staging_path: PathBuf,
    final_path: PathBuf,
    original_filename: String,
    stored_filename: String,
    committed: bool,
}

impl StagedUpload {
    /// The sanitized name the user uploaded, kept for display.
    pub fn original_filename(&self) -> &str {
        &self.original_filename
    }

    pub fn stored_filename(&self) -> &str {
        &self.stored_filename
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Synchronous so it can run while a database transaction is open.
    pub fn commit(&mut self) -> io::Result<()> {
        std::fs::rename(&self.staging_path, &self.final_path)?;
        self.committed = true;
        Ok(())
    }

    /// Undoes a commit whose database transaction then failed to commit.
    pub fn revert(&mut self) {
        if !self.committed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.final_path) {
            tracing::warn!(path = %self.final_path.display(), error = %e, "failed to remove orphaned upload");
        }
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = std::fs::remove_file(&self.staging_path) {
                tracing::warn!(path = %self.staging_path.display(), error = %e, "failed to discard staged upload");
            }
        }
    }
}

/// Reduces a client-supplied filename to a safe ASCII base name.
/// Accents are decomposed first so `ñandú.txt` keeps its letters as `nandu.txt`.
/// Path separators become word breaks, so `../../etc/passwd` yields `etc_passwd`.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let spaced: String = name
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let filtered: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let trimmed = filtered.trim_matches(|c: char| c == '.' || c == '_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Collision-resistant on-disk name. Submissions keep the owner prefix;
/// the original extension is preserved for content-type detection.
pub fn storage_key(kind: ResourceKind, safe_name: &str, owner_id: Option<i64>) -> String {
    let id = Uuid::new_v4().simple().to_string();
    let base = match (kind, owner_id) {
        (ResourceKind::Submission, Some(owner)) => format!("{}_{}", owner, id),
        _ => id,
    };
    match Path::new(safe_name).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.{}", base, ext),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn test_store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("uploads"));
        store.init().await.unwrap();
        (dir, store)
    }

    async fn read_all(store: &FileStore, kind: ResourceKind, name: &str) -> Vec<u8> {
        let mut file = store.read_upload(kind, name).await.unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("hw1.pdf").as_deref(), Some("hw1.pdf"));
        assert_eq!(sanitize_filename("my report.pdf").as_deref(), Some("my_report.pdf"));
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("etc_passwd"));
        assert_eq!(sanitize_filename("C:\\temp\\x.txt").as_deref(), Some("C_temp_x.txt"));
        assert_eq!(sanitize_filename("ñandú.txt").as_deref(), Some("nandu.txt"));
        assert_eq!(sanitize_filename("Práctica Nº1.pdf").as_deref(), Some("Practica_No1.pdf"));
        assert_eq!(sanitize_filename("ｆｕｌｌ.txt").as_deref(), Some("full.txt"));
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename("../.."), None);
    }

    #[test]
    fn test_storage_key_shape() {
        let key = storage_key(ResourceKind::Submission, "hw1.pdf", Some(7));
        assert!(key.starts_with("7_"));
        assert!(key.ends_with(".pdf"));
        let material = storage_key(ResourceKind::Material, "notes", None);
        assert_eq!(material.len(), 32);
        assert_ne!(material, storage_key(ResourceKind::Material, "notes", None));
    }

    #[tokio::test]
    async fn test_round_trip_is_byte_identical() {
        let (_dir, store) = test_store().await;
        let bytes = b"%PDF-1.4 course syllabus\x00\xff".to_vec();
        let (stored, path) = store
            .save_upload(ResourceKind::Material, &bytes, "syllabus.pdf", None)
            .await
            .unwrap();
        assert!(path.starts_with(store.dir(ResourceKind::Material)));
        assert_eq!(read_all(&store, ResourceKind::Material, &stored).await, bytes);
    }

    #[tokio::test]
    async fn test_same_student_same_filename_does_not_overwrite() {
        let (_dir, store) = test_store().await;
        let (first, _) = store
            .save_upload(ResourceKind::Submission, b"draft", "hw1.pdf", Some(7))
            .await
            .unwrap();
        let (second, _) = store
            .save_upload(ResourceKind::Submission, b"final", "hw1.pdf", Some(7))
            .await
            .unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("7_") && second.starts_with("7_"));
        assert_eq!(read_all(&store, ResourceKind::Submission, &first).await, b"draft");
        assert_eq!(read_all(&store, ResourceKind::Submission, &second).await, b"final");
    }

    #[tokio::test]
    async fn test_dropped_stage_leaves_no_file() {
        let (_dir, store) = test_store().await;
        let staged = store
            .stage(ResourceKind::Material, b"bytes", "a.txt", None)
            .await
            .unwrap();
        let final_path = staged.final_path().to_path_buf();
        drop(staged);
        assert!(!final_path.exists());
        let mut entries = std::fs::read_dir(store.root().join(STAGING_DIR)).unwrap();
        assert!(entries.next().is_none());
    }

    #[tokio::test]
    async fn test_revert_removes_committed_file() {
        let (_dir, store) = test_store().await;
        let mut staged = store
            .stage(ResourceKind::Submission, b"bytes", "a.txt", Some(3))
            .await
            .unwrap();
        staged.commit().unwrap();
        assert!(staged.final_path().exists());
        staged.revert();
        assert!(!staged.final_path().exists());
    }

    #[tokio::test]
    async fn test_empty_filename_rejected() {
        let (_dir, store) = test_store().await;
        let err = store
            .stage(ResourceKind::Material, b"bytes", "..", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EmptyFilename));
    }

    #[tokio::test]
    async fn test_read_missing_or_traversal_is_not_found() {
        let (_dir, store) = test_store().await;
        assert!(matches!(
            store.read_upload(ResourceKind::Material, "nope.pdf").await,
            Err(AppError::NotFound)
        ));
        assert!(matches!(
            store.read_upload(ResourceKind::Material, "../entregas/x.pdf").await,
            Err(AppError::NotFound)
        ));
    }
}
