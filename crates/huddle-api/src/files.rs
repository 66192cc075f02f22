use std::path::{Component, Path, PathBuf};

use axum::{Json, body::Bytes, extract::State, http::StatusCode, response::IntoResponse};
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};
use uuid::Uuid;

use huddle_types::api::UploadResponse;

use crate::error::ApiError;
use crate::state::AppState;

/// 50 MB upload limit for files
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Avatar,
    Attachment,
}

impl FileKind {
    fn dir(self) -> &'static str {
        match self {
            Self::Avatar => "avatars",
            Self::Attachment => "attachments",
        }
    }
}

/// Blob storage under a single upload root. Stored paths are always
/// `<kind dir>/<uuid>` relative to the root.
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

    pub async fn save(&self, kind: FileKind, bytes: &[u8]) -> std::io::Result<String> {
        let dir = self.root.join(kind.dir());
        tokio::fs::create_dir_all(&dir).await?;

        let name = Uuid::new_v4().to_string();
        let mut file = tokio::fs::File::create(dir.join(&name)).await?;
        file.write_all(bytes).await?;
        file.flush().await?;

        Ok(format!("{}/{}", kind.dir(), name))
    }

    /// Best-effort delete of a previously stored file.
    pub async fn remove(&self, stored: &str) {
        let Some(path) = self.resolve(stored) else {
            warn!("Refusing to remove invalid stored path {:?}", stored);
            return;
        };
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }

    /// Map a stored relative path to its location on disk. Anything other than
    /// `avatars/<uuid>` or `attachments/<uuid>` is rejected.
    pub fn resolve(&self, stored: &str) -> Option<PathBuf> {
        let mut components = Path::new(stored).components();
        let dir = match components.next()? {
            Component::Normal(dir) => dir.to_str()?,
            _ => return None,
        };
        if dir != FileKind::Avatar.dir() && dir != FileKind::Attachment.dir() {
            return None;
        }
        let name = match components.next()? {
            Component::Normal(name) => name.to_str()?,
            _ => return None,
        };
        name.parse::<Uuid>().ok()?;
        if components.next().is_some() {
            return None;
        }
        Some(self.root.join(dir).join(name))
    }
}

pub(crate) fn check_upload(bytes: &Bytes) -> Result<(), ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("empty upload".into()));
    }
    if bytes.len() > MAX_FILE_SIZE {
        return Err(ApiError::PayloadTooLarge);
    }
    Ok(())
}

/// POST /files: raw bytes, stored as a message attachment.
pub async fn upload_file(
    State(state): State<AppState>,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    check_upload(&bytes)?;

    let path = state
        .files
        .save(FileKind::Attachment, &bytes)
        .await
        .map_err(|e| {
            error!("Failed to store attachment: {}", e);
            ApiError::Internal
        })?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            path,
            size: bytes.len() as u64,
        }),
    ))
}
