//! Content service: where folders and documents are actually created.
//!
//! Node ids are opaque strings handed out by the service. The empty id names
//! the service root.

mod fs;
mod memory;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use fs::FsContentService;
pub use memory::MemoryContentService;

/// Id of the root node in every backend.
pub const ROOT_ID: &str = "";

#[derive(Debug, Error)]
pub enum ContentError {
    /// A node with that name already exists under the parent.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The service refused the request.
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported content URL: {0}")]
    UnsupportedUrl(String),
}

impl ContentError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ContentError::AlreadyExists(_))
    }
}

#[async_trait]
pub trait ContentService: Send + Sync {
    /// Create a folder named `name` under `parent_id` and return its id.
    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, ContentError>;

    /// Create a document holding `bytes` and return its id.
    async fn create_document(
        &self,
        parent_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<String, ContentError>;

    /// Delete a node. Without `recursive`, deleting a non-empty folder is rejected.
    async fn delete_tree(&self, id: &str, recursive: bool) -> Result<(), ContentError>;

    /// Id of the child `name` under `parent_id`, if it exists.
    async fn resolve(&self, parent_id: &str, name: &str) -> Result<Option<String>, ContentError>;
}

/// Parsed content service URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentUrl {
    Fs(PathBuf),
    Memory,
}

impl ContentUrl {
    pub fn parse(raw: &str) -> Result<Self, ContentError> {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("fs:") {
            let dir = rest.trim_start_matches("//").trim();
            if dir.is_empty() {
                return Err(ContentError::UnsupportedUrl(format!(
                    "fs URL missing directory: {raw}"
                )));
            }
            return Ok(Self::Fs(PathBuf::from(dir)));
        }
        if raw == "memory:" || raw == "memory" {
            return Ok(Self::Memory);
        }
        Err(ContentError::UnsupportedUrl(raw.to_string()))
    }
}

pub async fn open_content_service(raw: &str) -> Result<Arc<dyn ContentService>, ContentError> {
    match ContentUrl::parse(raw)? {
        ContentUrl::Fs(dir) => Ok(Arc::new(FsContentService::open(dir).await?)),
        ContentUrl::Memory => Ok(Arc::new(MemoryContentService::new())),
    }
}

/// Create every folder along `path`, reusing folders that already exist.
///
/// Returns the id of the last segment.
pub async fn ensure_path(service: &dyn ContentService, path: &str) -> Result<String, ContentError> {
    let mut parent = ROOT_ID.to_string();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        parent = match service.create_folder(&parent, segment).await {
            Ok(id) => id,
            Err(err) if err.is_already_exists() => service
                .resolve(&parent, segment)
                .await?
                .ok_or_else(|| ContentError::NotFound(format!("{parent}/{segment}")))?,
            Err(err) => return Err(err),
        };
    }
    Ok(parent)
}
