//! Content service backed by a local directory.
//!
//! Folders become directories and documents become files below the root.
//! Node ids are `/`-joined paths relative to the root.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{ContentError, ContentService};

pub struct FsContentService {
    root: PathBuf,
}

impl FsContentService {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ContentError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, id: &str) -> Result<PathBuf, ContentError> {
        let mut path = self.root.clone();
        for segment in id.split('/').filter(|s| !s.is_empty()) {
            check_name(segment)?;
            path.push(segment);
        }
        Ok(path)
    }
}

fn check_name(name: &str) -> Result<(), ContentError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ContentError::Rejected(format!("invalid node name '{name}'")));
    }
    Ok(())
}

fn child_id(parent_id: &str, name: &str) -> String {
    let parent = parent_id.trim_matches('/');
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

async fn require_folder(path: &Path, id: &str) -> Result<(), ContentError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(ContentError::Rejected(format!("'{id}' is not a folder"))),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(ContentError::NotFound(id.to_string())),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ContentService for FsContentService {
    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, ContentError> {
        check_name(name)?;
        let parent = self.locate(parent_id)?;
        require_folder(&parent, parent_id).await?;

        let id = child_id(parent_id, name);
        match tokio::fs::create_dir(parent.join(name)).await {
            Ok(()) => Ok(id),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(ContentError::AlreadyExists(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_document(
        &self,
        parent_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<String, ContentError> {
        check_name(name)?;
        let parent = self.locate(parent_id)?;
        require_folder(&parent, parent_id).await?;

        let id = child_id(parent_id, name);
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(parent.join(name))
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ContentError::AlreadyExists(id))
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(id)
    }

    async fn delete_tree(&self, id: &str, recursive: bool) -> Result<(), ContentError> {
        if id.trim_matches('/').is_empty() {
            return Err(ContentError::Rejected("refusing to delete the root".to_string()));
        }
        let path = self.locate(id)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ContentError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        if meta.is_file() {
            tokio::fs::remove_file(&path).await?;
        } else if recursive {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            let mut entries = tokio::fs::read_dir(&path).await?;
            if entries.next_entry().await?.is_some() {
                return Err(ContentError::Rejected(format!("folder '{id}' is not empty")));
            }
            tokio::fs::remove_dir(&path).await?;
        }
        Ok(())
    }

    async fn resolve(&self, parent_id: &str, name: &str) -> Result<Option<String>, ContentError> {
        check_name(name)?;
        let path = self.locate(parent_id)?.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(Some(child_id(parent_id, name))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
