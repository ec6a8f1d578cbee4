//! In-process content service for tests and dry runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{ContentError, ContentService, ROOT_ID};

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeKind {
    Folder,
    Document { size: usize },
}

#[derive(Debug)]
struct MemoryNode {
    parent: String,
    kind: NodeKind,
}

#[derive(Debug, Default)]
struct Faults {
    /// Creations allowed before every further creation is rejected.
    fail_after: Option<usize>,
    /// Creations to answer with "already exists".
    conflicts: usize,
    created: usize,
}

#[derive(Debug, Default)]
pub struct MemoryContentService {
    nodes: Mutex<HashMap<String, MemoryNode>>,
    faults: Mutex<Faults>,
}

impl MemoryContentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every creation after `successes` more have gone through.
    pub fn fail_after(&self, successes: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.fail_after = Some(faults.created + successes);
        }
    }

    /// Answer the next `count` creations with "already exists".
    pub fn conflict_next(&self, count: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.conflicts = count;
        }
    }

    pub fn folder_count(&self) -> usize {
        self.count(|kind| *kind == NodeKind::Folder)
    }

    pub fn document_count(&self) -> usize {
        self.count(|kind| matches!(kind, NodeKind::Document { .. }))
    }

    /// Ids of the direct children of `parent_id`, sorted.
    pub fn children(&self, parent_id: &str) -> Vec<String> {
        let Ok(nodes) = self.nodes.lock() else {
            return Vec::new();
        };
        let mut ids: Vec<String> = nodes
            .iter()
            .filter(|(_, node)| node.parent == parent_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Size of a stored document.
    pub fn document_size(&self, id: &str) -> Option<usize> {
        let nodes = self.nodes.lock().ok()?;
        match nodes.get(id)?.kind {
            NodeKind::Document { size } => Some(size),
            NodeKind::Folder => None,
        }
    }

    fn count(&self, predicate: impl Fn(&NodeKind) -> bool) -> usize {
        self.nodes
            .lock()
            .map(|nodes| nodes.values().filter(|node| predicate(&node.kind)).count())
            .unwrap_or(0)
    }

    fn lock_nodes(&self) -> Result<MutexGuard<'_, HashMap<String, MemoryNode>>, ContentError> {
        self.nodes
            .lock()
            .map_err(|_| ContentError::Rejected("content store lock poisoned".to_string()))
    }

    fn create(&self, parent_id: &str, name: &str, kind: NodeKind) -> Result<String, ContentError> {
        if name.is_empty() || name.contains('/') {
            return Err(ContentError::Rejected(format!("invalid node name '{name}'")));
        }
        let id = child_id(parent_id, name);

        {
            let mut faults = self
                .faults
                .lock()
                .map_err(|_| ContentError::Rejected("fault state lock poisoned".to_string()))?;
            if faults.conflicts > 0 {
                faults.conflicts -= 1;
                return Err(ContentError::AlreadyExists(id));
            }
            if faults.fail_after.is_some_and(|limit| faults.created >= limit) {
                return Err(ContentError::Rejected("injected failure".to_string()));
            }
        }

        let mut nodes = self.lock_nodes()?;
        if parent_id != ROOT_ID {
            match nodes.get(parent_id) {
                Some(parent) if parent.kind == NodeKind::Folder => {}
                Some(_) => {
                    return Err(ContentError::Rejected(format!("'{parent_id}' is not a folder")))
                }
                None => return Err(ContentError::NotFound(parent_id.to_string())),
            }
        }
        if nodes.contains_key(&id) {
            return Err(ContentError::AlreadyExists(id));
        }
        nodes.insert(
            id.clone(),
            MemoryNode {
                parent: parent_id.to_string(),
                kind,
            },
        );
        drop(nodes);

        if let Ok(mut faults) = self.faults.lock() {
            faults.created += 1;
        }
        Ok(id)
    }
}

fn child_id(parent_id: &str, name: &str) -> String {
    if parent_id == ROOT_ID {
        name.to_string()
    } else {
        format!("{parent_id}/{name}")
    }
}

#[async_trait]
impl ContentService for MemoryContentService {
    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, ContentError> {
        self.create(parent_id, name, NodeKind::Folder)
    }

    async fn create_document(
        &self,
        parent_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<String, ContentError> {
        self.create(parent_id, name, NodeKind::Document { size: bytes.len() })
    }

    async fn delete_tree(&self, id: &str, recursive: bool) -> Result<(), ContentError> {
        let mut nodes = self.lock_nodes()?;
        if !nodes.contains_key(id) {
            return Err(ContentError::NotFound(id.to_string()));
        }
        let prefix = format!("{id}/");
        let descendants: Vec<String> = nodes
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();
        if !descendants.is_empty() && !recursive {
            return Err(ContentError::Rejected(format!("folder '{id}' is not empty")));
        }
        for key in descendants {
            nodes.remove(&key);
        }
        nodes.remove(id);
        Ok(())
    }

    async fn resolve(&self, parent_id: &str, name: &str) -> Result<Option<String>, ContentError> {
        let id = child_id(parent_id, name);
        let nodes = self.lock_nodes()?;
        Ok(nodes.contains_key(&id).then_some(id))
    }
}
