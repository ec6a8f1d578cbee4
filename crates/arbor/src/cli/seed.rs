//! Seed command - create tree roots and record them in the ledger
//!
//! A population run only starts from Node Records that already exist.
//! Seeding creates each root folder through the content service and records
//! it with zero counters.

use anyhow::Context;
use arbor_ledger::LedgerStore;
use arbor_protocol::{path_level, NodeRecord};
use arbor_worker::{ensure_path, ContentService};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::output::{print_json, print_table};
use crate::cli::{open_content, open_ledger_store};
use crate::config::ArborConfig;

#[derive(Debug)]
pub struct SeedArgs {
    pub paths: Vec<String>,
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SeededRoot {
    pub path: String,
    pub id: String,
    pub created: bool,
}

/// Create and record each root. Roots already recorded are left untouched.
pub async fn seed_roots(
    ledger: &dyn LedgerStore,
    content: &dyn ContentService,
    context: &str,
    root_level: u32,
    paths: &[String],
) -> anyhow::Result<Vec<SeededRoot>> {
    let mut seeded = Vec::with_capacity(paths.len());
    for raw in paths {
        let path = normalize(raw);
        if path_level(&path) != root_level {
            warn!(
                path = %path,
                level = path_level(&path),
                root_level,
                "Root level differs from the configured root level"
            );
        }

        let id = ensure_path(content, &path)
            .await
            .with_context(|| format!("Failed to create root folder {}", path))?;
        let outcome = ledger
            .create_if_absent(&NodeRecord::new(context, path.as_str()).with_id(id.as_str()))
            .await
            .with_context(|| format!("Failed to record root {}", path))?;

        info!(path = %path, id = %id, created = outcome.is_created(), "Seeded root");
        seeded.push(SeededRoot {
            path,
            id,
            created: outcome.is_created(),
        });
    }
    Ok(seeded)
}

fn normalize(raw: &str) -> String {
    let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

pub async fn run(config: &ArborConfig, args: SeedArgs) -> anyhow::Result<()> {
    if args.paths.is_empty() {
        anyhow::bail!("No root paths given");
    }
    let ledger = open_ledger_store(&config.ledger.url).await?;
    let content = open_content(&config.worker.content_url).await?;

    let seeded = seed_roots(
        ledger.as_ref(),
        content.as_ref(),
        &config.scheduler.context,
        config.tree.root_level,
        &args.paths,
    )
    .await?;

    if args.json {
        return print_json(&seeded);
    }
    let rows = seeded
        .iter()
        .map(|root| {
            vec![
                root.path.clone(),
                root.id.clone(),
                if root.created { "created" } else { "exists" }.to_string(),
            ]
        })
        .collect();
    print_table(&["PATH", "ID", "STATUS"], rows);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_ledger::MemoryLedger;
    use arbor_worker::MemoryContentService;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Sites/a/documentLibrary/"), "/Sites/a/documentLibrary");
        assert_eq!(normalize("//Sites//a"), "/Sites/a");
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let ledger = MemoryLedger::new();
        let content = MemoryContentService::new();
        let paths = vec!["/Sites/a/documentLibrary".to_string()];

        let first = seed_roots(&ledger, &content, "", 3, &paths).await.unwrap();
        assert!(first[0].created);
        let second = seed_roots(&ledger, &content, "", 3, &paths).await.unwrap();
        assert!(!second[0].created);
        assert_eq!(first[0].id, second[0].id);

        let node = ledger
            .get_node("", "/Sites/a/documentLibrary")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(node.id.as_deref(), Some(first[0].id.as_str()));
        assert_eq!((node.folder_count, node.file_count), (0, 0));
        assert_eq!(content.folder_count(), 3);
    }
}
