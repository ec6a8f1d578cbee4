//! Locks command - inspect and clear claim markers
//!
//! Claims left behind by a crashed worker are never recovered
//! automatically. Operators list them with their age and clear the ones they
//! know to be orphaned. Clearing a claim whose load is still running lets a
//! second load start on the same node.

use std::sync::Arc;

use anyhow::Context;
use arbor_ledger::LedgerStore;
use arbor_scheduler::{ClaimLock, HeldLock};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::cli::open_ledger_store;
use crate::cli::output::{format_age, format_timestamp, print_json, print_table};
use crate::config::ArborConfig;

#[derive(Debug)]
pub enum LocksAction {
    List {
        older_than_secs: Option<u64>,
        json: bool,
    },
    Clear {
        path: Option<String>,
        all: bool,
        older_than_secs: Option<u64>,
    },
}

#[derive(Debug, Clone, Serialize)]
struct LockRow {
    path: String,
    created_at: DateTime<Utc>,
    age_secs: i64,
}

/// Locks in `context` at least `older_than_secs` old.
pub async fn stale_locks(
    claims: &ClaimLock,
    context: &str,
    older_than_secs: Option<u64>,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<HeldLock>> {
    let held = claims.held(context).await.context("Failed to list locks")?;
    let min_age = older_than_secs.map(|secs| i64::try_from(secs).unwrap_or(i64::MAX));
    Ok(held
        .into_iter()
        .filter(|lock| min_age.map_or(true, |min| lock.age(now).num_seconds() >= min))
        .collect())
}

/// Release the given claims. Returns how many markers were actually removed.
pub async fn clear_locks(
    claims: &ClaimLock,
    context: &str,
    paths: &[String],
) -> anyhow::Result<usize> {
    let mut cleared = 0;
    for path in paths {
        let released = claims
            .release(context, path)
            .await
            .with_context(|| format!("Failed to clear lock on {}", path))?;
        if released {
            info!(path = %path, "Cleared lock");
            cleared += 1;
        } else {
            info!(path = %path, "No lock held");
        }
    }
    Ok(cleared)
}

pub async fn run(config: &ArborConfig, action: LocksAction) -> anyhow::Result<()> {
    let ledger: Arc<dyn LedgerStore> = open_ledger_store(&config.ledger.url).await?;
    let claims = ClaimLock::new(ledger);
    let context = config.scheduler.context.as_str();
    let now = Utc::now();

    match action {
        LocksAction::List {
            older_than_secs,
            json,
        } => {
            let locks = stale_locks(&claims, context, older_than_secs, now).await?;
            if json {
                let rows: Vec<LockRow> = locks
                    .iter()
                    .map(|lock| LockRow {
                        path: lock.path.clone(),
                        created_at: lock.created_at,
                        age_secs: lock.age(now).num_seconds(),
                    })
                    .collect();
                return print_json(&rows);
            }
            if locks.is_empty() {
                println!("No locks held.");
                return Ok(());
            }
            let rows = locks
                .iter()
                .map(|lock| {
                    vec![
                        lock.path.clone(),
                        format_timestamp(lock.created_at),
                        format_age(lock.age(now)),
                    ]
                })
                .collect();
            print_table(&["PATH", "CLAIMED AT", "AGE"], rows);
        }
        LocksAction::Clear {
            path,
            all,
            older_than_secs,
        } => {
            let paths = match (path, all) {
                (Some(path), false) => vec![path],
                (None, true) => stale_locks(&claims, context, older_than_secs, now)
                    .await?
                    .into_iter()
                    .map(|lock| lock.path)
                    .collect(),
                _ => anyhow::bail!("Give either a node path or --all"),
            };
            let cleared = clear_locks(&claims, context, &paths).await?;
            println!("Cleared {} lock(s).", cleared);
        }
    }
    Ok(())
}
