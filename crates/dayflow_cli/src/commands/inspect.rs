//! Inspect command implementation.

use dayflow_core::EntityKind;
use dayflow_store::{FileStore, LocalStore};
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Contents of one collection file.
#[derive(Debug, Serialize)]
pub struct CollectionStats {
    /// Entity kind.
    pub kind: EntityKind,
    /// File path.
    pub path: String,
    /// Number of entities.
    pub count: usize,
    /// Entity IDs, sorted.
    pub ids: Vec<String>,
}

/// Inspection result for one store directory.
#[derive(Debug, Serialize)]
pub struct InspectReport {
    /// Directory inspected.
    pub path: String,
    /// Per-kind contents.
    pub collections: Vec<CollectionStats>,
}

impl fmt::Display for InspectReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.path)?;
        for stats in &self.collections {
            writeln!(
                f,
                "  {:<10} {:>4}  {}",
                stats.kind.collection_name(),
                stats.count,
                stats.path
            )?;
            for id in &stats.ids {
                writeln!(f, "    {id}")?;
            }
        }
        Ok(())
    }
}

/// Runs the inspect command.
pub async fn run(path: &Path) -> Result<InspectReport, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No store directory at {}", path.display()).into());
    }

    let mut collections = Vec::new();
    for kind in EntityKind::ALL {
        let store = FileStore::open(path, kind)?;
        let mut ids: Vec<String> = store
            .get_all()
            .await?
            .into_iter()
            .map(|e| e.id.to_string())
            .collect();
        ids.sort();
        collections.push(CollectionStats {
            kind,
            path: store.path().display().to_string(),
            count: ids.len(),
            ids,
        });
    }

    Ok(InspectReport {
        path: path.display().to_string(),
        collections,
    })
}
