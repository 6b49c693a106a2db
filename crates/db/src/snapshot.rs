//! On-disk JSON snapshot of the whole engine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::attribute::Item;
use crate::error::Result;
use crate::table::TableDefinition;

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub tables: Vec<TableSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TableSnapshot {
    pub definition: TableDefinition,
    pub created_at: String,
    pub items: Vec<Item>,
}

/// `None` when no snapshot has been written yet.
pub(crate) async fn load(path: &Path) -> Result<Option<Snapshot>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Write to a sibling temp file, then rename over the target.
pub(crate) async fn write(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let bytes = serde_json::to_vec_pretty(snapshot)?;
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "snapshot".into());
    name.push(".tmp");
    path.with_file_name(name)
}
