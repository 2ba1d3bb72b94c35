//! On-disk JSON snapshot of the store.

use crate::error::{CoreError, Result};
use crate::model::Resource;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub(crate) const SNAPSHOT_VERSION: u32 = 1;

/// Snapshot file layout. Resources are written in insertion order.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Snapshot {
    pub version: u32,
    pub resources: Vec<Resource>,
}

/// Read a snapshot, returning `None` if the file does not exist.
pub(crate) async fn load(path: &Path) -> Result<Option<Snapshot>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
    if snapshot.version != SNAPSHOT_VERSION {
        tracing::error!(
            path = %path.display(),
            found = snapshot.version,
            expected = SNAPSHOT_VERSION,
            "Refusing to load snapshot"
        );
        return Err(CoreError::Conflict(format!(
            "snapshot {} has version {}, expected {}",
            path.display(),
            snapshot.version,
            SNAPSHOT_VERSION
        )));
    }
    Ok(Some(snapshot))
}

/// Write bytes next to `path` and rename over it.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
