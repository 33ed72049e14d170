//! Bincode snapshots of the in-memory tables.
//!
//! Snapshots are written to `.tmp_<name>` beside the target and renamed into
//! place, so a crash mid-write leaves the previous snapshot intact.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{SerializationError, StoreError, memory::Tables};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    tables: &'a Tables,
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    tables: Tables,
}

pub(crate) fn encode(tables: &Tables) -> crate::Result<Vec<u8>> {
    let snapshot = SnapshotRef {
        version: SNAPSHOT_VERSION,
        tables,
    };
    Ok(bincode::serde::encode_to_vec(
        &snapshot,
        bincode::config::legacy(),
    )?)
}

fn decode(bytes: &[u8]) -> crate::Result<Tables> {
    let (snapshot, _): (Snapshot, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::legacy())?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StoreError::Serialization(SerializationError::Version {
            found: snapshot.version,
            expected: SNAPSHOT_VERSION,
        }));
    }

    Ok(snapshot.tables)
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "snapshot".into(), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!(".tmp_{name}"))
}

/// Read the snapshot at `path`, or `None` if there is none yet.
pub(crate) async fn load(path: &Path) -> crate::Result<Option<Tables>> {
    match fs::read(path).await {
        Ok(bytes) => decode(&bytes).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> crate::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }

    let temp = temp_path(path);
    fs::write(&temp, bytes).await?;
    fs::rename(&temp, path).await?;

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Wrote store snapshot");
    Ok(())
}
