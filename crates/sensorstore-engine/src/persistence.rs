//! Store snapshot persistence.
//!
//! Whole-store save/load to a single binary file: an eight-byte magic, a
//! little-endian format version, then the bincode-encoded store. This is a
//! snapshot facility, not transactional durability — the owning process
//! decides when a consistent point has been reached.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::anyhow;

use crate::error::{Result, StoreError};
use crate::store::{ObservationStore, StoreInner};

const SNAPSHOT_MAGIC: &[u8; 8] = b"SENSTORE";
const SNAPSHOT_VERSION: u32 = 1;

fn snapshot_err(operation: &'static str) -> impl FnOnce(anyhow::Error) -> StoreError {
    move |source| StoreError::Snapshot { operation, source }
}

/// Write the whole store to `path`, replacing any existing snapshot.
pub fn save_snapshot(store: &ObservationStore, path: &Path) -> Result<()> {
    let session = store.session();
    let inner = session.read();
    let payload = bincode::serialize(&*inner)
        .map_err(|e| snapshot_err("encode")(anyhow!(e)))?;

    let mut file = File::create(path).map_err(|e| snapshot_err("create")(anyhow!(e)))?;
    file.write_all(SNAPSHOT_MAGIC)
        .and_then(|_| file.write_all(&SNAPSHOT_VERSION.to_le_bytes()))
        .and_then(|_| file.write_all(&payload))
        .and_then(|_| file.sync_data())
        .map_err(|e| snapshot_err("write")(anyhow!(e)))?;

    tracing::debug!(path = %path.display(), bytes = payload.len(), "saved store snapshot");
    Ok(())
}

/// Load a snapshot written by [`save_snapshot`].
pub fn load_snapshot(path: &Path) -> Result<ObservationStore> {
    let mut file = File::open(path).map_err(|e| snapshot_err("open")(anyhow!(e)))?;

    let mut magic = [0u8; 8];
    file.read_exact(&mut magic)
        .map_err(|e| snapshot_err("read")(anyhow!(e)))?;
    if &magic != SNAPSHOT_MAGIC {
        return Err(snapshot_err("read")(anyhow!("not a sensorstore snapshot")));
    }
    let mut version = [0u8; 4];
    file.read_exact(&mut version)
        .map_err(|e| snapshot_err("read")(anyhow!(e)))?;
    let version = u32::from_le_bytes(version);
    if version != SNAPSHOT_VERSION {
        return Err(snapshot_err("read")(anyhow!(
            "unsupported snapshot version {version}, expected {SNAPSHOT_VERSION}"
        )));
    }

    let mut payload = Vec::new();
    file.read_to_end(&mut payload)
        .map_err(|e| snapshot_err("read")(anyhow!(e)))?;
    let inner: StoreInner =
        bincode::deserialize(&payload).map_err(|e| snapshot_err("decode")(anyhow!(e)))?;

    tracing::debug!(path = %path.display(), "loaded store snapshot");
    Ok(ObservationStore::from_inner(inner))
}
