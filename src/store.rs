//! In-memory state store and its atomic snapshot persistence.

use crate::error::StorageError;
use crate::ports::StateStore;
use crate::state::NodeState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Thread-safe keyed store of the latest [`NodeState`] per node.
///
/// Cloning shares the underlying map, so UI readers and the projecting
/// writer can hold their own handles. Upserts replace the whole value under
/// the write lock — a reader observes either the pre-event or the post-event
/// state, never a mix.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    nodes: Arc<RwLock<HashMap<String, NodeState>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        MemoryStateStore::default()
    }

    /// Number of nodes currently tracked.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A poisoned lock only means another handle panicked mid-upsert; upserts
    // are whole-value, so the map itself is still coherent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, NodeState>> {
        self.nodes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, NodeState>> {
        self.nodes.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, node_id: &str) -> Option<NodeState> {
        self.read().get(node_id).cloned()
    }

    fn upsert(&self, state: NodeState) -> Result<(), StorageError> {
        self.write().insert(state.node_id.clone(), state);
        Ok(())
    }

    fn all(&self) -> Vec<NodeState> {
        let mut nodes: Vec<NodeState> = self.read().values().cloned().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.write().clear();
        Ok(())
    }
}

/// A persisted checkpoint of the projected state.
///
/// Written atomically (`.tmp` + rename) so a crash mid-write leaves the
/// previous snapshot intact. The checkpoint fields tie the node set to the
/// exact log position it was derived from:
///
/// ```text
/// $ cat state/nodes.snapshot.json | jq '{last_applied_sequence, hash}'
/// {
///   "last_applied_sequence": 42,
///   "hash": "a3f2e1b09c4d55aa"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Every node's state at the checkpoint, sorted by node id.
    pub nodes: Vec<NodeState>,

    /// Sequence of the last event folded in, 0 for an empty history.
    pub last_applied_sequence: u64,

    /// Hex-encoded xxh64 hash of that event's canonical JSON line.
    pub hash: String,
}

/// Save a snapshot atomically to disk.
///
/// Writes to a `.tmp` file first, syncs, then renames over the final path.
pub fn save_snapshot(path: &Path, snapshot: &StateSnapshot) -> Result<(), StorageError> {
    let tmp_path = path.with_extension("json.tmp");

    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_data()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load a snapshot from disk.
///
/// Returns `Ok(None)` if the file doesn't exist or doesn't parse — a corrupt
/// snapshot is treated as missing, which forces a rebuild from the log.
pub fn load_snapshot(path: &Path) -> Result<Option<StateSnapshot>, StorageError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_str(&contents) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(_) => Ok(None),
    }
}

/// Delete a snapshot file and its `.tmp` file if present. Idempotent.
pub fn delete_snapshot(path: &Path) -> Result<(), StorageError> {
    for candidate in [path.to_path_buf(), path.with_extension("json.tmp")] {
        match fs::remove_file(&candidate) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
