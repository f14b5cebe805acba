//! Fixed disk set and naming.
//!
//! The runtime assigns each physical disk one local storage directory. This
//! module turns that directory list into the scheduler's view of the world:
//! a dense set of [`DiskId`]s, the directory behind each id, and a
//! human-readable disk name derived from the directory's mount component
//! (used for thread names and load reporting).
//!
//! The set is fixed at construction and never changes for the lifetime of
//! the scheduler. Placement code that produces an id outside the set is a
//! bug in that placement policy; lookups return `None` so the caller can
//! fail the task instead of crashing.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

// ============================================================================
// DiskId
// ============================================================================

/// Identifier for one physical disk.
///
/// Ids are dense indices into the [`DiskMap`] that created them; they are
/// meaningless across different maps. `u32::MAX` is reserved as the
/// no-winner sentinel of the replicated-write claim, so a map never hands
/// out that value (no real deployment approaches it).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DiskId(u32);

impl DiskId {
    /// Create a disk id from a raw index (for placement code and tests).
    pub fn from_raw(raw: u32) -> Self {
        DiskId(raw)
    }

    /// Get the raw index value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for DiskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// DiskMap
// ============================================================================

struct DiskEntry {
    dir: PathBuf,
    name: Arc<str>,
}

/// The fixed set of known disks: one storage directory per physical disk.
///
/// Names come from the leading path component of each directory (the mount
/// point by runtime convention, e.g. `/mnt2/storage/...` names the disk
/// `mnt2`). Duplicate names get an index suffix so the load snapshot keys
/// stay distinct.
pub struct DiskMap {
    entries: Vec<DiskEntry>,
}

impl DiskMap {
    /// Build the disk set from the runtime's local storage directories.
    ///
    /// # Panics
    ///
    /// Panics if `local_dirs` is empty; a scheduler with zero disks cannot
    /// place anything.
    pub fn new(local_dirs: Vec<PathBuf>) -> Self {
        assert!(!local_dirs.is_empty(), "local_dirs must not be empty");

        let mut entries = Vec::with_capacity(local_dirs.len());
        let mut used: Vec<Arc<str>> = Vec::with_capacity(local_dirs.len());
        for (idx, dir) in local_dirs.into_iter().enumerate() {
            let base = mount_component(&dir);
            let name: Arc<str> = if used.iter().any(|n| **n == *base) {
                Arc::from(format!("{base}-{idx}").as_str())
            } else {
                Arc::from(base.as_str())
            };
            used.push(Arc::clone(&name));
            entries.push(DiskEntry { dir, name });
        }

        DiskMap { entries }
    }

    /// Number of known disks.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// A `DiskMap` is never empty; kept for API completeness.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over every known disk id, in index order.
    pub fn ids(&self) -> impl Iterator<Item = DiskId> {
        (0..self.entries.len() as u32).map(DiskId)
    }

    /// Whether `id` belongs to this set.
    #[inline]
    pub fn contains(&self, id: DiskId) -> bool {
        id.index() < self.entries.len()
    }

    /// Storage directory for `id`, or `None` for an id outside the set.
    pub fn dir(&self, id: DiskId) -> Option<&Path> {
        self.entries.get(id.index()).map(|e| e.dir.as_path())
    }

    /// Human-readable disk name for `id`, or `None` for an id outside the set.
    pub fn name(&self, id: DiskId) -> Option<&str> {
        self.entries.get(id.index()).map(|e| &*e.name)
    }

    pub(crate) fn name_arc(&self, id: DiskId) -> Option<Arc<str>> {
        self.entries.get(id.index()).map(|e| Arc::clone(&e.name))
    }
}

/// First normal path component, or `root` for `/` and friends.
fn mount_component(path: &Path) -> String {
    for comp in path.components() {
        if let Component::Normal(part) = comp {
            return part.to_string_lossy().into_owned();
        }
    }
    String::from("root")
}

// ============================================================================
// Tests
// ============================================================================
