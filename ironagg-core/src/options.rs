// ironagg-core/src/options.rs
// $group execution options: memory budget, spilling, sort-key sharing

use serde::Deserialize;
use std::path::PathBuf;

/// Default `$group` memory budget (100 MiB)
pub const DEFAULT_MAX_MEMORY_BYTES: usize = 100 * 1024 * 1024;

/// Options for one `$group` execution
///
/// Loadable from JSON with camelCase keys, e.g.
/// `{"maxMemoryBytes": 1048576, "allowDiskUse": true}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct GroupOptions {
    /// Approximate bytes of group state held in memory before spilling
    pub max_memory_bytes: usize,

    /// Spill to temporary files instead of failing when over budget
    pub allow_disk_use: bool,

    /// Directory for spill files; the system temp dir when unset
    pub spill_dir: Option<PathBuf>,

    /// Share one selector among accumulators with equivalent sort specifications
    pub share_sort_keys: bool,
}

impl Default for GroupOptions {
    fn default() -> Self {
        GroupOptions {
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            allow_disk_use: false,
            spill_dir: None,
            share_sort_keys: true,
        }
    }
}

impl GroupOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    pub fn with_allow_disk_use(mut self, allow: bool) -> Self {
        self.allow_disk_use = allow;
        self
    }

    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = Some(dir.into());
        self
    }

    pub fn with_share_sort_keys(mut self, share: bool) -> Self {
        self.share_sort_keys = share;
        self
    }
}
