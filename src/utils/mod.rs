pub mod naming;

use std::path::{Path, PathBuf};

/// Resolves a configured path: relative paths live below `storage_root`, others are used as given.
pub fn resolve_path(storage_root: &Path, path: &str, is_relative: bool) -> PathBuf {
    if is_relative {
        storage_root.join(path.trim_start_matches(['/', '\\']))
    } else {
        PathBuf::from(path)
    }
}
