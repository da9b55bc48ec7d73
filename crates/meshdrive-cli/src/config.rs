//! Default on-disk locations for a node's persisted boot state.
//!
//! The node itself only knows how to load/save a `meshdrive_core::SaveData`
//! from an explicit path (§3 "Save data" in the design); this module
//! supplies the CLI-level convention for where that file lives when the
//! user does not pass `--save-data` explicitly.

use std::path::PathBuf;

use anyhow::{Context, Result};

/// The directory meshdrive keeps its per-node state in, unless overridden.
///
/// Resolves to the OS config directory (`~/.config/meshdrive` on Linux, the
/// platform equivalent elsewhere), following the same `dirs`-crate
/// convention the teacher's CLI used for its own config directory.
pub fn default_state_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("meshdrive"))
        .context("could not determine the OS config directory")
}

/// Where the boot save-data file lives by default: `<state_dir>/save-data.json`.
pub fn default_save_data_path() -> Result<PathBuf> {
    Ok(default_state_dir()?.join("save-data.json"))
}

/// Where the watched/synced directory lives by default: `<state_dir>/watch`.
pub fn default_watch_path() -> Result<PathBuf> {
    Ok(default_state_dir()?.join("watch"))
}

/// Where the log-store backing directory lives by default: `<state_dir>/store`.
pub fn default_corestore_path() -> Result<PathBuf> {
    Ok(default_state_dir()?.join("store"))
}
