//! Hot-reload wrapper for the fusion config file.
//!
//! On each `current()` call we check the file's modified time and reload if
//! changed. A file that fails to parse keeps the last good config.

use parking_lot::RwLock;
use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing::{info, warn};

use super::FusionConfig;

#[derive(Debug)]
pub struct HotReloadConfig {
    path: PathBuf,
    inner: RwLock<State>,
}

#[derive(Debug)]
struct State {
    config: FusionConfig,
    last_modified: Option<SystemTime>,
}

impl HotReloadConfig {
    /// Create with a path (defaults to `RANKFUSE_CONFIG_PATH` / "config/fusion.toml" if `None`).
    pub fn new(path: Option<&Path>) -> Self {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(super::config_path_from_env);
        Self {
            path,
            inner: RwLock::new(State {
                config: FusionConfig::default(),
                last_modified: None,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest config, reloading if the file changed.
    pub fn current(&self) -> FusionConfig {
        let mtime = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            // If file isn't there, we keep what we have.
            Err(_) => return self.inner.read().config.clone(),
        };

        if self.inner.read().last_modified == Some(mtime) {
            return self.inner.read().config.clone();
        }

        let mut guard = self.inner.write();
        // Double-check in case another caller reloaded meanwhile.
        if guard.last_modified != Some(mtime) {
            match FusionConfig::load_from_file(&self.path) {
                Ok(mut cfg) => {
                    cfg.apply_env_overrides();
                    guard.config = cfg;
                    info!(target: "rankfuse::config", path = %self.path.display(), "fusion config reloaded");
                }
                Err(e) => {
                    warn!(target: "rankfuse::config", error = ?e, "fusion config reload failed; keeping previous");
                }
            }
            guard.last_modified = Some(mtime);
        }
        guard.config.clone()
    }
}
