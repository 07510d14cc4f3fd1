//! Loads [`Config`] from a YAML file and exposes a hot-reloadable snapshot.
//!
//! Only `instructions`, `access`, `security.tool_guard`, `heartbeat` and
//! `token_budget` are meant to change across a reload (spec §6); callers
//! that need the other fields should re-resolve any derived state (model
//! clients, workspace tables) on restart rather than trusting a reload to
//! update them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::schema::Config;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to watch config file: {0}")]
    Watch(String),
}

fn load_from_path(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Holds the live [`Config`] snapshot and reloads it when the backing file
/// changes on disk.
pub struct ConfigLoader {
    path: PathBuf,
    current: Arc<ArcSwap<Config>>,
    // Kept alive for the loader's lifetime; dropping it stops the watch.
    _watcher: Option<RecommendedWatcher>,
}

impl ConfigLoader {
    /// Load `path`, failing if it does not exist or does not parse.
    pub fn load(path: PathBuf) -> Result<Arc<Self>, ConfigError> {
        let config = load_from_path(&path)?;
        Ok(Arc::new(Self {
            path,
            current: Arc::new(ArcSwap::from_pointee(config)),
            _watcher: None,
        }))
    }

    /// Load `path` if present, else fall back to [`Config::default`].
    pub fn load_or_default(path: PathBuf) -> Arc<Self> {
        let config = load_from_path(&path).unwrap_or_default();
        Arc::new(Self {
            path,
            current: Arc::new(ArcSwap::from_pointee(config)),
            _watcher: None,
        })
    }

    /// Load `path` (or defaults) and start watching it for changes in one
    /// step, so the returned loader already owns its watcher.
    pub fn load_or_default_watched(path: PathBuf) -> Result<Arc<Self>, ConfigError> {
        let config = load_from_path(&path).unwrap_or_default();
        let current = Arc::new(ArcSwap::from_pointee(config));
        let watched = current.clone();
        let watch_path = path.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res
                && matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
            {
                match load_from_path(&watch_path) {
                    Ok(config) => {
                        watched.store(Arc::new(config));
                        tracing::info!(path = %watch_path.display(), "config reloaded");
                    }
                    Err(err) => {
                        tracing::warn!(%err, "config reload failed, keeping previous snapshot");
                    }
                }
            }
        })
        .map_err(|e| ConfigError::Watch(e.to_string()))?;

        let watch_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::Watch(e.to_string()))?;

        Ok(Arc::new(Self {
            path,
            current,
            _watcher: Some(watcher),
        }))
    }

    /// Current configuration snapshot.
    pub fn get(&self) -> Arc<Config> {
        self.current.load_full()
    }

    /// Path the config was (or will be) loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Default config file location: `$XDG_CONFIG_HOME/corvid/config.yaml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let dirs = directories::ProjectDirs::from("", "", "corvid")
        .ok_or_else(|| ConfigError::Watch("could not determine config directory".to_string()))?;
    Ok(dirs.config_dir().join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "assistant_name: Test\n").unwrap();

        let loader = ConfigLoader::load(path).unwrap();
        assert_eq!(loader.get().assistant_name, "Test");
    }

    #[test]
    fn load_or_default_falls_back_on_missing_file() {
        let loader = ConfigLoader::load_or_default(PathBuf::from("/nonexistent/config.yaml"));
        assert_eq!(loader.get().assistant_name, "Corvid");
    }

    #[test]
    fn load_fails_on_missing_file() {
        let result = ConfigLoader::load(PathBuf::from("/nonexistent/config.yaml"));
        assert!(result.is_err());
    }
}
