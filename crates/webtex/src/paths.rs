//! Resolves where webtex keeps its configuration, honouring the
//! `WEBTEX_CONFIG_DIR` override before the platform default.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use bridgeconfig::BridgeConfig;
use directories_next::ProjectDirs;

pub const ENV_CONFIG_DIR: &str = "WEBTEX_CONFIG_DIR";
pub const CONFIG_FILE_NAME: &str = "webtex.toml";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "webtex";
const APPLICATION: &str = "webtex";

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
    from_env: bool,
}

impl AppPaths {
    pub fn discover() -> Result<Self> {
        if let Some(config_dir) = env_override(ENV_CONFIG_DIR) {
            return Ok(Self {
                config_dir,
                from_env: true,
            });
        }

        let project_dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
            .ok_or_else(|| anyhow!("failed to determine user directories"))?;
        Ok(Self {
            config_dir: project_dirs.config_dir().to_path_buf(),
            from_env: false,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    pub fn overridden(&self) -> bool {
        self.from_env
    }
}

/// Loads `explicit` if given, else the default config file when it exists,
/// else built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<(BridgeConfig, Option<PathBuf>)> {
    if let Some(path) = explicit {
        return Ok((BridgeConfig::load(path)?, Some(path.to_path_buf())));
    }

    let candidate = AppPaths::discover()?.config_file();
    if candidate.is_file() {
        let config = BridgeConfig::load(&candidate)?;
        return Ok((config, Some(candidate)));
    }

    tracing::debug!(path = %candidate.display(), "no config file; using defaults");
    Ok((BridgeConfig::default(), None))
}

fn env_override(name: &str) -> Option<PathBuf> {
    match env::var_os(name) {
        Some(value) if !value.as_os_str().is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::fs;
    use std::sync::{Mutex, OnceLock};
    use tempfile::TempDir;

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    struct EnvGuard {
        key: &'static str,
        previous: Option<OsString>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &Path) -> Self {
            let previous = env::var_os(key);
            env::set_var(key, value);
            Self { key, previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = self.previous.take() {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    #[test]
    fn env_override_takes_precedence() {
        let _guard = env_lock().lock().unwrap();
        let root = TempDir::new().unwrap();
        let _config_guard = EnvGuard::set(ENV_CONFIG_DIR, root.path());

        let paths = AppPaths::discover().unwrap();
        assert!(paths.overridden());
        assert_eq!(paths.config_dir(), root.path());
        assert_eq!(paths.config_file(), root.path().join(CONFIG_FILE_NAME));
    }

    #[test]
    fn missing_default_file_uses_defaults() {
        let _guard = env_lock().lock().unwrap();
        let root = TempDir::new().unwrap();
        let _config_guard = EnvGuard::set(ENV_CONFIG_DIR, root.path());

        let (config, source) = load_config(None).unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(source, None);
    }

    #[test]
    fn default_file_is_picked_up() {
        let _guard = env_lock().lock().unwrap();
        let root = TempDir::new().unwrap();
        let _config_guard = EnvGuard::set(ENV_CONFIG_DIR, root.path());
        fs::write(root.path().join(CONFIG_FILE_NAME), "version = 1\n[handoff]\ncapacity = 2\n").unwrap();

        let (config, source) = load_config(None).unwrap();
        assert_eq!(config.handoff.capacity, 2);
        assert_eq!(source, Some(root.path().join(CONFIG_FILE_NAME)));
    }
}
