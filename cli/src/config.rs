use anyhow::{Context, Result};
use directories::ProjectDirs;
use fleetlog_core::merge::MergeStrategy;
use std::path::{Path, PathBuf};

pub const ENV_DATA_DIR: &str = "FLEETLOG_DATA_DIR";
pub const ENV_REMOTE_URL: &str = "FLEETLOG_REMOTE_URL";
pub const ENV_API_KEY: &str = "FLEETLOG_API_KEY";
pub const ENV_SYNC_STRATEGY: &str = "FLEETLOG_SYNC_STRATEGY";

pub struct Config {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub legacy_path: PathBuf,
    pub identity_path: PathBuf,
    pub server_db_path: PathBuf,
    pub remote_url: Option<String>,
    pub remote_api_key: Option<String>,
    pub sync_strategy: MergeStrategy,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let data_dir = match env(ENV_DATA_DIR).filter(|d| !d.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => ProjectDirs::from("", "", "fleetlog")
                .context("Could not determine home directory")?
                .data_dir()
                .to_path_buf(),
        };
        Self::from_dir(data_dir, &env)
    }

    /// Resolve every path under `data_dir`, reading overrides through `env`.
    pub fn from_dir(data_dir: PathBuf, env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let remote_url = setting(env, ENV_REMOTE_URL, &data_dir.join("remote_url"))?
            .map(|url| url.trim_end_matches('/').to_string());
        let remote_api_key = setting(env, ENV_API_KEY, &data_dir.join("remote_api_key"))?;
        let sync_strategy = match env(ENV_SYNC_STRATEGY).filter(|s| !s.trim().is_empty()) {
            Some(value) => value
                .parse()
                .with_context(|| format!("Invalid {ENV_SYNC_STRATEGY}"))?,
            None => MergeStrategy::default(),
        };

        Ok(Config {
            db_path: data_dir.join("fleetlog.db"),
            legacy_path: data_dir.join("legacy_store.json"),
            identity_path: data_dir.join("identity"),
            server_db_path: data_dir.join("server.db"),
            remote_url,
            remote_api_key,
            sync_strategy,
            data_dir,
        })
    }

    /// Load the API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)` where `newly_created` is true when a
    /// fresh key was just generated (first run).
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if let Some(key) = read_trimmed(&path)? {
            return Ok((key, false));
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        eprintln!("Generated new API key: {key}");
        eprintln!("Clients use it via {ENV_API_KEY} or the remote_api_key file");
        Ok((key, true))
    }
}

/// Environment variable first, then the file in the data directory.
fn setting(
    env: &dyn Fn(&str) -> Option<String>,
    key: &str,
    file: &Path,
) -> Result<Option<String>> {
    if let Some(value) = env(key).map(|v| v.trim().to_string()) {
        if !value.is_empty() {
            return Ok(Some(value));
        }
    }
    read_trimmed(file)
}

fn read_trimmed(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let value = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = value.trim();
    Ok((!value.is_empty()).then(|| value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_paths_live_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_dir(dir.path().join("nested"), &env_of(&[])).unwrap();
        assert!(config.data_dir.exists());
        assert_eq!(config.db_path, dir.path().join("nested/fleetlog.db"));
        assert_eq!(config.legacy_path, dir.path().join("nested/legacy_store.json"));
        assert!(config.remote_url.is_none());
        assert_eq!(config.sync_strategy, MergeStrategy::PerRecord);
    }

    #[test]
    fn test_remote_settings_fall_back_to_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("remote_url"), "http://files:8080/\n").unwrap();
        std::fs::write(dir.path().join("remote_api_key"), "from-file").unwrap();

        let config = Config::from_dir(dir.path().to_path_buf(), &env_of(&[])).unwrap();
        assert_eq!(config.remote_url.as_deref(), Some("http://files:8080"));
        assert_eq!(config.remote_api_key.as_deref(), Some("from-file"));

        let env = env_of(&[(ENV_REMOTE_URL, "http://env:9000"), (ENV_API_KEY, "  ")]);
        let config = Config::from_dir(dir.path().to_path_buf(), &env).unwrap();
        assert_eq!(config.remote_url.as_deref(), Some("http://env:9000"));
        assert_eq!(config.remote_api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_sync_strategy_from_env() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_of(&[(ENV_SYNC_STRATEGY, "snapshot")]);
        let config = Config::from_dir(dir.path().to_path_buf(), &env).unwrap();
        assert_eq!(config.sync_strategy, MergeStrategy::WholeSnapshot);

        let env = env_of(&[(ENV_SYNC_STRATEGY, "coin-flip")]);
        assert!(Config::from_dir(dir.path().to_path_buf(), &env).is_err());
    }

    #[test]
    fn test_api_key_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_dir(dir.path().to_path_buf(), &env_of(&[])).unwrap();
        let (key, created) = config.load_or_create_api_key().unwrap();
        assert!(created);
        assert_eq!(key.len(), 64);
        let (again, created) = config.load_or_create_api_key().unwrap();
        assert!(!created);
        assert_eq!(again, key);
    }
}
