use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Store settings, as read from `litestore.toml`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file; `:memory:` or absent for an in-memory store
    pub database: Option<String>,
    /// Emit every statement with its parameters
    pub debug: bool,
    /// Upper bound on cached instances (unbounded when absent)
    pub cache_capacity: Option<usize>,
    pub vacuum_on_close: bool,
    /// Register entity types on first use
    pub auto_register: bool,
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("litestore.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".litestore").join("litestore.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<StoreConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: StoreConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &StoreConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(load_config(Some(path.as_path())).unwrap().is_none());
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("litestore.toml");
        let config = StoreConfig {
            database: Some("data/app.db".to_string()),
            debug: true,
            cache_capacity: Some(128),
            ..StoreConfig::default()
        };

        write_config(&path, &config, false).unwrap();
        assert_eq!(load_config(Some(path.as_path())).unwrap(), Some(config.clone()));

        assert!(write_config(&path, &config, false).is_err());
        write_config(&path, &StoreConfig::default(), true).unwrap();
        assert_eq!(load_config(Some(path.as_path())).unwrap(), Some(StoreConfig::default()));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: StoreConfig = toml::from_str("debug = true\n").unwrap();
        assert!(config.debug);
        assert!(config.database.is_none());
        assert!(!config.vacuum_on_close);
    }

    #[test]
    fn test_ensure_db_dir_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let db = default_database_path_in(dir.path());
        ensure_db_dir(&db).unwrap();
        assert!(db.parent().unwrap().is_dir());
    }
}
