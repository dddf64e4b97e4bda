use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    pub storage_root: Option<PathBuf>,
    pub backup_root: Option<PathBuf>,
}

/// Storage and backup locations after flags, config file and defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roots {
    pub storage_root: PathBuf,
    pub backup_root: PathBuf,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        let config_path = config_dir.join("session-repair").join("config.toml");

        if !config_path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file at {}", path.display()))
    }

    /// Flags win over the config file, which wins over the defaults.
    pub fn resolve(
        &self,
        storage_flag: Option<PathBuf>,
        backup_flag: Option<PathBuf>,
    ) -> anyhow::Result<Roots> {
        let storage_root = match storage_flag.or_else(|| self.storage_root.clone()) {
            Some(path) => path,
            None => default_storage_root()?,
        };
        let backup_root = backup_flag
            .or_else(|| self.backup_root.clone())
            .unwrap_or_else(|| storage_root.join("repair-backups"));
        Ok(Roots {
            storage_root,
            backup_root,
        })
    }
}

fn default_storage_root() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().context("cannot determine home directory; pass --storage")?;
    Ok(home.join(".local/share/opencode/storage"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_keys() {
        let config: Config =
            toml::from_str("storage_root = \"/data/storage\"\nbackup_root = \"/data/bk\"\n")
                .unwrap();
        assert_eq!(config.storage_root, Some(PathBuf::from("/data/storage")));
        assert_eq!(config.backup_root, Some(PathBuf::from("/data/bk")));
    }

    #[test]
    fn flags_override_file() {
        let config = Config {
            storage_root: Some(PathBuf::from("/from/config")),
            backup_root: Some(PathBuf::from("/config/bk")),
        };
        let roots = config
            .resolve(Some(PathBuf::from("/from/flag")), None)
            .unwrap();
        assert_eq!(roots.storage_root, PathBuf::from("/from/flag"));
        assert_eq!(roots.backup_root, PathBuf::from("/config/bk"));
    }

    #[test]
    fn backup_root_defaults_under_storage_root() {
        let roots = Config::default()
            .resolve(Some(PathBuf::from("/s")), None)
            .unwrap();
        assert_eq!(roots.backup_root, PathBuf::from("/s/repair-backups"));
    }

    #[test]
    fn unknown_shape_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "storage_root = 7").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
