use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use topolink_algo::RepairConfig;
use topolink_core::{TopoError, TopoResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot backing the store; created on first save.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("topolink-store.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    /// Ingest worker threads, 0 for one per CPU.
    pub workers: usize,
    pub delete_processed: bool,
    /// Base URL of the "feeder updated" endpoint; no notification when unset.
    pub update_url: Option<String>,
    pub default_owner: String,
    pub repair: RepairConfig,
    pub node_suffix_width: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            workers: 0,
            delete_processed: false,
            update_url: None,
            default_owner: "350000".to_string(),
            repair: RepairConfig::default(),
            node_suffix_width: 4,
        }
    }
}

impl AppConfig {
    /// Reject values the passes cannot run with.
    pub fn validate(&self) -> TopoResult<()> {
        if self.node_suffix_width == 0 {
            return Err(TopoError::Config(
                "node_suffix_width must be at least 1".to_string(),
            ));
        }
        if self.repair.max_node_degree == 0 {
            return Err(TopoError::Config(
                "repair.max_node_degree must be at least 1".to_string(),
            ));
        }
        if self.store.path.as_os_str().is_empty() {
            return Err(TopoError::Config("store.path is empty".to_string()));
        }
        Ok(())
    }
}

pub fn load_config_from_path(path: &Path) -> Result<AppConfig> {
    let config = parse_config(path)?;
    config
        .validate()
        .with_context(|| format!("validating config '{}'", path.display()))?;
    Ok(config)
}

fn parse_config(path: &Path) -> Result<AppConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading config '{}'", path.display()))?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
            serde_yaml::from_str(&data).context("parsing config yaml")
        }
        Some(ext) if ext.eq_ignore_ascii_case("json") => {
            serde_json::from_str(&data).context("parsing config json")
        }
        _ => serde_yaml::from_str(&data)
            .or_else(|_| serde_json::from_str(&data))
            .context("parsing config"),
    }
}

/// Load `path`, falling back to defaults when the file does not exist.
pub fn load_or_default(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        load_config_from_path(path)
    } else {
        Ok(AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        fs::write(
            &path,
            "store:\n  path: /var/lib/topolink/store.json\nworkers: 3\nrepair:\n  max_iterations: 10\n",
        )
        .unwrap();

        let config = load_config_from_path(&path).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/var/lib/topolink/store.json"));
        assert_eq!(config.workers, 3);
        assert_eq!(config.repair.max_iterations, 10);
        assert_eq!(config.repair.max_node_degree, 4);
        assert_eq!(config.default_owner, "350000");
        assert!(config.update_url.is_none());
    }

    #[test]
    fn json_config_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.json");
        fs::write(&path, r#"{"update_url": "http://localhost:8080/feeder", "node_suffix_width": 6}"#)
            .unwrap();
        let config = load_config_from_path(&path).unwrap();
        assert_eq!(config.update_url.as_deref(), Some("http://localhost:8080/feeder"));
        assert_eq!(config.node_suffix_width, 6);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(load_config_from_path(&dir.path().join("absent.yaml")).is_err());
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        fs::write(&path, "workers: [not, a, number]\n").unwrap();
        assert!(load_config_from_path(&path).is_err());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let config = AppConfig {
            node_suffix_width: 0,
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(TopoError::Config(_))));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        fs::write(&path, "repair:\n  max_node_degree: 0\n").unwrap();
        let err = load_config_from_path(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_node_degree"));
        assert!(AppConfig::default().validate().is_ok());
    }
}
