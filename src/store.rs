//! Load configuration lookup.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use log::debug;

use crate::{error::LoadError, model::LoadConfig, yaml_provider};

pub trait ConfigStore: Send + Sync {
    fn get_config(&self, id: &str) -> Result<LoadConfig, LoadError>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryConfigStore {
    configs: HashMap<String, LoadConfig>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        InMemoryConfigStore::default()
    }

    /// Registers `config` under its own id, replacing any earlier entry.
    pub fn insert(&mut self, config: LoadConfig) {
        self.configs.insert(config.id.clone(), config);
    }
}

impl FromIterator<LoadConfig> for InMemoryConfigStore {
    fn from_iter<I: IntoIterator<Item = LoadConfig>>(iter: I) -> Self {
        let mut store = InMemoryConfigStore::new();
        iter.into_iter().for_each(|config| store.insert(config));
        store
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn get_config(&self, id: &str) -> Result<LoadConfig, LoadError> {
        self.configs
            .get(id)
            .cloned()
            .ok_or_else(|| LoadError::ConfigNotFound(id.to_string()))
    }
}

/// Reads `<dir>/<id>.yaml` (or `.yml`) on every lookup.
#[derive(Debug, Clone)]
pub struct YamlConfigStore {
    dir: PathBuf,
}

impl YamlConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        YamlConfigStore { dir: dir.into() }
    }

    fn locate(&self, id: &str) -> Option<PathBuf> {
        let safe = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !safe {
            return None;
        }
        ["yaml", "yml"]
            .iter()
            .map(|ext| self.dir.join(format!("{id}.{ext}")))
            .find(|path| path.is_file())
    }
}

impl ConfigStore for YamlConfigStore {
    fn get_config(&self, id: &str) -> Result<LoadConfig, LoadError> {
        let path = self
            .locate(id)
            .ok_or_else(|| LoadError::ConfigNotFound(id.to_string()))?;
        debug!("Loading configuration '{id}' from {path:?}");
        let mut config = load_config_file(&path)?;
        if config.id.is_empty() {
            config.id = id.to_string();
        }
        Ok(config)
    }
}

/// Reads a single configuration document. The id defaults to the file stem.
pub fn load_config_file(path: &Path) -> Result<LoadConfig, LoadError> {
    let mut config: LoadConfig = yaml_provider::load_from_path(path)?;
    if config.id.is_empty()
        && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
    {
        config.id = stem.to_string();
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldMapping, LoadKind};
    use std::fs;
    use tempfile::tempdir;

    const ORDERS: &str = "table: orders\nkind: insert\nmappings:\n  - source_field: id\n    target_field: id\n";

    #[test]
    fn in_memory_store_is_keyed_by_id() {
        let mut config = LoadConfig::new("orders", LoadKind::Insert, vec![FieldMapping::new("id", "id")]);
        config.id = "orders".into();
        let store: InMemoryConfigStore = [config].into_iter().collect();
        assert_eq!(store.get_config("orders").unwrap().table, "orders");
        assert!(matches!(
            store.get_config("missing"),
            Err(LoadError::ConfigNotFound(id)) if id == "missing"
        ));
    }

    #[test]
    fn yaml_store_reads_by_file_name() {
        let dir = tempdir().expect("temp dir");
        fs::write(dir.path().join("orders.yml"), ORDERS).expect("write config");
        let store = YamlConfigStore::new(dir.path());
        let config = store.get_config("orders").unwrap();
        assert_eq!(config.id, "orders");
        assert_eq!(config.kind, LoadKind::Insert);
        assert!(matches!(
            store.get_config("../orders"),
            Err(LoadError::ConfigNotFound(_))
        ));
    }

    #[test]
    fn malformed_yaml_is_not_reported_as_missing() {
        let dir = tempdir().expect("temp dir");
        fs::write(dir.path().join("broken.yaml"), "table: [").expect("write config");
        let err = YamlConfigStore::new(dir.path())
            .get_config("broken")
            .unwrap_err();
        assert!(matches!(err, LoadError::Unknown(_)));
    }
}
