//! Project configuration, loaded from `stratum.toml` at the project root.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub const CONFIG_FILENAME: &str = "stratum.toml";
pub const DEFAULT_MODELS_PATH: &str = "models";
pub const DEFAULT_MIGRATIONS_PATH: &str = "migrations";
pub const DEFAULT_LEDGER_PATH: &str = ".stratum/ledger.db";

fn default_project_name() -> String {
    "my-graph".to_string()
}

fn default_models_path() -> String {
    DEFAULT_MODELS_PATH.to_string()
}

fn default_migrations_path() -> String {
    DEFAULT_MIGRATIONS_PATH.to_string()
}

fn default_ledger_path() -> String {
    DEFAULT_LEDGER_PATH.to_string()
}

fn default_graph_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_graph_username() -> String {
    "neo4j".to_string()
}

/// Connection settings for the live graph database. Values can be
/// overridden with `STRATUM_GRAPH_URI`, `STRATUM_GRAPH_USERNAME`, and
/// `STRATUM_GRAPH_PASSWORD`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_graph_uri")]
    pub uri: String,
    #[serde(default = "default_graph_username")]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: default_graph_uri(),
            username: default_graph_username(),
            password: String::new(),
        }
    }
}

impl GraphConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(uri) = env::var("STRATUM_GRAPH_URI") {
            self.uri = uri;
        }
        if let Ok(username) = env::var("STRATUM_GRAPH_USERNAME") {
            self.username = username;
        }
        if let Ok(password) = env::var("STRATUM_GRAPH_PASSWORD") {
            self.password = password;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    project: ProjectSection,
    #[serde(default)]
    graph: GraphConfig,
    #[serde(default)]
    ledger: LedgerSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProjectSection {
    #[serde(default = "default_project_name")]
    name: String,
    #[serde(default = "default_models_path")]
    models_path: String,
    #[serde(default = "default_migrations_path")]
    migrations_path: String,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            name: default_project_name(),
            models_path: default_models_path(),
            migrations_path: default_migrations_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerSection {
    #[serde(default = "default_ledger_path")]
    path: String,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

/// Resolved project configuration.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub project_name: String,
    pub models_path: String,
    pub migrations_path: String,
    pub ledger_path: String,
    pub graph: GraphConfig,
    pub project_root: PathBuf,
}

impl ProjectConfig {
    pub fn new(project_name: &str, project_root: &Path) -> Self {
        Self {
            project_name: project_name.to_string(),
            models_path: default_models_path(),
            migrations_path: default_migrations_path(),
            ledger_path: default_ledger_path(),
            graph: GraphConfig::default(),
            project_root: project_root.to_path_buf(),
        }
    }

    pub fn models_dir(&self) -> PathBuf {
        self.project_root.join(&self.models_path)
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.project_root.join(&self.migrations_path)
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.project_root.join(&self.ledger_path)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.project_root.join(".stratum").join("cache")
    }

    /// Write the configuration to `stratum.toml` under the project root.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let file = ConfigFile {
            project: ProjectSection {
                name: self.project_name.clone(),
                models_path: self.models_path.clone(),
                migrations_path: self.migrations_path.clone(),
            },
            graph: self.graph.clone(),
            ledger: LedgerSection {
                path: self.ledger_path.clone(),
            },
        };
        let target = self.project_root.join(CONFIG_FILENAME);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, toml::to_string(&file)?)?;
        Ok(target)
    }
}

/// Walk up from `start` looking for `stratum.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf, ConfigError> {
    let mut current = start
        .canonicalize()
        .map_err(|_| ConfigError::NotInitialized(start.to_path_buf()))?;
    loop {
        if current.join(CONFIG_FILENAME).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(ConfigError::NotInitialized(start.to_path_buf()));
        }
    }
}

/// Load the project configuration from `project_root`, or discover the root
/// by walking up from the current directory.
pub fn load_config(project_root: Option<&Path>) -> Result<ProjectConfig, ConfigError> {
    let root = match project_root {
        Some(root) => root.to_path_buf(),
        None => find_project_root(Path::new("."))?,
    };
    let config_path = root.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Err(ConfigError::NotInitialized(root));
    }

    let raw = fs::read_to_string(&config_path)?;
    let file: ConfigFile = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: config_path,
        source,
    })?;

    let mut graph = file.graph;
    graph.apply_env_overrides();

    Ok(ProjectConfig {
        project_name: file.project.name,
        models_path: file.project.models_path,
        migrations_path: file.project.migrations_path,
        ledger_path: file.ledger.path,
        graph,
        project_root: root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = ProjectConfig::new("test-graph", dir.path());
        config.migrations_path = "db/migrations".to_string();
        config.save().expect("save");

        let loaded = load_config(Some(dir.path())).expect("load");
        assert_eq!(loaded.project_name, "test-graph");
        assert_eq!(loaded.migrations_path, "db/migrations");
        assert_eq!(loaded.ledger_path, DEFAULT_LEDGER_PATH);
    }

    #[test]
    fn find_root_walks_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ProjectConfig::new("walk-up", dir.path());
        config.save().expect("save");

        let nested = dir.path().join("a/b/c");
        fs::create_dir_all(&nested).expect("mkdir");
        let found = find_project_root(&nested).expect("find root");
        assert_eq!(
            found.canonicalize().expect("canon"),
            dir.path().canonicalize().expect("canon")
        );
    }

    #[test]
    fn missing_config_is_not_initialized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_config(Some(dir.path())).expect_err("should fail");
        assert!(matches!(err, ConfigError::NotInitialized(_)));
    }
}
