use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the engine fronts; relative request URLs resolve against it.
  pub origin: String,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  /// Path to the offline-fallback document (built-in placeholder if unset)
  pub fallback_page: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Path submissions are POSTed to and replayed against
  pub submission_path: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      submission_path: "/api/submit".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Namespace prefix shared by the core and data partitions
  pub prefix: String,
  /// Core namespace version; bumping it triggers a fresh install + cutover
  pub core_version: u32,
  /// Files populated into the core namespace at install time
  pub core_files: Vec<String>,
  /// Data-namespace retention window for periodic eviction
  pub retention_days: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "formsync".to_string(),
      core_version: 1,
      core_files: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/styles.css".to_string(),
        "/app.js".to_string(),
      ],
      retention_days: 7,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Directory holding cache.db and queue.db (defaults to the user data dir)
  pub data_dir: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./formsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/formsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/formsync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("formsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("formsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// The versioned core namespace, replaced wholesale on upgrade.
  pub fn core_namespace(&self) -> String {
    format!("{}-core-v{}", self.cache.prefix, self.cache.core_version)
  }

  /// The long-lived data namespace; entry-level eviction only.
  pub fn data_namespace(&self) -> String {
    format!("{}-data", self.cache.prefix)
  }

  /// Directory holding the engine's databases.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.storage.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("formsync"))
  }
}
