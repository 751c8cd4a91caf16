use serde::Deserialize;
use std::path::Path;

/// Top-level config for the metadata store core, loaded from a TOML file.
/// Every field has a sane default so the store comes up even with no file
/// on disk at all.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the durable-collection backing file. `:memory:` is valid and
    /// is what the test suite uses.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Autosave tick interval: how often the durable-collection backing
    /// file is snapshotted in the background.
    #[serde(default = "default_autosave_interval_secs")]
    pub autosave_interval_secs: u64,
    /// Library-wide ceiling a caller's `top` is capped at.
    #[serde(default = "default_query_result_max_num")]
    pub query_result_max_num: u32,
    /// Default `top` when a query omits it.
    #[serde(default = "default_query_page_default_top")]
    pub query_page_default_top: u32,
}

fn default_db_path() -> String {
    "./tablestore.db".to_string()
}

fn default_autosave_interval_secs() -> u64 {
    5
}

fn default_query_result_max_num() -> u32 {
    1000
}

fn default_query_page_default_top() -> u32 {
    1000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            autosave_interval_secs: default_autosave_interval_secs(),
            query_result_max_num: default_query_result_max_num(),
            query_page_default_top: default_query_page_default_top(),
        }
    }
}

impl StoreConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("store config not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: StoreConfig = toml::from_str(&contents)?;
        tracing::info!("loaded store config from {}", path.display());
        Ok(config)
    }
}
