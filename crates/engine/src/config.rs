//! Database configuration via `folio.toml`
//!
//! On first open a commented default `folio.toml` is written to the data
//! directory. To change settings, edit the file and reopen.

use folio_core::{FolioError, FolioResult, IndexId, ViewId};
use folio_search::BridgeConfig;
use folio_storage::Durability;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Config file name placed in the database data directory.
pub const CONFIG_FILE_NAME: &str = "folio.toml";

/// Changeset log file name placed in the database data directory.
pub const LOG_FILE_NAME: &str = "folio.log";

/// One view-to-index binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBinding {
    /// Source view
    pub view: String,
    /// Target index name
    pub index: String,
}

impl IndexBinding {
    /// Typed view id
    pub fn view_id(&self) -> ViewId {
        ViewId::new(self.view.as_str())
    }

    /// Typed index id
    pub fn index_id(&self) -> IndexId {
        IndexId::new(self.index.as_str())
    }
}

/// `[bridge]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    /// Start the background pipeline at open (default: true)
    pub autostart: bool,
    /// Worker threads per bridge (default: 2)
    pub workers: usize,
    /// Documents per bulk request (default: 1000)
    pub bulk_actions: usize,
    /// Maximum age of a buffered document (default: 1000 ms)
    pub flush_interval_ms: u64,
    /// Bulk request deadline (default: 30000 ms)
    pub request_timeout_ms: u64,
    /// Changesets read per fetch (default: 256)
    pub fetch_limit: usize,
    /// Feeder sleep when idle (default: 200 ms)
    pub poll_interval_ms: u64,
    /// Changesets queued between feeder and workers (default: 64)
    pub queue_depth: usize,
}

impl Default for BridgeSection {
    fn default() -> Self {
        BridgeSection {
            autostart: true,
            workers: 2,
            bulk_actions: 1000,
            flush_interval_ms: 1000,
            request_timeout_ms: 30_000,
            fetch_limit: 256,
            poll_interval_ms: 200,
            queue_depth: 64,
        }
    }
}

impl BridgeSection {
    /// Runtime bridge settings
    pub fn to_bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            workers: self.workers,
            bulk_actions: self.bulk_actions,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            fetch_limit: self.fetch_limit,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            queue_depth: self.queue_depth,
            ..BridgeConfig::default()
        }
    }
}

/// `[sessions]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsSection {
    /// How long committed, conflicted, rejected and discarded sessions stay
    /// readable before they are swept (default: 600000 ms)
    pub retention_ms: u64,
}

impl Default for SessionsSection {
    fn default() -> Self {
        SessionsSection { retention_ms: 600_000 }
    }
}

impl SessionsSection {
    /// Retention window for terminal sessions
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }
}

/// Database configuration loaded from `folio.toml`.
///
/// # Example
///
/// ```toml
/// durability = "batched"
/// views = ["main"]
///
/// [bridge]
/// workers = 2
/// bulk_actions = 1000
///
/// [sessions]
/// retention_ms = 600000
///
/// [[indexes]]
/// view = "main"
/// index = "documents"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolioConfig {
    /// Log sync policy: `"always"` or `"batched"`.
    #[serde(default)]
    pub durability: Durability,
    /// Views provisioned at open.
    #[serde(default = "default_views")]
    pub views: Vec<String>,
    /// Bridge tuning.
    #[serde(default)]
    pub bridge: BridgeSection,
    /// Session bookkeeping.
    #[serde(default)]
    pub sessions: SessionsSection,
    /// Search indexes fed from views.
    #[serde(default)]
    pub indexes: Vec<IndexBinding>,
}

fn default_views() -> Vec<String> {
    vec!["main".to_string()]
}

impl Default for FolioConfig {
    fn default() -> Self {
        FolioConfig {
            durability: Durability::default(),
            views: default_views(),
            bridge: BridgeSection::default(),
            sessions: SessionsSection::default(),
            indexes: vec![IndexBinding {
                view: "main".to_string(),
                index: "documents".to_string(),
            }],
        }
    }
}

impl FolioConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Folio database configuration
#
# Durability of the changeset log: "batched" (default) or "always"
#   "batched" = fsync every 100ms or 1000 records, may lose the last interval on crash
#   "always"  = fsync every commit
durability = "batched"

# Views created at open. Views live for the lifetime of the data directory.
views = ["main"]

# Search-index synchronization bridge
[bridge]
autostart = true
workers = 2                 # worker threads per (view, index) pair
bulk_actions = 1000         # flush when this many documents are buffered
flush_interval_ms = 1000    # ...or when the oldest has waited this long
request_timeout_ms = 30000  # bulk request deadline; a timeout skips the batch
fetch_limit = 256           # changesets read from the log per fetch
poll_interval_ms = 200      # idle sleep between fetches
queue_depth = 64            # changesets buffered between feeder and workers

# Edit sessions
[sessions]
retention_ms = 600000       # finished sessions stay readable this long, then are swept

# One entry per index kept in step with a view
[[indexes]]
view = "main"
index = "documents"
"#
    }

    /// Parse and validate config text.
    pub fn parse(content: &str) -> FolioResult<Self> {
        let config: FolioConfig = toml::from_str(content)
            .map_err(|e| FolioError::validation(format!("invalid {}: {}", CONFIG_FILE_NAME, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> FolioResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FolioError::fatal_store_with_source(
                format!("failed to read config file '{}'", path.display()),
                e,
            )
        })?;
        Self::parse(&content)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> FolioResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                FolioError::fatal_store_with_source(
                    format!("failed to write default config file '{}'", path.display()),
                    e,
                )
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> FolioResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| FolioError::validation(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            FolioError::fatal_store_with_source(
                format!("failed to write config file '{}'", path.display()),
                e,
            )
        })
    }

    /// Check cross-field consistency.
    ///
    /// Every index must read from a configured view, and each
    /// `(view, index)` pair may appear once.
    pub fn validate(&self) -> FolioResult<()> {
        if self.views.iter().any(|v| v.is_empty()) {
            return Err(FolioError::validation("view names must not be empty"));
        }
        let views: HashSet<&str> = self.views.iter().map(String::as_str).collect();
        let mut pairs = HashSet::new();
        for binding in &self.indexes {
            if binding.index.is_empty() {
                return Err(FolioError::validation("index names must not be empty"));
            }
            if !views.contains(binding.view.as_str()) {
                return Err(FolioError::validation(format!(
                    "index '{}' reads from unknown view '{}'",
                    binding.index, binding.view
                )));
            }
            if !pairs.insert((binding.view.as_str(), binding.index.as_str())) {
                return Err(FolioError::validation(format!(
                    "index '{}' is bound to view '{}' more than once",
                    binding.index, binding.view
                )));
            }
        }
        self.bridge.to_bridge_config().validate()
    }

    /// Configured views as typed ids
    pub fn view_ids(&self) -> Vec<ViewId> {
        self.views.iter().map(|v| ViewId::new(v.as_str())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_toml_matches_default_config() {
        let parsed = FolioConfig::parse(FolioConfig::default_toml()).unwrap();
        assert_eq!(parsed, FolioConfig::default());
    }

    #[test]
    fn parse_always() {
        let config = FolioConfig::parse("durability = \"always\"").unwrap();
        assert_eq!(config.durability, Durability::Always);
        assert_eq!(config.views, vec!["main"]);
        assert!(config.indexes.is_empty());
    }

    #[test]
    fn parse_invalid_durability_returns_error() {
        assert!(FolioConfig::parse("durability = \"turbo\"")
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn partial_bridge_section_uses_defaults() {
        let config = FolioConfig::parse("[bridge]\nworkers = 4\n").unwrap();
        assert_eq!(config.bridge.workers, 4);
        assert_eq!(config.bridge.bulk_actions, 1000);
        let runtime = config.bridge.to_bridge_config();
        assert_eq!(runtime.flush_interval, Duration::from_secs(1));
        assert_eq!(runtime.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn sessions_section_parsed() {
        let config = FolioConfig::parse("[sessions]\nretention_ms = 250\n").unwrap();
        assert_eq!(config.sessions.retention(), Duration::from_millis(250));
        let config = FolioConfig::parse("").unwrap();
        assert_eq!(config.sessions.retention(), Duration::from_secs(600));
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(FolioConfig::parse("[bridge]\nworkers = 0\n").is_err());
    }

    #[test]
    fn index_on_unknown_view_rejected() {
        let text = r#"
views = ["main"]
[[indexes]]
view = "drafts"
index = "documents"
"#;
        let err = FolioConfig::parse(text).unwrap_err();
        assert!(err.to_string().contains("drafts"));
    }

    #[test]
    fn duplicate_binding_rejected() {
        let text = r#"
[[indexes]]
view = "main"
index = "documents"
[[indexes]]
view = "main"
index = "documents"
"#;
        assert!(FolioConfig::parse(text).is_err());
    }

    #[test]
    fn write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());

        FolioConfig::write_default_if_missing(&path).unwrap();
        let config = FolioConfig::from_file(&path).unwrap();
        assert_eq!(config.durability, Durability::Batched);
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "durability = \"always\"\n").unwrap();

        FolioConfig::write_default_if_missing(&path).unwrap();
        let config = FolioConfig::from_file(&path).unwrap();
        assert_eq!(config.durability, Durability::Always);
    }

    #[test]
    fn write_to_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = FolioConfig {
            durability: Durability::Always,
            views: vec!["main".into(), "drafts".into()],
            bridge: BridgeSection {
                autostart: false,
                bulk_actions: 10,
                ..BridgeSection::default()
            },
            sessions: SessionsSection { retention_ms: 5_000 },
            indexes: vec![IndexBinding {
                view: "drafts".into(),
                index: "draft-docs".into(),
            }],
        };

        config.write_to_file(&path).unwrap();
        assert_eq!(FolioConfig::from_file(&path).unwrap(), config);
    }
}
