use crate::analysis::concordance::ConcordanceConfig;
use crate::analysis::staleness::StalenessWeights;
use crate::analysis::usage::UsageConfig;
use crate::error::IndexError;
use crate::index::types::IndexConfig;
use crate::query::scorer::ScoringWeights;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "kdex";
const CONFIG_FILE: &str = "config.json";

/// Per-store state directory holding the index, reports and event log
pub const STATE_DIR: &str = ".kdex";
const INDEX_FILE: &str = "index.db";
const REPORTS_DIR: &str = "reports";
const EVENTS_FILE: &str = "events.jsonl";

/// Engine configuration. Every field has a documented default, so a partial
/// (or absent) config file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub index: IndexConfig,
    pub search: ScoringWeights,
    pub concordance: ConcordanceConfig,
    pub staleness: StalenessWeights,
    pub usage: UsageConfig,
}

impl AppConfig {
    /// Load config for a store: `<root>/.kdex/config.json`, then the user
    /// config directory, then defaults.
    pub fn load(store_root: &Path) -> Result<Self> {
        let candidates = [
            Some(store_root.join(STATE_DIR).join(CONFIG_FILE)),
            get_user_config_path(),
        ];

        for path in candidates.into_iter().flatten() {
            if path.exists() {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                let config: AppConfig = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?;
                config.validate()?;
                tracing::debug!(path = %path.display(), "loaded config");
                return Ok(config);
            }
        }

        Ok(Self::default())
    }

    /// Save config into the store's state directory
    pub fn save(&self, store_root: &Path) -> Result<()> {
        let dir = state_dir(store_root)?;
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(dir.join(CONFIG_FILE), content).context("Failed to write config file")?;
        Ok(())
    }

    /// Reject settings that would break the scoring contracts
    pub fn validate(&self) -> Result<(), IndexError> {
        self.index.validate()?;
        self.search.validate()?;
        self.concordance.validate()?;
        self.staleness.validate()?;
        self.usage.validate()?;
        Ok(())
    }
}

/// User-level config path (`~/.config/kdex/config.json` on Linux)
fn get_user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME).join(CONFIG_FILE))
}

/// The state directory for a store, created on demand
pub fn state_dir(store_root: &Path) -> Result<PathBuf> {
    let dir = store_root.join(STATE_DIR);
    fs::create_dir_all(&dir)
        .map_err(|e| IndexError::UnreadableRoot {
            path: store_root.to_path_buf(),
            reason: format!("cannot create {}: {}", dir.display(), e),
        })?;
    Ok(dir)
}

/// Location of the index database for a store
pub fn get_index_path(store_root: &Path, config: &IndexConfig) -> PathBuf {
    match &config.db_path {
        Some(p) if p.is_absolute() => p.clone(),
        Some(p) => store_root.join(p),
        None => store_root.join(STATE_DIR).join(INDEX_FILE),
    }
}

/// Directory where analysis reports are written
pub fn get_reports_dir(store_root: &Path) -> Result<PathBuf> {
    let dir = state_dir(store_root)?.join(REPORTS_DIR);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Default retrieval event log
pub fn get_events_path(store_root: &Path) -> PathBuf {
    store_root.join(STATE_DIR).join(EVENTS_FILE)
}

/// Find the root of a knowledge store starting from a given path.
/// Walks up the directory tree looking for:
/// 1. A `.kdex` state directory (an already-indexed store)
/// 2. A `knowledge/` directory
///
/// Falls back to the start path itself.
pub fn find_store_root(start_path: &Path) -> Result<PathBuf> {
    let start = start_path
        .canonicalize()
        .map_err(|e| IndexError::UnreadableRoot {
            path: start_path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut current = start.as_path();
    loop {
        if current.join(STATE_DIR).is_dir() || current.join("knowledge").is_dir() {
            return Ok(current.to_path_buf());
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }

    Ok(start)
}

/// Nearest ancestor containing `.git`, used as the default repository root
/// for commit-history queries
pub fn find_repo_root(start_path: &Path) -> Option<PathBuf> {
    let start = start_path.canonicalize().ok()?;
    let mut current = start.as_path();

    loop {
        if current.join(".git").exists() {
            return Some(current.to_path_buf());
        }
        current = current.parent()?;
    }
}
