//! # Engine Configuration
//!
//! Configuration management for the reconciliation engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                            │
//! │     METAGROUP_UNENROL_ACTION=unenrol                                    │
//! │     METAGROUP_DB_PATH=/var/lib/metagroup/metagroup.db                   │
//! │                                                                         │
//! │  2. TOML Config File                                                    │
//! │     ~/.config/metagroup/metagroup.toml (Linux)                          │
//! │     ~/Library/Application Support/org.metagroup.metagroup/... (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! enabled = true
//!
//! [database]
//! path = "metagroup.db"
//! max_connections = 5
//!
//! [sync]
//! unenrol_action = "suspend_no_roles"   # unenrol | suspend | suspend_no_roles
//! lost_link_action = "suspend"          # keep | suspend | unenrol (destructive)
//! sync_all = true                       # false = only users holding a synced role
//! no_sync_role_ids = []
//! enabled_methods = ["manual", "self", "cohort", "meta", "metagroup"]
//!
//! [groups]
//! delete_empty_groups = false
//! add_group_suffix = true
//!
//! [logging]
//! level = "info"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use metagroup_core::validation::validate_method_name;
use metagroup_core::{LostLinkAction, UnenrolAction, LINK_COMPONENT, MANUAL_COMPONENT};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Sections
// =============================================================================

/// Where the engine stores its data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("metagroup.db")
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Synchronization policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// What happens to a derived enrolment whose source row disappeared.
    #[serde(default)]
    pub unenrol_action: UnenrolAction,

    /// Disposition for links whose source course or group was deleted.
    #[serde(default)]
    pub lost_link_action: LostLinkAction,

    /// When false, only users holding a synchronized role in the source
    /// course are mirrored.
    #[serde(default = "default_true")]
    pub sync_all: bool,

    /// Roles that are never copied to targets.
    #[serde(default)]
    pub no_sync_role_ids: Vec<i64>,

    /// Enrolment methods whose enrolments count as source rows.
    #[serde(default = "default_enabled_methods")]
    pub enabled_methods: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_enabled_methods() -> Vec<String> {
    ["manual", "self", "cohort", "meta", "metagroup"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            unenrol_action: UnenrolAction::default(),
            lost_link_action: LostLinkAction::default(),
            sync_all: true,
            no_sync_role_ids: Vec::new(),
            enabled_methods: default_enabled_methods(),
        }
    }
}

/// Target group housekeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSettings {
    /// Delete target groups that a move or unenrol left empty.
    #[serde(default)]
    pub delete_empty_groups: bool,

    /// Append " (linked)" to the names of groups created for links.
    #[serde(default = "default_true")]
    pub add_group_suffix: bool,
}

impl Default for GroupSettings {
    fn default() -> Self {
        GroupSettings {
            delete_empty_groups: false,
            add_group_suffix: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default tracing filter; `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            level: default_log_level(),
        }
    }
}

// =============================================================================
// Sync Config
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Engine switch. A disabled engine strips every role it granted and
    /// does nothing else.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub groups: GroupSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            enabled: true,
            database: DatabaseSettings::default(),
            sync: SyncSettings::default(),
            groups: GroupSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (metagroup.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        if config.sync.lost_link_action.is_destructive() {
            warn!(
                lost_link_action = %config.sync.lost_link_action,
                "Lost links will fully unenrol their members. This purges user data in target courses."
            );
        }

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<PathBuf> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Config saved");
        Ok(path)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(SyncError::InvalidConfig("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(SyncError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.sync.enabled_methods.is_empty() {
            return Err(SyncError::InvalidConfig(
                "sync.enabled_methods must name at least one method".into(),
            ));
        }

        for method in &self.sync.enabled_methods {
            validate_method_name(method)
                .map_err(|e| SyncError::InvalidConfig(format!("sync.enabled_methods: {}", e)))?;
        }

        if let Some(role) = self.sync.no_sync_role_ids.iter().find(|id| **id <= 0) {
            return Err(SyncError::InvalidConfig(format!(
                "sync.no_sync_role_ids contains non-positive role id {}",
                role
            )));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("METAGROUP_ENABLED") {
            match parse_bool(&value) {
                Some(enabled) => self.enabled = enabled,
                None => warn!(value = %value, "Ignoring invalid METAGROUP_ENABLED"),
            }
        }

        if let Some(path) = lookup("METAGROUP_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(action) = lookup("METAGROUP_UNENROL_ACTION") {
            match action.parse() {
                Ok(parsed) => self.sync.unenrol_action = parsed,
                Err(e) => warn!(action = %action, error = %e, "Ignoring invalid METAGROUP_UNENROL_ACTION"),
            }
        }

        if let Some(action) = lookup("METAGROUP_LOST_LINK_ACTION") {
            match action.parse() {
                Ok(parsed) => self.sync.lost_link_action = parsed,
                Err(e) => warn!(action = %action, error = %e, "Ignoring invalid METAGROUP_LOST_LINK_ACTION"),
            }
        }

        if let Some(value) = lookup("METAGROUP_SYNC_ALL") {
            match parse_bool(&value) {
                Some(sync_all) => self.sync.sync_all = sync_all,
                None => warn!(value = %value, "Ignoring invalid METAGROUP_SYNC_ALL"),
            }
        }

        if let Some(roles) = lookup("METAGROUP_NO_SYNC_ROLES") {
            let parsed: Result<Vec<i64>, _> = roles
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::parse::<i64>)
                .collect();
            match parsed {
                Ok(ids) => self.sync.no_sync_role_ids = ids,
                Err(e) => warn!(roles = %roles, error = %e, "Ignoring invalid METAGROUP_NO_SYNC_ROLES"),
            }
        }

        if let Some(value) = lookup("METAGROUP_DELETE_EMPTY_GROUPS") {
            match parse_bool(&value) {
                Some(delete) => self.groups.delete_empty_groups = delete,
                None => warn!(value = %value, "Ignoring invalid METAGROUP_DELETE_EMPTY_GROUPS"),
            }
        }

        if let Some(level) = lookup("METAGROUP_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "metagroup", "metagroup")
            .map(|dirs| dirs.config_dir().join("metagroup.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn unenrol_action(&self) -> UnenrolAction {
        self.sync.unenrol_action
    }

    pub fn lost_link_action(&self) -> LostLinkAction {
        self.sync.lost_link_action
    }

    pub fn is_method_enabled(&self, method: &str) -> bool {
        self.sync.enabled_methods.iter().any(|m| m == method)
    }

    /// Roles listed in `no_sync_role_ids` are never mirrored.
    pub fn is_role_synced(&self, role_id: i64) -> bool {
        !self.sync.no_sync_role_ids.contains(&role_id)
    }

    /// True for role assignments whose origin counts when copying roles:
    /// manual assignments and those made by an enabled enrolment method.
    pub fn is_role_component_synced(&self, component: &str) -> bool {
        if component == MANUAL_COMPONENT || component == LINK_COMPONENT {
            return true;
        }
        component
            .strip_prefix("enrol_")
            .map(|method| self.is_method_enabled(method))
            .unwrap_or(false)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
