//! amrm.toml configuration parser.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::Resource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmrmConfig {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener for application master RPCs.
    pub address: SocketAddr,
    /// Listener for attempt lifecycle calls from the orchestration layer.
    pub admin_address: SocketAddr,
    /// Worker threads serving RPCs.
    pub client_thread_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub enabled: bool,
    /// Header carrying the caller's authenticated user name.
    pub identity_header: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// e.g. "1024 mb, 1 vcores"
    pub minimum_allocation: String,
    pub maximum_allocation: String,
}

pub const DEFAULT_SCHEDULER_PORT: u16 = 8030;
pub const DEFAULT_CLIENT_THREAD_COUNT: usize = 50;
pub const DEFAULT_IDENTITY_HEADER: &str = "x-remote-user";

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_SCHEDULER_PORT)),
            admin_address: SocketAddr::from(([127, 0, 0, 1], DEFAULT_SCHEDULER_PORT + 1)),
            client_thread_count: DEFAULT_CLIENT_THREAD_COUNT,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            minimum_allocation: "1024 mb, 1 vcores".to_string(),
            maximum_allocation: "8192 mb, 32 vcores".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn minimum(&self) -> ConfigResult<Resource> {
        parse_resource_config_value(&self.minimum_allocation)
    }

    pub fn maximum(&self) -> ConfigResult<Resource> {
        parse_resource_config_value(&self.maximum_allocation)
    }
}

impl AmrmConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: AmrmConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.server.client_thread_count == 0 {
            return Err(ConfigError::Invalid(
                "server.client_thread_count must be at least 1".to_string(),
            ));
        }
        if self.security.identity_header.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "security.identity_header must not be empty".to_string(),
            ));
        }
        let min = self.scheduler.minimum()?;
        let max = self.scheduler.maximum()?;
        if !min.fits_in(&max) {
            return Err(ConfigError::Invalid(format!(
                "minimum allocation {} mb / {} vcores exceeds maximum {} mb / {} vcores",
                min.memory_mb, min.vcores, max.memory_mb, max.vcores
            )));
        }
        Ok(())
    }
}

static MB: LazyLock<Regex> = LazyLock::new(|| unit_pattern("mb"));
static VCORES: LazyLock<Regex> = LazyLock::new(|| unit_pattern("vcores"));

fn unit_pattern(unit: &str) -> Regex {
    Regex::new(&format!(r"(\d+) ?{unit}")).expect("static resource pattern")
}

/// Parse a resource value such as `"1024 mb, 3 vcores"`. Both units are
/// required; their order does not matter.
pub fn parse_resource_config_value(value: &str) -> ConfigResult<Resource> {
    let memory_mb = find_resource(value, &MB, "mb")?;
    let vcores = find_resource(value, &VCORES, "vcores")?;
    let vcores = u32::try_from(vcores).map_err(|_| ConfigError::InvalidResource {
        value: value.to_string(),
        reason: "vcores out of range".to_string(),
    })?;
    Ok(Resource::new(memory_mb, vcores))
}

fn find_resource(value: &str, pattern: &Regex, unit: &'static str) -> ConfigResult<u64> {
    let caps = pattern
        .captures(value)
        .ok_or(ConfigError::MissingResource(unit))?;
    caps[1].parse().map_err(|e| ConfigError::InvalidResource {
        value: value.to_string(),
        reason: format!("{unit}: {e}"),
    })
}
