//! Service Configuration
//!
//! Defaults, overridden by `config/alarmsrv.yaml` (or `alarmsrv.yaml` in the
//! working directory), overridden by `ALARMSRV_`-prefixed environment
//! variables (`__` separates nesting, e.g. `ALARMSRV_SERVICE__PORT`).

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmConfig {
    pub service: ServiceConfig,
    pub security: SecurityConfig,
    pub scheduler: SchedulerConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
}

/// Security alarm defaults applied when seeding a place
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Entrance delay seconds while armed `ON`
    pub entrance_delay_on: u64,
    /// Entrance delay seconds while armed `PARTIAL`
    pub entrance_delay_partial: u64,
}

/// Timeout scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub tick_ms: u64,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "alarmsrv".to_string(),
                host: "0.0.0.0".to_string(),
                port: 8084,
            },
            security: SecurityConfig {
                entrance_delay_on: 30,
                entrance_delay_partial: 0,
            },
            scheduler: SchedulerConfig {
                tick_ms: haven_place::DEFAULT_TICK_MS,
            },
        }
    }
}

impl AlarmConfig {
    /// Layered load: defaults, yaml file, environment
    pub fn load() -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(AlarmConfig::default()));
        for path in ["config/alarmsrv.yaml", "alarmsrv.yaml"] {
            if Path::new(path).exists() {
                figment = figment.merge(Yaml::file(path));
                break;
            }
        }
        figment
            .merge(Env::prefixed("ALARMSRV_").split("__"))
            .extract()
    }

    /// Socket address string for the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.service.host, self.service.port)
    }
}
