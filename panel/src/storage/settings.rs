//! Settings file management

use serde::{Deserialize, Serialize};

use crate::deploy::health::HealthPollSettings;
use crate::logs::LogLevel;
use crate::models::project::Project;
use crate::models::user::User;

/// Panel settings, read from `settings.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily rolling log files under the data directory
    #[serde(default = "default_true")]
    pub log_to_file: bool,

    /// Local HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Container health polling
    #[serde(default)]
    pub health_poll: HealthPollSettings,

    /// Persist state to `state.json`; memory only when disabled
    #[serde(default = "default_true")]
    pub persist_state: bool,

    /// Seconds to wait for running deployments on shutdown
    #[serde(default = "default_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,

    /// Projects registered at startup
    #[serde(default)]
    pub projects: Vec<Project>,

    /// Users registered at startup
    #[serde(default)]
    pub users: Vec<User>,
}

fn default_true() -> bool {
    true
}

fn default_shutdown_delay() -> u64 {
    600
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: true,
            server: ServerSettings::default(),
            health_poll: HealthPollSettings::default(),
            persist_state: true,
            max_shutdown_delay_secs: default_shutdown_delay(),
            projects: Vec::new(),
            users: Vec::new(),
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3100
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}
