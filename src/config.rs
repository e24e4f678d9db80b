//! Configuration module
//!
//! TOML file at `~/.config/ocpp-dlm/config.toml` by default. Every section and
//! field has a default, so an absent file yields a working cold-start setup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::PhaseCurrents;
use crate::support::errors::ConfigError;

/// Default config location
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocpp-dlm")
        .join("config.toml")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dlm: DlmConfig,
    #[serde(default)]
    pub pusher: PusherConfig,
    #[serde(default)]
    pub groups: GroupsConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dlm.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid("dlm.tick_interval_secs must be > 0".into()));
        }
        if self.dlm.max_concurrent_pushes == 0 {
            return Err(ConfigError::Invalid(
                "dlm.max_concurrent_pushes must be > 0".into(),
            ));
        }
        if self.pusher.confirm_attempts == 0 {
            return Err(ConfigError::Invalid("pusher.confirm_attempts must be > 0".into()));
        }
        if !self.pusher.phase_key_template.contains("{phase}") {
            return Err(ConfigError::Invalid(
                "pusher.phase_key_template must contain {phase}".into(),
            ));
        }
        if self.groups.prefix_len == 0 {
            return Err(ConfigError::Invalid("groups.prefix_len must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// OCPP WebSocket listener
    pub ws_host: String,
    pub ws_port: u16,
    /// Operator API listener
    pub api_host: String,
    pub api_port: u16,
    /// Heartbeat interval handed to stations at boot (seconds)
    pub heartbeat_interval: u32,
    pub shutdown_timeout: u64,
}

impl ServerConfig {
    pub fn ws_address(&self) -> String {
        format!("{}:{}", self.ws_host, self.ws_port)
    }

    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_host: "0.0.0.0".to_string(),
            ws_port: 8887,
            api_host: "0.0.0.0".to_string(),
            api_port: 8080,
            heartbeat_interval: 60,
            shutdown_timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `text` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Load management thresholds. Cycle thresholds count DLM ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DlmConfig {
    pub tick_interval_secs: u64,
    pub offline_cycles_threshold: u32,
    /// Minimal holding current (A)
    pub standby_current: u32,
    pub standby_cycles_threshold: u32,
    /// Limit used to test demand when leaving standby (A)
    pub probe_current: u32,
    pub ramp_up_cycles_threshold: u32,
    /// Drawing above this in standby leaves standby at once (A)
    pub standby_exit_current: u32,
    pub rampdown_offset: u32,
    pub rampdown_cycles_threshold: u32,
    pub requalify_cycles_threshold: u32,
    /// Fair-share ceiling per charger (A)
    pub max_current_per_charger: u32,
    /// Ticks a group may hold `action_pending` before alarming
    pub pending_alarm_ticks: u32,
    pub max_concurrent_pushes: usize,
}

impl DlmConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

impl Default for DlmConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 10,
            offline_cycles_threshold: 70,
            standby_current: 6,
            standby_cycles_threshold: 3,
            probe_current: 8,
            ramp_up_cycles_threshold: 3,
            standby_exit_current: 7,
            rampdown_offset: 2,
            rampdown_cycles_threshold: 3,
            requalify_cycles_threshold: 3,
            max_current_per_charger: 16,
            pending_alarm_ticks: 30,
            max_concurrent_pushes: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PusherConfig {
    pub confirm_attempts: u32,
    pub confirm_interval_ms: u64,
    /// Station key per phase, `{phase}` is replaced by 1, 2 or 3
    pub phase_key_template: String,
}

impl PusherConfig {
    /// Deadline for one phase's confirmation.
    pub fn phase_deadline(&self) -> Duration {
        Duration::from_millis(self.confirm_interval_ms * u64::from(self.confirm_attempts))
    }

    pub fn phase_key(&self, phase: u8) -> String {
        self.phase_key_template.replace("{phase}", &phase.to_string())
    }
}

impl Default for PusherConfig {
    fn default() -> Self {
        Self {
            confirm_attempts: 10,
            confirm_interval_ms: 500,
            phase_key_template: "DlmOperatorPhase{phase}Limit".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupsConfig {
    /// Leading characters of the station id forming the group id
    pub prefix_len: usize,
    pub default_max_current: u32,
    pub capacity: HashMap<String, GroupCapacity>,
}

impl GroupsConfig {
    pub fn capacity_for(&self, group_id: &str) -> PhaseCurrents {
        self.capacity
            .get(group_id)
            .map(|c| PhaseCurrents::new(c.max_l1, c.max_l2, c.max_l3))
            .unwrap_or_else(|| PhaseCurrents::uniform(self.default_max_current))
    }
}

impl Default for GroupsConfig {
    fn default() -> Self {
        Self {
            prefix_len: 1,
            default_max_current: 32,
            capacity: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GroupCapacity {
    pub max_l1: u32,
    pub max_l2: u32,
    pub max_l3: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub state_file: PathBuf,
    pub identity_file: PathBuf,
    /// 0 disables periodic saves
    pub autosave_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("centralsystem.json"),
            identity_file: PathBuf::from("ident.json"),
            autosave_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub step_delay_secs: u64,
    pub meter_sample_interval: u32,
    pub meter_sampled_data: String,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            step_delay_secs: 5,
            meter_sample_interval: 10,
            meter_sampled_data: "Current.Import.L1,Current.Import.L2,Current.Import.L3,\
                                 Current.Offered,Energy.Active.Import.Register,\
                                 Power.Active.Import"
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = AppConfig::from_toml("").unwrap();
        assert_eq!(cfg.server.ws_port, 8887);
        assert_eq!(cfg.dlm.offline_cycles_threshold, 70);
        assert_eq!(cfg.dlm.max_current_per_charger, 16);
        assert_eq!(cfg.pusher.phase_deadline(), Duration::from_secs(5));
        assert_eq!(cfg.groups.capacity_for("A"), PhaseCurrents::uniform(32));
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg = AppConfig::from_toml(
            r#"
            [dlm]
            tick_interval_secs = 5

            [groups.capacity.B]
            max_l1 = 40
            max_l2 = 40
            max_l3 = 25
            "#,
        )
        .unwrap();
        assert_eq!(cfg.dlm.tick_interval(), Duration::from_secs(5));
        assert_eq!(cfg.dlm.standby_current, 6);
        assert_eq!(cfg.groups.capacity_for("B"), PhaseCurrents::new(40, 40, 25));
        assert_eq!(cfg.groups.capacity_for("C"), PhaseCurrents::uniform(32));
    }

    #[test]
    fn phase_key_substitutes_number() {
        let cfg = PusherConfig::default();
        assert_eq!(cfg.phase_key(2), "DlmOperatorPhase2Limit");
    }

    #[test]
    fn sampled_data_has_no_whitespace() {
        let cfg = ProvisioningConfig::default();
        assert!(!cfg.meter_sampled_data.contains(' '));
        assert!(cfg.meter_sampled_data.ends_with("Power.Active.Import"));
    }

    #[test]
    fn rejects_zero_tick() {
        let err = AppConfig::from_toml("[dlm]\ntick_interval_secs = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn bad_toml_is_parse_error() {
        assert!(matches!(
            AppConfig::from_toml("[server\nws_port = 1"),
            Err(ConfigError::Parse { .. })
        ));
    }
}
