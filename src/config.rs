use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock;
use crate::error::RenudgeError;
use crate::quiet;

fn default_enabled() -> bool {
    true
}
fn default_timezone() -> String {
    String::new()
}
fn default_history_depth() -> usize {
    8
}
fn default_time_format() -> String {
    clock::DEFAULT_TIME_FORMAT.into()
}
fn default_data_dir() -> String {
    "./renudge.data".into()
}
fn default_tick_seconds() -> u64 {
    30
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeMode {
    /// Conversations join only via an explicit `watch`.
    #[default]
    Manual,
    /// Any inbound message subscribes the conversation.
    Auto,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// IANA zone id; empty means the system-local zone.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Minutes of conversation silence before an interval trigger;
    /// 0 disables interval triggers.
    #[serde(default)]
    pub after_last_msg_minutes: u64,
    /// Up to two fixed `"HH:MM"` check-in times; empty disables each.
    #[serde(default)]
    pub daily_time1: String,
    #[serde(default)]
    pub daily_time2: String,
    /// `"HH:MM-HH:MM"` exclusion window; empty disables it.
    #[serde(default)]
    pub quiet_hours: String,
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,
    /// Days without a user reply before auto-unsubscribe; 0 disables.
    #[serde(default)]
    pub max_no_reply_days: u64,
    /// Templates for proactive prompts; one is picked at random per fire.
    #[serde(default)]
    pub custom_prompts: Vec<String>,
    #[serde(default)]
    pub subscribe_mode: SubscribeMode,
    /// strftime format used for the `{now}` placeholder.
    #[serde(default = "default_time_format")]
    pub time_format: String,
    /// Prefix outbound text with `[<formatted now>] `.
    #[serde(default)]
    pub append_time_field: bool,
    /// Inline system prompt; beats any resolved persona when non-empty.
    #[serde(default)]
    pub persona_override: String,
    /// Persona id handed to the resolver when set.
    #[serde(default)]
    pub fixed_persona: String,
    /// Provider id handed to dispatch when set.
    #[serde(default)]
    pub fixed_provider: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enabled: default_enabled(),
            timezone: default_timezone(),
            after_last_msg_minutes: 0,
            daily_time1: String::new(),
            daily_time2: String::new(),
            quiet_hours: String::new(),
            history_depth: default_history_depth(),
            max_no_reply_days: 0,
            custom_prompts: Vec::new(),
            subscribe_mode: SubscribeMode::default(),
            time_format: default_time_format(),
            append_time_field: false,
            persona_override: String::new(),
            fixed_persona: String::new(),
            fixed_provider: String::new(),
            data_dir: default_data_dir(),
            tick_seconds: default_tick_seconds(),
        }
    }
}

impl Config {
    pub fn data_root_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn resolve_config_path() -> Result<Option<PathBuf>, RenudgeError> {
        if let Ok(custom) = std::env::var("RENUDGE_CONFIG") {
            if std::path::Path::new(&custom).exists() {
                return Ok(Some(PathBuf::from(custom)));
            }
            return Err(RenudgeError::Config(format!(
                "RENUDGE_CONFIG points to non-existent file: {custom}"
            )));
        }

        if std::path::Path::new("./renudge.config.yaml").exists() {
            return Ok(Some(PathBuf::from("./renudge.config.yaml")));
        }
        if std::path::Path::new("./renudge.config.yml").exists() {
            return Ok(Some(PathBuf::from("./renudge.config.yml")));
        }
        Ok(None)
    }

    /// Load config from YAML file.
    pub fn load() -> Result<Self, RenudgeError> {
        let yaml_path = Self::resolve_config_path()?;

        if let Some(path) = yaml_path {
            let path_str = path.to_string_lossy().to_string();
            let content = std::fs::read_to_string(&path)
                .map_err(|e| RenudgeError::Config(format!("Failed to read {path_str}: {e}")))?;
            let mut config: Config = serde_yaml::from_str(&content)
                .map_err(|e| RenudgeError::Config(format!("Failed to parse {path_str}: {e}")))?;
            config.normalize();
            return Ok(config);
        }

        Err(RenudgeError::Config(
            "No renudge.config.yaml found. Create one in the working directory or point RENUDGE_CONFIG at it.".into(),
        ))
    }

    /// Normalize after deserialization or after a management mutation.
    ///
    /// Scheduling inputs fail open: an unknown zone, a malformed trigger
    /// time, or a malformed quiet window disables that feature with a
    /// warning instead of refusing to run.
    pub fn normalize(&mut self) {
        self.timezone = self.timezone.trim().to_string();
        if !self.timezone.is_empty() && clock::resolve_zone(&self.timezone).is_none() {
            warn!(
                "Unknown timezone '{}', falling back to the system zone",
                self.timezone
            );
            self.timezone.clear();
        }

        self.daily_time1 = normalize_hhmm_field("daily_time1", &self.daily_time1);
        self.daily_time2 = normalize_hhmm_field("daily_time2", &self.daily_time2);
        // Two identical check-in times collapse into one firing; nudge the
        // second forward a minute so both remain observable.
        if !self.daily_time1.is_empty() && self.daily_time1 == self.daily_time2 {
            if let Some((h, m)) = clock::parse_hhmm(&self.daily_time2) {
                let (h, m) = clock::plus_one_minute(h, m);
                self.daily_time2 = clock::fmt_hhmm(h, m);
            }
        }

        self.quiet_hours = self.quiet_hours.trim().to_string();
        if !self.quiet_hours.is_empty() && quiet::parse_window(&self.quiet_hours).is_none() {
            warn!(
                "Malformed quiet_hours '{}', quiet hours disabled",
                self.quiet_hours
            );
            self.quiet_hours.clear();
        }

        if self.time_format.trim().is_empty() {
            self.time_format = default_time_format();
        }
        if self.data_dir.trim().is_empty() {
            self.data_dir = default_data_dir();
        }
        if self.tick_seconds == 0 {
            self.tick_seconds = default_tick_seconds();
        }
        self.persona_override = self.persona_override.trim().to_string();
        self.fixed_persona = self.fixed_persona.trim().to_string();
        self.fixed_provider = self.fixed_provider.trim().to_string();
    }

    /// Save config as YAML to the given path.
    pub fn save_yaml(&self, path: &std::path::Path) -> Result<(), RenudgeError> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| RenudgeError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn normalize_hhmm_field(name: &str, value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return String::new();
    }
    match clock::parse_hhmm(value) {
        Some((h, m)) => clock::fmt_hhmm(h, m),
        None => {
            warn!("Malformed {name} '{value}', trigger disabled");
            String::new()
        }
    }
}
