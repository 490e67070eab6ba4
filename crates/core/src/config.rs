use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";
pub const DEFAULT_TRIGGER_REACTIONS: &[&str] = &["pushpin", "memo", "clipboard"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub store: StoreConfig,
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub bot_token: SecretString,
    pub app_token: Option<SecretString>,
    pub signing_secret: Option<SecretString>,
    pub api_base: String,
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub endpoint_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub roster: Vec<String>,
    pub reply_wait_secs: u64,
    pub watch_channels: Vec<String>,
    pub team_members: Vec<String>,
    pub trigger_reactions: Vec<String>,
    pub dashboard_url: Option<String>,
    pub on_reply_check_failure: ReplyCheckFailurePolicy,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// What the mention path does when the thread history could not be read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyCheckFailurePolicy {
    /// Treat the mention as unanswered and create the task.
    #[default]
    Escalate,
    /// Drop the mention.
    Suppress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportMode {
    SocketMode,
    Http,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SocketMode => "socket",
            Self::Http => "http",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub slack_bot_token: Option<String>,
    pub slack_app_token: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub slack_api_base: Option<String>,
    pub store_endpoint_url: Option<String>,
    pub roster: Option<Vec<String>>,
    pub reply_wait_secs: Option<u64>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            slack: SlackConfig {
                bot_token: String::new().into(),
                app_token: None,
                signing_secret: None,
                api_base: DEFAULT_SLACK_API_BASE.to_string(),
            },
            store: StoreConfig { endpoint_url: String::new(), timeout_secs: 10 },
            pipeline: PipelineConfig {
                roster: Vec::new(),
                reply_wait_secs: 3,
                watch_channels: Vec::new(),
                team_members: Vec::new(),
                trigger_reactions: DEFAULT_TRIGGER_REACTIONS
                    .iter()
                    .map(|reaction| reaction.to_string())
                    .collect(),
                dashboard_url: None,
                on_reply_check_failure: ReplyCheckFailurePolicy::Escalate,
            },
            server: ServerConfig { bind_address: "0.0.0.0".to_string(), port: 3000 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl std::str::FromStr for ReplyCheckFailurePolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "escalate" => Ok(Self::Escalate),
            "suppress" => Ok(Self::Suppress),
            other => Err(ConfigError::Validation(format!(
                "unsupported reply check failure policy `{other}` (expected escalate|suppress)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("taskbot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Socket mode needs an app-level token; without one the bot listens for
    /// HTTP deliveries instead.
    pub fn transport_mode(&self) -> TransportMode {
        let has_app_token = self
            .slack
            .app_token
            .as_ref()
            .map(|token| token.expose_secret().starts_with("xapp-"))
            .unwrap_or(false);
        if has_app_token {
            TransportMode::SocketMode
        } else {
            TransportMode::Http
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(slack) = patch.slack {
            if let Some(bot_token) = slack.bot_token {
                self.slack.bot_token = secret_value(bot_token);
            }
            if let Some(app_token) = slack.app_token {
                self.slack.app_token = Some(secret_value(app_token));
            }
            if let Some(signing_secret) = slack.signing_secret {
                self.slack.signing_secret = Some(secret_value(signing_secret));
            }
            if let Some(api_base) = slack.api_base {
                self.slack.api_base = api_base;
            }
        }

        if let Some(store) = patch.store {
            if let Some(endpoint_url) = store.endpoint_url {
                self.store.endpoint_url = endpoint_url;
            }
            if let Some(timeout_secs) = store.timeout_secs {
                self.store.timeout_secs = timeout_secs;
            }
        }

        if let Some(pipeline) = patch.pipeline {
            if let Some(roster) = pipeline.roster {
                self.pipeline.roster = roster;
            }
            if let Some(reply_wait_secs) = pipeline.reply_wait_secs {
                self.pipeline.reply_wait_secs = reply_wait_secs;
            }
            if let Some(watch_channels) = pipeline.watch_channels {
                self.pipeline.watch_channels = watch_channels;
            }
            if let Some(team_members) = pipeline.team_members {
                self.pipeline.team_members = team_members;
            }
            if let Some(trigger_reactions) = pipeline.trigger_reactions {
                self.pipeline.trigger_reactions = trigger_reactions;
            }
            if let Some(dashboard_url) = pipeline.dashboard_url {
                self.pipeline.dashboard_url = Some(dashboard_url);
            }
            if let Some(policy) = pipeline.on_reply_check_failure {
                self.pipeline.on_reply_check_failure = policy;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let bot_token = read_env("TASKBOT_SLACK_BOT_TOKEN")
            .or_else(|| read_env("SLACK_BOT_TOKEN"))
            .or_else(|| read_env("SLACK_TOKEN"));
        if let Some(value) = bot_token {
            self.slack.bot_token = secret_value(value);
        }
        let app_token = read_env("TASKBOT_SLACK_APP_TOKEN").or_else(|| read_env("SLACK_APP_TOKEN"));
        if let Some(value) = app_token {
            self.slack.app_token = Some(secret_value(value));
        }
        let signing_secret =
            read_env("TASKBOT_SLACK_SIGNING_SECRET").or_else(|| read_env("SLACK_SIGNING_SECRET"));
        if let Some(value) = signing_secret {
            self.slack.signing_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("TASKBOT_SLACK_API_BASE") {
            self.slack.api_base = value;
        }

        let endpoint_url = read_env("TASKBOT_STORE_URL").or_else(|| read_env("WEBAPP_URL"));
        if let Some(value) = endpoint_url {
            self.store.endpoint_url = value;
        }
        if let Some(value) = read_env("TASKBOT_STORE_TIMEOUT_SECS") {
            self.store.timeout_secs = parse_u64("TASKBOT_STORE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TASKBOT_ROSTER") {
            self.pipeline.roster = parse_list(&value);
        }
        if let Some(value) = read_env("TASKBOT_REPLY_WAIT_SECS") {
            self.pipeline.reply_wait_secs = parse_u64("TASKBOT_REPLY_WAIT_SECS", &value)?;
        }
        if let Some(value) = read_env("TASKBOT_WATCH_CHANNELS") {
            self.pipeline.watch_channels = parse_list(&value);
        }
        if let Some(value) = read_env("TASKBOT_TEAM_MEMBERS") {
            self.pipeline.team_members = parse_list(&value);
        }
        if let Some(value) = read_env("TASKBOT_TRIGGER_REACTIONS") {
            self.pipeline.trigger_reactions = parse_list(&value);
        }
        if let Some(value) = read_env("TASKBOT_DASHBOARD_URL") {
            self.pipeline.dashboard_url = Some(value);
        }
        if let Some(value) = read_env("TASKBOT_ON_REPLY_CHECK_FAILURE") {
            self.pipeline.on_reply_check_failure = value.parse()?;
        }

        if let Some(value) = read_env("TASKBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some((key, value)) =
            read_env_keyed("TASKBOT_SERVER_PORT").or_else(|| read_env_keyed("PORT"))
        {
            self.server.port = parse_u16(key, &value)?;
        }

        let log_level = read_env("TASKBOT_LOGGING_LEVEL").or_else(|| read_env("TASKBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TASKBOT_LOGGING_FORMAT").or_else(|| read_env("TASKBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(bot_token);
        }
        if let Some(app_token) = overrides.slack_app_token {
            self.slack.app_token = Some(secret_value(app_token));
        }
        if let Some(signing_secret) = overrides.slack_signing_secret {
            self.slack.signing_secret = Some(secret_value(signing_secret));
        }
        if let Some(api_base) = overrides.slack_api_base {
            self.slack.api_base = api_base;
        }
        if let Some(endpoint_url) = overrides.store_endpoint_url {
            self.store.endpoint_url = endpoint_url;
        }
        if let Some(roster) = overrides.roster {
            self.pipeline.roster = roster;
        }
        if let Some(reply_wait_secs) = overrides.reply_wait_secs {
            self.pipeline.reply_wait_secs = reply_wait_secs;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_slack(&self.slack)?;
        validate_store(&self.store)?;
        validate_pipeline(&self.pipeline)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("taskbot.toml"), PathBuf::from("config/taskbot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required. Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token".to_string()
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used the app token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    if let Some(app_token) = &slack.app_token {
        if app_token.expose_secret().starts_with("xoxb-") {
            return Err(ConfigError::Validation(
                "slack.app_token must start with `xapp-` (hint: you may have used the bot token instead of the app token)".to_string(),
            ));
        }
    }

    if !is_http_url(&slack.api_base) {
        return Err(ConfigError::Validation(
            "slack.api_base must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_store(store: &StoreConfig) -> Result<(), ConfigError> {
    if store.endpoint_url.trim().is_empty() {
        return Err(ConfigError::Validation(
            "store.endpoint_url is required (the deployed spreadsheet web app URL)".to_string(),
        ));
    }
    if !is_http_url(&store.endpoint_url) {
        return Err(ConfigError::Validation(
            "store.endpoint_url must start with http:// or https://".to_string(),
        ));
    }
    if store.timeout_secs == 0 || store.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "store.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_pipeline(pipeline: &PipelineConfig) -> Result<(), ConfigError> {
    if pipeline.roster.iter().all(|name| name.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "pipeline.roster must list at least one assignee".to_string(),
        ));
    }
    if pipeline.reply_wait_secs > 60 {
        return Err(ConfigError::Validation(
            "pipeline.reply_wait_secs must be in range 0..=60".to_string(),
        ));
    }
    if pipeline.trigger_reactions.iter().all(|reaction| reaction.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "pipeline.trigger_reactions must list at least one reaction name".to_string(),
        ));
    }
    if let Some(dashboard_url) = &pipeline.dashboard_url {
        if !is_http_url(dashboard_url) {
            return Err(ConfigError::Validation(
                "pipeline.dashboard_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_env_keyed(key: &'static str) -> Option<(&'static str, String)> {
    read_env(key).map(|value| (key, value))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    slack: Option<SlackPatch>,
    store: Option<StorePatch>,
    pipeline: Option<PipelinePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    bot_token: Option<String>,
    app_token: Option<String>,
    signing_secret: Option<String>,
    api_base: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StorePatch {
    endpoint_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelinePatch {
    roster: Option<Vec<String>>,
    reply_wait_secs: Option<u64>,
    watch_channels: Option<Vec<String>>,
    team_members: Option<Vec<String>>,
    trigger_reactions: Option<Vec<String>>,
    dashboard_url: Option<String>,
    on_reply_check_failure: Option<ReplyCheckFailurePolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
