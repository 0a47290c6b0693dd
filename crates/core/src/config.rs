use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "adviser.toml";
pub const NESTED_CONFIG_FILE: &str = "config/adviser.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub dialogue: DialogueConfig,
    pub session: SessionConfig,
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DialogueConfig {
    pub extractor_timeout_ms: u64,
    pub gateway_timeout_ms: u64,
    /// `None` keeps re-prompting forever.
    pub max_consecutive_failures: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub max_active_sessions: usize,
}

#[derive(Clone, Debug)]
pub struct CatalogConfig {
    /// Course catalog JSON; the embedded sample catalog is used when unset.
    pub courses_path: Option<PathBuf>,
    /// TOML file overriding utterance templates by catalog key.
    pub templates_path: Option<PathBuf>,
    pub max_plans: usize,
    pub search_attempts: u32,
    pub seed: u64,
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

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub courses_path: Option<PathBuf>,
    pub templates_path: Option<PathBuf>,
    pub max_consecutive_failures: Option<u32>,
    pub seed: Option<u64>,
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
            dialogue: DialogueConfig {
                extractor_timeout_ms: 2_000,
                gateway_timeout_ms: 5_000,
                max_consecutive_failures: None,
            },
            session: SessionConfig { idle_timeout_secs: 1_800, max_active_sessions: 1_024 },
            catalog: CatalogConfig {
                courses_path: None,
                templates_path: None,
                max_plans: 3,
                search_attempts: 3,
                seed: 2020,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
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

impl DialogueConfig {
    pub fn extractor_timeout(&self) -> Duration {
        Duration::from_millis(self.extractor_timeout_ms)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(dialogue) = patch.dialogue {
            if let Some(extractor_timeout_ms) = dialogue.extractor_timeout_ms {
                self.dialogue.extractor_timeout_ms = extractor_timeout_ms;
            }
            if let Some(gateway_timeout_ms) = dialogue.gateway_timeout_ms {
                self.dialogue.gateway_timeout_ms = gateway_timeout_ms;
            }
            if let Some(limit) = dialogue.max_consecutive_failures {
                self.dialogue.max_consecutive_failures =
                    limit.into_limit("dialogue.max_consecutive_failures")?;
            }
        }

        if let Some(session) = patch.session {
            if let Some(idle_timeout_secs) = session.idle_timeout_secs {
                self.session.idle_timeout_secs = idle_timeout_secs;
            }
            if let Some(max_active_sessions) = session.max_active_sessions {
                self.session.max_active_sessions = max_active_sessions;
            }
        }

        if let Some(catalog) = patch.catalog {
            if let Some(courses_path) = catalog.courses_path {
                self.catalog.courses_path = Some(courses_path);
            }
            if let Some(templates_path) = catalog.templates_path {
                self.catalog.templates_path = Some(templates_path);
            }
            if let Some(max_plans) = catalog.max_plans {
                self.catalog.max_plans = max_plans;
            }
            if let Some(search_attempts) = catalog.search_attempts {
                self.catalog.search_attempts = search_attempts;
            }
            if let Some(seed) = catalog.seed {
                self.catalog.seed = seed;
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

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ADVISER_DIALOGUE_EXTRACTOR_TIMEOUT_MS") {
            self.dialogue.extractor_timeout_ms =
                parse_u64("ADVISER_DIALOGUE_EXTRACTOR_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("ADVISER_DIALOGUE_GATEWAY_TIMEOUT_MS") {
            self.dialogue.gateway_timeout_ms =
                parse_u64("ADVISER_DIALOGUE_GATEWAY_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("ADVISER_DIALOGUE_MAX_CONSECUTIVE_FAILURES") {
            self.dialogue.max_consecutive_failures =
                parse_limit("ADVISER_DIALOGUE_MAX_CONSECUTIVE_FAILURES", &value)?;
        }

        if let Some(value) = read_env("ADVISER_SESSION_IDLE_TIMEOUT_SECS") {
            self.session.idle_timeout_secs =
                parse_u64("ADVISER_SESSION_IDLE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("ADVISER_SESSION_MAX_ACTIVE_SESSIONS") {
            self.session.max_active_sessions =
                parse_usize("ADVISER_SESSION_MAX_ACTIVE_SESSIONS", &value)?;
        }

        if let Some(value) = read_env("ADVISER_CATALOG_COURSES_PATH") {
            self.catalog.courses_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("ADVISER_CATALOG_TEMPLATES_PATH") {
            self.catalog.templates_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("ADVISER_CATALOG_MAX_PLANS") {
            self.catalog.max_plans = parse_usize("ADVISER_CATALOG_MAX_PLANS", &value)?;
        }
        if let Some(value) = read_env("ADVISER_CATALOG_SEARCH_ATTEMPTS") {
            self.catalog.search_attempts = parse_u32("ADVISER_CATALOG_SEARCH_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("ADVISER_CATALOG_SEED") {
            self.catalog.seed = parse_u64("ADVISER_CATALOG_SEED", &value)?;
        }

        let log_level =
            read_env("ADVISER_LOGGING_LEVEL").or_else(|| read_env("ADVISER_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("ADVISER_LOGGING_FORMAT").or_else(|| read_env("ADVISER_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(courses_path) = overrides.courses_path {
            self.catalog.courses_path = Some(courses_path);
        }
        if let Some(templates_path) = overrides.templates_path {
            self.catalog.templates_path = Some(templates_path);
        }
        if let Some(limit) = overrides.max_consecutive_failures {
            self.dialogue.max_consecutive_failures = Some(limit);
        }
        if let Some(seed) = overrides.seed {
            self.catalog.seed = seed;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_dialogue(&self.dialogue)?;
        validate_session(&self.session)?;
        validate_catalog(&self.catalog)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// Config file the loader would pick up, if any.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
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

fn validate_dialogue(dialogue: &DialogueConfig) -> Result<(), ConfigError> {
    if dialogue.extractor_timeout_ms == 0 || dialogue.extractor_timeout_ms > 60_000 {
        return Err(ConfigError::Validation(
            "dialogue.extractor_timeout_ms must be in range 1..=60000".to_string(),
        ));
    }

    if dialogue.gateway_timeout_ms == 0 || dialogue.gateway_timeout_ms > 300_000 {
        return Err(ConfigError::Validation(
            "dialogue.gateway_timeout_ms must be in range 1..=300000".to_string(),
        ));
    }

    if dialogue.max_consecutive_failures == Some(0) {
        return Err(ConfigError::Validation(
            "dialogue.max_consecutive_failures must be greater than zero, or \"unbounded\""
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.idle_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "session.idle_timeout_secs must be greater than zero".to_string(),
        ));
    }

    if session.max_active_sessions == 0 {
        return Err(ConfigError::Validation(
            "session.max_active_sessions must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_catalog(catalog: &CatalogConfig) -> Result<(), ConfigError> {
    if catalog.max_plans == 0 {
        return Err(ConfigError::Validation(
            "catalog.max_plans must be greater than zero".to_string(),
        ));
    }

    if catalog.search_attempts == 0 || catalog.search_attempts > 50 {
        return Err(ConfigError::Validation(
            "catalog.search_attempts must be in range 1..=50".to_string(),
        ));
    }

    for (key, path) in [
        ("catalog.courses_path", catalog.courses_path.as_ref()),
        ("catalog.templates_path", catalog.templates_path.as_ref()),
    ] {
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::Validation(format!(
                    "{key} points to `{}`, which does not exist",
                    path.display()
                )));
            }
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

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_limit(key: &str, value: &str) -> Result<Option<u32>, ConfigError> {
    if value.trim().eq_ignore_ascii_case("unbounded") {
        return Ok(None);
    }
    parse_u32(key, value).map(Some)
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    dialogue: Option<DialoguePatch>,
    session: Option<SessionPatch>,
    catalog: Option<CatalogPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DialoguePatch {
    extractor_timeout_ms: Option<u64>,
    gateway_timeout_ms: Option<u64>,
    max_consecutive_failures: Option<RetryLimitPatch>,
}

/// Either a positive count or the string `"unbounded"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RetryLimitPatch {
    Count(u32),
    Keyword(String),
}

impl RetryLimitPatch {
    fn into_limit(self, key: &str) -> Result<Option<u32>, ConfigError> {
        match self {
            Self::Count(count) => Ok(Some(count)),
            Self::Keyword(keyword) if keyword.trim().eq_ignore_ascii_case("unbounded") => Ok(None),
            Self::Keyword(keyword) => Err(ConfigError::Validation(format!(
                "{key} must be a positive integer or \"unbounded\", got `{keyword}`"
            ))),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    idle_timeout_secs: Option<u64>,
    max_active_sessions: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogPatch {
    courses_path: Option<PathBuf>,
    templates_path: Option<PathBuf>,
    max_plans: Option<usize>,
    search_attempts: Option<u32>,
    seed: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
