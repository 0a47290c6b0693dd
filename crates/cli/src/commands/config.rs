use std::env;
use std::fs;
use std::path::Path;

use adviser_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
    flag: Option<&'static str>,
}

pub fn run(options: &LoadOptions) -> String {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let overrides = &options.overrides;

    let fields = [
        Field {
            key: "dialogue.extractor_timeout_ms",
            value: config.dialogue.extractor_timeout_ms.to_string(),
            env_keys: &["ADVISER_DIALOGUE_EXTRACTOR_TIMEOUT_MS"],
            flag: None,
        },
        Field {
            key: "dialogue.gateway_timeout_ms",
            value: config.dialogue.gateway_timeout_ms.to_string(),
            env_keys: &["ADVISER_DIALOGUE_GATEWAY_TIMEOUT_MS"],
            flag: None,
        },
        Field {
            key: "dialogue.max_consecutive_failures",
            value: config
                .dialogue
                .max_consecutive_failures
                .map(|limit| limit.to_string())
                .unwrap_or_else(|| "unbounded".to_string()),
            env_keys: &["ADVISER_DIALOGUE_MAX_CONSECUTIVE_FAILURES"],
            flag: overrides.max_consecutive_failures.map(|_| "--max-retries"),
        },
        Field {
            key: "session.idle_timeout_secs",
            value: config.session.idle_timeout_secs.to_string(),
            env_keys: &["ADVISER_SESSION_IDLE_TIMEOUT_SECS"],
            flag: None,
        },
        Field {
            key: "session.max_active_sessions",
            value: config.session.max_active_sessions.to_string(),
            env_keys: &["ADVISER_SESSION_MAX_ACTIVE_SESSIONS"],
            flag: None,
        },
        Field {
            key: "catalog.courses_path",
            value: display_path(config.catalog.courses_path.as_deref(), "<embedded>"),
            env_keys: &["ADVISER_CATALOG_COURSES_PATH"],
            flag: overrides.courses_path.as_ref().map(|_| "--courses"),
        },
        Field {
            key: "catalog.templates_path",
            value: display_path(config.catalog.templates_path.as_deref(), "<built-in>"),
            env_keys: &["ADVISER_CATALOG_TEMPLATES_PATH"],
            flag: overrides.templates_path.as_ref().map(|_| "--templates"),
        },
        Field {
            key: "catalog.max_plans",
            value: config.catalog.max_plans.to_string(),
            env_keys: &["ADVISER_CATALOG_MAX_PLANS"],
            flag: None,
        },
        Field {
            key: "catalog.search_attempts",
            value: config.catalog.search_attempts.to_string(),
            env_keys: &["ADVISER_CATALOG_SEARCH_ATTEMPTS"],
            flag: None,
        },
        Field {
            key: "catalog.seed",
            value: config.catalog.seed.to_string(),
            env_keys: &["ADVISER_CATALOG_SEED"],
            flag: overrides.seed.map(|_| "--seed"),
        },
        Field {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["ADVISER_LOGGING_LEVEL", "ADVISER_LOG_LEVEL"],
            flag: overrides.log_level.as_ref().map(|_| "--log-level"),
        },
        Field {
            key: "logging.format",
            value: format!("{:?}", config.logging.format).to_ascii_lowercase(),
            env_keys: &["ADVISER_LOGGING_FORMAT", "ADVISER_LOG_FORMAT"],
            flag: overrides.log_format.map(|_| "--log-format"),
        },
    ];

    let mut lines =
        vec!["effective config (source precedence: flag > env > file > default):".to_string()];
    lines.extend(fields.iter().map(|field| {
        render_line(
            field.key,
            &field.value,
            field_source(field, config_file_doc.as_ref(), config_file_path.as_deref()),
        )
    }));

    lines.join("\n")
}

fn display_path(path: Option<&Path>, fallback: &str) -> String {
    path.map(|path| path.display().to_string()).unwrap_or_else(|| fallback.to_string())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    field: &Field,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(flag) = field.flag {
        return format!("flag ({flag})");
    }

    if let Some(env_key) = field.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, field.key) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
