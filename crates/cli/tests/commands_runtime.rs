use std::env;
use std::fs;
use std::io::Cursor;
use std::sync::{Mutex, OnceLock};

use adviser_cli::commands::{catalog, chat, config};
use adviser_core::config::{ConfigOverrides, LoadOptions};
use serde_json::Value;

#[test]
fn config_reports_sources_per_layer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("adviser.toml");
    fs::write(&config_path, "[catalog]\nmax_plans = 2\n").expect("write config");

    with_env(&[("ADVISER_CATALOG_SEARCH_ATTEMPTS", "5")], || {
        let options = LoadOptions {
            config_path: Some(config_path.clone()),
            require_file: true,
            overrides: ConfigOverrides { seed: Some(11), ..ConfigOverrides::default() },
        };
        let output = config::run(&options);

        assert!(output.starts_with("effective config (source precedence: flag > env > file > default):"));
        assert!(output.contains("- catalog.seed = 11 (source: flag (--seed))"));
        assert!(output.contains(
            "- catalog.search_attempts = 5 (source: env (ADVISER_CATALOG_SEARCH_ATTEMPTS))"
        ));
        assert!(output.contains(&format!(
            "- catalog.max_plans = 2 (source: file ({}))",
            config_path.display()
        )));
        assert!(output.contains("- catalog.courses_path = <embedded> (source: default)"));
        assert!(output
            .contains("- dialogue.max_consecutive_failures = unbounded (source: default)"));
    });
}

#[test]
fn config_reports_validation_failure() {
    with_env(&[("ADVISER_CATALOG_SEARCH_ATTEMPTS", "0")], || {
        let output = config::run(&LoadOptions::default());
        assert!(output.starts_with("config validation failed:"), "{output}");
        assert!(output.contains("catalog.search_attempts"));
    });
}

#[test]
fn catalog_json_report_passes_for_embedded_data() {
    with_env(&[], || {
        let result = catalog::run(LoadOptions::default(), true);
        assert_eq!(result.exit_code, 0, "expected all catalog checks to pass");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "pass");
        let checks = payload["checks"].as_array().expect("checks array");
        assert_eq!(checks.len(), 3);
        assert_eq!(checks[1]["name"], "course_catalog");
        assert!(checks[1]["details"]
            .as_str()
            .expect("details")
            .contains("17 courses (10 winter, 7 summer)"));
    });
}

#[test]
fn catalog_fails_for_malformed_course_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let courses = dir.path().join("courses.json");
    fs::write(&courses, r#"{"courses": [{"name": "Syntax"}]}"#).expect("write courses");

    with_env(&[], || {
        let options = LoadOptions {
            overrides: ConfigOverrides {
                courses_path: Some(courses.clone()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        };
        let result = catalog::run(options, false);

        assert_eq!(result.exit_code, 1);
        assert_eq!(result.output.lines().next(), Some("catalog: one or more checks failed"));
        assert!(result.output.contains("- [fail] course_catalog:"));
        assert!(result.output.contains("- [ok] template_catalog:"));
    });
}

#[test]
fn catalog_skips_checks_when_config_is_invalid() {
    with_env(&[("ADVISER_CATALOG_MAX_PLANS", "0")], || {
        let result = catalog::run(LoadOptions::default(), true);
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["checks"][0]["status"], "fail");
        assert_eq!(payload["checks"][1]["status"], "skipped");
        assert_eq!(payload["checks"][2]["status"], "skipped");
    });
}

#[test]
fn chat_runs_a_full_conversation_from_stdin() {
    with_env(&[], || {
        let input = Cursor::new("9\ndon't care\ndon't care\ndon't care\nwinter\nno\n");
        let mut transcript = Vec::new();

        let result = chat::run_with_io(LoadOptions::default(), input, &mut transcript);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let transcript = String::from_utf8(transcript).expect("utf8 transcript");
        assert!(transcript.contains("How many credits would you like to earn?"));
        assert!(transcript.contains("Option 1: to get 9 credits"));
        assert!(transcript.contains("Would you like another round of recommendations?"));
        assert!(last_line(&transcript).ends_with("Glad to talk with you, bye!"));

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "chat");
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().expect("message").ends_with("closed after 6 turn(s)"));
    });
}

#[test]
fn chat_reports_abandoned_conversation_on_eof() {
    with_env(&[], || {
        let mut transcript = Vec::new();
        let result = chat::run_with_io(LoadOptions::default(), Cursor::new(""), &mut transcript);

        assert_eq!(result.exit_code, 0);
        let payload = parse_payload(&result.output);
        assert!(payload["message"]
            .as_str()
            .expect("message")
            .ends_with("abandoned after 0 turn(s)"));
    });
}

#[test]
fn chat_returns_config_failure_for_missing_config_file() {
    with_env(&[], || {
        let options = LoadOptions {
            config_path: Some("does-not-exist/adviser.toml".into()),
            require_file: true,
            ..LoadOptions::default()
        };
        let result = chat::run_with_io(options, Cursor::new(""), Vec::new());

        assert_eq!(result.exit_code, 2, "expected config validation failure code");
        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "ADVISER_DIALOGUE_EXTRACTOR_TIMEOUT_MS",
        "ADVISER_DIALOGUE_GATEWAY_TIMEOUT_MS",
        "ADVISER_DIALOGUE_MAX_CONSECUTIVE_FAILURES",
        "ADVISER_SESSION_IDLE_TIMEOUT_SECS",
        "ADVISER_SESSION_MAX_ACTIVE_SESSIONS",
        "ADVISER_CATALOG_COURSES_PATH",
        "ADVISER_CATALOG_TEMPLATES_PATH",
        "ADVISER_CATALOG_MAX_PLANS",
        "ADVISER_CATALOG_SEARCH_ATTEMPTS",
        "ADVISER_CATALOG_SEED",
        "ADVISER_LOGGING_LEVEL",
        "ADVISER_LOGGING_FORMAT",
        "ADVISER_LOG_LEVEL",
        "ADVISER_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
