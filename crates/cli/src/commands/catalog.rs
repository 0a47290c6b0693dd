use adviser_agent::{CourseCatalog, TemplateCatalog};
use adviser_core::config::{AppConfig, CatalogConfig, LoadOptions};
use adviser_core::Semester;
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct CatalogCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct CatalogReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<CatalogCheck>,
}

/// Exit code 0 when every check passes, 1 otherwise.
pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"catalog report serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(options: LoadOptions) -> CatalogReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(CatalogCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_courses(&config.catalog));
            checks.push(check_templates(&config.catalog));
        }
        Err(error) => {
            checks.push(CatalogCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["course_catalog", "template_catalog"] {
                checks.push(CatalogCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "catalog: all checks passed".to_string()
    } else {
        "catalog: one or more checks failed".to_string()
    };

    CatalogReport { overall_status, summary, checks }
}

fn check_courses(config: &CatalogConfig) -> CatalogCheck {
    let source = config
        .courses_path
        .as_ref()
        .map(|path| format!("`{}`", path.display()))
        .unwrap_or_else(|| "embedded catalog".to_string());

    match CourseCatalog::from_config(config) {
        Ok(catalog) if catalog.is_empty() => CatalogCheck {
            name: "course_catalog",
            status: CheckStatus::Fail,
            details: format!("{source} contains no courses"),
        },
        Ok(catalog) => CatalogCheck {
            name: "course_catalog",
            status: CheckStatus::Pass,
            details: format!(
                "{source}: {} courses ({} winter, {} summer)",
                catalog.len(),
                catalog.count_for(Semester::Winter),
                catalog.count_for(Semester::Summer)
            ),
        },
        Err(error) => CatalogCheck {
            name: "course_catalog",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_templates(config: &CatalogConfig) -> CatalogCheck {
    match TemplateCatalog::from_config(config) {
        Ok(templates) => {
            let missing = templates.missing_keys();
            if missing.is_empty() {
                CatalogCheck {
                    name: "template_catalog",
                    status: CheckStatus::Pass,
                    details: format!("{} templates compiled", templates.len()),
                }
            } else {
                let keys = missing.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
                CatalogCheck {
                    name: "template_catalog",
                    status: CheckStatus::Fail,
                    details: format!("missing templates: {keys}"),
                }
            }
        }
        Err(error) => CatalogCheck {
            name: "template_catalog",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn render_human(report: &CatalogReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
