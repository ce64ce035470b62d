use leadline_core::catalog::ToolCatalog;
use leadline_core::config::{AppConfig, LoadOptions};
use leadline_core::validation::RuleRegistry;
use serde::Serialize;

use crate::commands::{CommandResult, EXIT_FAILED};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_FAILED };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: format!(
                    "configuration loaded and validated (llm provider `{}`, model `{}`)",
                    config.llm.provider.as_str(),
                    config.llm.model
                ),
            });
            Some(config)
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            None
        }
    };

    // The catalog check runs even without valid config so a broken override still shows up
    let catalog_path = config.as_ref().and_then(|config| config.gateway.catalog_path.clone());
    match ToolCatalog::load(catalog_path.as_deref()) {
        Ok(catalog) => {
            checks.push(DoctorCheck {
                name: "catalog_load",
                status: CheckStatus::Pass,
                details: format!("{} tools loaded", catalog.len()),
            });
            checks.push(check_rule_coverage(&catalog, &RuleRegistry::builtin()));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "catalog_load",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(DoctorCheck {
                name: "rule_catalog_consistency",
                status: CheckStatus::Skipped,
                details: "skipped because the catalog did not load".to_string(),
            });
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Every validation rule must name a tool the model can actually propose.
fn check_rule_coverage(catalog: &ToolCatalog, rules: &RuleRegistry) -> DoctorCheck {
    let mut orphaned =
        rules.tool_names().filter(|name| !catalog.contains(name)).map(str::to_string).collect::<Vec<_>>();
    orphaned.sort();

    if orphaned.is_empty() {
        DoctorCheck {
            name: "rule_catalog_consistency",
            status: CheckStatus::Pass,
            details: "every validation rule targets a catalog tool".to_string(),
        }
    } else {
        DoctorCheck {
            name: "rule_catalog_consistency",
            status: CheckStatus::Fail,
            details: format!("rules reference tools missing from the catalog: {}", orphaned.join(", ")),
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
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
