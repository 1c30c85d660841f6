use chrono::{DateTime, Utc};
use colored::Colorize;
use stackup_core::RecordStatus;
use stackup_core::config::format_duration;
use stackup_core::orchestrator::{OrchestrationResult, RunStatus};
use stackup_core::plan::StartupPlan;
use stackup_core::process::Liveness;
use stackup_core::shutdown::{ShutdownReport, StopOutcome};
use stackup_core::state::ServiceState;
use stackup_core::validator::{GateStatus, Outcome, ValidationSummary};
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Tabled)]
pub struct RuleRow {
    #[tabled(rename = "RULE")]
    pub rule: String,
    #[tabled(rename = "SEVERITY")]
    pub severity: String,
    #[tabled(rename = "RESULT")]
    pub result: String,
    #[tabled(rename = "TIME")]
    pub elapsed: String,
    #[tabled(rename = "MESSAGE")]
    pub message: String,
}

pub fn rule_rows(summary: &ValidationSummary) -> Vec<RuleRow> {
    summary
        .results
        .iter()
        .map(|r| RuleRow {
            rule: r.rule_id.clone(),
            severity: r.severity.as_str().to_string(),
            result: color_outcome(r.outcome, r.severity.is_gating()),
            elapsed: format!("{}ms", r.elapsed.as_millis()),
            message: r.message.clone(),
        })
        .collect()
}

fn color_outcome(outcome: Outcome, gating: bool) -> String {
    match outcome {
        Outcome::Passed => outcome.as_str().green().to_string(),
        Outcome::Failed if gating => outcome.as_str().red().to_string(),
        Outcome::Failed => outcome.as_str().yellow().to_string(),
        Outcome::Skipped => outcome.as_str().dimmed().to_string(),
    }
}

pub fn color_gate(status: GateStatus) -> String {
    match status {
        GateStatus::Ok => status.to_string().green().bold().to_string(),
        GateStatus::Error => status.to_string().yellow().bold().to_string(),
        GateStatus::Critical => status.to_string().red().bold().to_string(),
    }
}

pub fn print_validation(summary: &ValidationSummary) {
    let table = Table::new(rule_rows(summary)).with(Style::blank()).to_string();
    println!("{table}");

    let failed = summary.failed();
    if !failed.is_empty() {
        println!();
        println!("{}", "Remediation:".bold());
        for result in failed {
            if let Some(remediation) = &result.remediation {
                println!("  {} [{}] {}", result.rule_id, result.severity, remediation);
            }
        }
    }

    println!();
    println!("Validation: {}", color_gate(summary.status));
}

#[derive(Tabled)]
pub struct PlanRow {
    #[tabled(rename = "STAGE")]
    pub stage: usize,
    #[tabled(rename = "SERVICE")]
    pub service: String,
    #[tabled(rename = "KIND")]
    pub kind: String,
    #[tabled(rename = "PROBE")]
    pub probe: String,
    #[tabled(rename = "TIMEOUT")]
    pub timeout: String,
    #[tabled(rename = "REQUIRED")]
    pub required: String,
}

pub fn plan_rows(plan: &StartupPlan) -> Vec<PlanRow> {
    plan.services()
        .map(|s| PlanRow {
            stage: s.stage,
            service: s.name.clone(),
            kind: s.start.kind().to_string(),
            probe: s
                .probe
                .as_ref()
                .map(|p| p.target())
                .unwrap_or_else(|| "-".to_string()),
            timeout: format_duration(&s.timeout),
            required: if s.required { "yes" } else { "no" }.to_string(),
        })
        .collect()
}

pub fn print_plan(plan: &StartupPlan) {
    let table = Table::new(plan_rows(plan)).with(Style::blank()).to_string();
    println!("{table}");
}

pub fn color_state(state: ServiceState) -> String {
    let s = state.as_str();
    match state {
        ServiceState::Ready => s.green().to_string(),
        ServiceState::Degraded => s.yellow().to_string(),
        ServiceState::Failed => s.red().to_string(),
        _ => s.to_string(),
    }
}

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "SERVICE")]
    service: String,
    #[tabled(rename = "STATE")]
    state: String,
}

pub fn print_startup(result: &OrchestrationResult) {
    let rows: Vec<ServiceRow> = result
        .services
        .iter()
        .map(|(name, state)| ServiceRow {
            service: name.clone(),
            state: color_state(*state),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::blank()));

    for degraded in &result.degraded {
        println!("{} {}", "degraded:".yellow(), degraded.error);
    }
    if let Some(failed) = &result.failed {
        println!();
        println!("{} {}", "Failed:".red().bold(), failed.error);
        println!("  {}", failed.error.remediation());
    }
    for stuck in &result.rollback_failures {
        println!("{} {}", "still running:".red().bold(), stuck.error);
        println!("  {}", stuck.error.remediation());
    }

    let status = match result.status {
        RunStatus::Ready => result.status.as_str().green().bold(),
        RunStatus::Degraded => result.status.as_str().yellow().bold(),
        RunStatus::Failed | RunStatus::Cancelled => result.status.as_str().red().bold(),
    };
    println!("Stack: {}", status);
}

#[derive(Tabled)]
struct StopRow {
    #[tabled(rename = "SERVICE")]
    service: String,
    #[tabled(rename = "RESULT")]
    result: String,
}

pub fn print_shutdown(report: &ShutdownReport) {
    if report.is_noop() {
        println!("Nothing to stop");
        return;
    }

    let rows: Vec<StopRow> = report
        .services
        .iter()
        .map(|s| StopRow {
            service: s.service.clone(),
            result: if !s.outcome.is_stopped() {
                s.outcome.describe().red().to_string()
            } else if matches!(s.outcome, StopOutcome::PidReused { .. }) {
                s.outcome.describe().yellow().to_string()
            } else {
                s.outcome.describe()
            },
        })
        .collect();
    if !rows.is_empty() {
        println!("{}", Table::new(rows).with(Style::blank()));
    }
    if let Some(compose) = &report.compose {
        match &compose.error {
            None => println!("compose project {} down", compose.project),
            Some(e) => println!("{} {}: {}", "compose down failed".red(), compose.project, e),
        }
    }
}

#[derive(Tabled)]
pub struct StatusRow {
    #[tabled(rename = "SERVICE")]
    pub service: String,
    #[tabled(rename = "STAGE")]
    pub stage: usize,
    #[tabled(rename = "HANDLE")]
    pub handle: String,
    #[tabled(rename = "PORT")]
    pub port: String,
    #[tabled(rename = "UPTIME")]
    pub uptime: String,
    #[tabled(rename = "STATE")]
    pub state: String,
}

pub fn status_rows(records: &[RecordStatus], now: DateTime<Utc>) -> Vec<StatusRow> {
    records
        .iter()
        .map(|r| StatusRow {
            service: r.service.clone(),
            stage: r.stage,
            handle: r.handle.clone(),
            port: r.port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            uptime: format_uptime(r.started_at, now),
            state: match r.liveness {
                Liveness::Alive => r.liveness.as_str().green().to_string(),
                Liveness::Gone => r.liveness.as_str().dimmed().to_string(),
                Liveness::Reused => r.liveness.as_str().yellow().to_string(),
            },
        })
        .collect()
}

pub fn print_status(records: &[RecordStatus]) {
    if records.is_empty() {
        println!("No services tracked");
        return;
    }
    let table = Table::new(status_rows(records, Utc::now()))
        .with(Style::blank())
        .to_string();
    println!("{table}");
}

pub fn format_uptime(started_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - started_at).num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}
