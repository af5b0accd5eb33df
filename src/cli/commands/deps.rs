//! Deps command - one round of dependency checks for a plan

use crate::cli::args::{DepsAction, DepsArgs, OutputFormat};
use crate::config::{Config, MonitorConfig};
use crate::deploy::DeployPlan;
use crate::error::ChartpilotResult;
use crate::monitor::{DependencyFailureDetector, DependencyStatus, HealthState, Insight, TcpProbe};
use crate::ui::{self, UiContext};
use console::style;
use serde::Serialize;
use std::sync::Arc;

/// Execute the deps command
pub async fn execute(args: DepsArgs, config: &Config) -> ChartpilotResult<()> {
    match args.action {
        DepsAction::Check { plan, format } => {
            let plan = DeployPlan::load(&plan).await?;
            let detector = detector_for(&plan, &config.monitor).await;
            detector.check_all().await;

            let statuses = detector.statuses().await;
            let insights = detector.get_dependency_insights().await;
            print_report(&statuses, &insights, format)
        }
    }
}

/// Detector with every chart in `plan` registered
pub(crate) async fn detector_for(
    plan: &DeployPlan,
    settings: &MonitorConfig,
) -> Arc<DependencyFailureDetector> {
    let probe = Arc::new(TcpProbe::new(settings.endpoints.clone()));
    let detector = Arc::new(DependencyFailureDetector::new(settings.clone(), probe));
    for chart in plan.charts() {
        detector
            .register_dependency(&chart.name, &chart.dependencies)
            .await;
    }
    detector
}

fn print_report(
    statuses: &[DependencyStatus],
    insights: &[Insight],
    format: OutputFormat,
) -> ChartpilotResult<()> {
    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct DepsJson<'a> {
                dependencies: &'a [DependencyStatus],
                insights: &'a [Insight],
            }
            let json = DepsJson {
                dependencies: statuses,
                insights,
            };
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Plain => {
            for s in statuses {
                println!("{} {}", s.name, s.state);
            }
        }
        OutputFormat::Table => print_table(statuses, insights),
    }
    Ok(())
}

fn print_table(statuses: &[DependencyStatus], insights: &[Insight]) {
    if statuses.is_empty() {
        println!("No dependencies declared in this plan.");
        return;
    }

    println!(
        "{:<28} {:<10} {:<10} {:<10} {:<8}",
        "DEPENDENCY", "KIND", "STATE", "SEVERITY", "LATENCY"
    );
    println!("{}", "-".repeat(70));

    for s in statuses {
        let state = match s.state {
            HealthState::Healthy => style("healthy").green().to_string(),
            HealthState::Unhealthy => style("unhealthy").red().to_string(),
            HealthState::Unknown => style("unknown").dim().to_string(),
        };
        let kind = s.kind.to_string();
        println!(
            "{:<28} {:<10} {:<10} {:<10} {}ms",
            s.name,
            kind.split_whitespace().next().unwrap_or("unknown"),
            state,
            s.severity(),
            s.average_latency.as_millis()
        );
        if s.state != HealthState::Healthy {
            if let Some(check) = s.recent_checks.back() {
                if let Some(ref message) = check.message {
                    println!("    {}", style(message).dim());
                }
            }
        }
    }

    print_insights(&UiContext::detect(), insights);
}

/// Insight titles with their remediation steps
pub(crate) fn print_insights(ctx: &UiContext, insights: &[Insight]) {
    for insight in insights {
        ui::section(ctx, &insight.title);
        ui::step_warn(ctx, &insight.description);
        for fix in &insight.remediation {
            ui::remark(
                ctx,
                &format!(
                    "{} (priority {:?}, effort {:?}, impact {:?})",
                    fix.action, fix.priority, fix.effort, fix.impact
                ),
            );
        }
    }
}
