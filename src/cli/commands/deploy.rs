//! Deploy command - run a plan group by group

use crate::cache::{CachingDeployer, DeploymentCache};
use crate::cli::args::{DeployArgs, OutputFormat};
use crate::cli::commands::deps::{detector_for, print_insights};
use crate::config::{Config, ConfigManager};
use crate::deploy::{
    ChartDeployer, ChartSpec, CommandDeployer, DeployOptions, DeployPlan, DeployResult,
    DeployStatus, GroupPlan, ParallelChartDeployer,
};
use crate::error::{ChartpilotError, ChartpilotResult};
use crate::lock::OperationLockRegistry;
use crate::report::DeploymentReport;
use crate::ui::{self, GroupProgress, UiContext};
use async_trait::async_trait;
use console::style;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Ticks the group progress as each chart finishes
struct ProgressDeployer {
    inner: Arc<dyn ChartDeployer>,
    progress: Arc<GroupProgress>,
}

#[async_trait]
impl ChartDeployer for ProgressDeployer {
    async fn deploy(
        &self,
        cancel: &CancellationToken,
        chart: &ChartSpec,
        options: &DeployOptions,
    ) -> DeployResult {
        let result = self.inner.deploy(cancel, chart, options).await;
        self.progress.on_result(&result);
        result
    }
}

/// Execute the deploy command
pub async fn execute(args: DeployArgs, config: &Config) -> ChartpilotResult<()> {
    let mut deploy_config = config.deploy.clone();
    if let Some(concurrency) = args.concurrency {
        deploy_config.max_concurrency = concurrency;
    }
    if let Some(timeout) = args.timeout {
        deploy_config.group_timeout_secs = timeout;
    }
    if deploy_config.max_concurrency == 0 {
        return Err(ChartpilotError::invalid_option(
            "--concurrency",
            "must be at least 1",
        ));
    }

    let plan = DeployPlan::load(&args.plan).await?;
    let groups = select_groups(&plan, &args.groups)?;
    let options = plan.options(args.dry_run, args.force);
    let ctx = UiContext::detect().with_quiet(args.format == OutputFormat::Json);

    let deployer = build_deployer(&plan, config, args.no_cache, &ctx).await?;

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling deployment");
                cancel.cancel();
            }
        })
    };

    let mut report = DeploymentReport::new(&plan.environment, args.dry_run);
    info!(
        deployment_id = %report.deployment_id,
        environment = %plan.environment,
        groups = groups.len(),
        "deployment started"
    );

    let has_dependencies = plan.charts().any(|c| !c.dependencies.is_empty());
    let monitor = if config.monitor.enabled && !args.no_monitor && has_dependencies {
        let detector = detector_for(&plan, &config.monitor).await;
        let token = cancel.child_token();
        let handle = detector.start_monitoring(token.clone(), report.deployment_id.to_string());
        Some((detector, token, handle))
    } else {
        None
    };

    let parallel =
        ParallelChartDeployer::from_config(&deploy_config).with_locks(OperationLockRegistry::new());

    for group in &groups {
        if cancel.is_cancelled() {
            break;
        }

        let progress = Arc::new(GroupProgress::new(&ctx, &group.name, group.charts.len()));
        let tracked: Arc<dyn ChartDeployer> = Arc::new(ProgressDeployer {
            inner: Arc::clone(&deployer),
            progress: Arc::clone(&progress),
        });

        let group_report = parallel
            .deploy_group(&cancel, &group.name, &group.charts, &options, tracked)
            .await?;
        progress.settle(&group_report.results);
        progress.finish();
        print_group(&ctx, &group_report.results);

        let stop = group_report.cancelled.is_some()
            || (group_report.failed() > 0 && !args.keep_going);
        report.push_group(group_report);
        if stop {
            break;
        }
    }

    let (insights, alerts) = match monitor {
        Some((detector, token, handle)) => {
            token.cancel();
            if let Err(e) = handle.await {
                warn!("Dependency monitor ended abnormally: {}", e);
            }
            (detector.get_dependency_insights().await, detector.alerts().await)
        }
        None => (vec![], vec![]),
    };
    report.finish(insights, alerts);
    interrupt.abort();

    if config.general.write_report && !args.no_report {
        if let Some(path) = report.write(&ConfigManager::reports_dir()).await {
            debug!(path = %path.display(), "report saved");
            ui::remark(&ctx, &format!("Report: {}", path.display()));
        }
    }

    print_summary(&ctx, &report, args.format)?;

    if let Some(err) = report.groups.iter().find_map(|g| g.error()) {
        return Err(err);
    }
    match report.failed() {
        0 => Ok(()),
        failed => Err(ChartpilotError::DeploymentFailed { failed }),
    }
}

/// Groups to run, in plan order
fn select_groups<'a>(
    plan: &'a DeployPlan,
    names: &[String],
) -> ChartpilotResult<Vec<&'a GroupPlan>> {
    if names.is_empty() {
        return Ok(plan.groups.iter().collect());
    }
    if let Some(missing) = names.iter().find(|n| plan.group(n).is_none()) {
        return Err(ChartpilotError::invalid_option(
            "--group",
            format!("plan has no group named {}", missing),
        ));
    }
    Ok(plan
        .groups
        .iter()
        .filter(|g| names.contains(&g.name))
        .collect())
}

async fn build_deployer(
    plan: &DeployPlan,
    config: &Config,
    no_cache: bool,
    ctx: &UiContext,
) -> ChartpilotResult<Arc<dyn ChartDeployer>> {
    let command: Arc<dyn ChartDeployer> = match &plan.command {
        Some(template) => Arc::new(CommandDeployer::new(template.clone())?),
        None => Arc::new(CommandDeployer::helm()),
    };

    if !config.cache.enabled || no_cache {
        return Ok(command);
    }

    let cache = DeploymentCache::from_config(&config.cache);
    match cache.initialize().await {
        Ok(loaded) => {
            debug!(loaded, "result cache ready");
            Ok(Arc::new(CachingDeployer::new(command, Arc::new(cache))))
        }
        Err(e) => {
            warn!("Result cache unavailable: {}", e);
            ui::step_warn_hint(ctx, "Result cache unavailable", &e.to_string());
            Ok(command)
        }
    }
}

fn print_group(ctx: &UiContext, results: &[DeployResult]) {
    for result in results {
        match (result.status, &result.error) {
            (DeployStatus::Failed, Some(error)) => {
                ui::step_error_detail(ctx, &result.chart, error)
            }
            (DeployStatus::Skipped, _) => {
                ui::step_info(ctx, &format!("{} skipped", result.chart))
            }
            _ => {}
        }
    }
}

fn print_summary(
    ctx: &UiContext,
    report: &DeploymentReport,
    format: OutputFormat,
) -> ChartpilotResult<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
            return Ok(());
        }
        OutputFormat::Plain => {
            for group in &report.groups {
                for r in &group.results {
                    println!("{} {} {}", group.group, r.chart, r.status);
                }
            }
            return Ok(());
        }
        OutputFormat::Table => {}
    }

    println!();
    println!(
        "{:<16} {:<24} {:<10} {:>10} {:<6}",
        "GROUP", "CHART", "STATUS", "DURATION", "CACHED"
    );
    println!("{}", "-".repeat(70));
    for group in &report.groups {
        for r in &group.results {
            let status = match r.status {
                DeployStatus::Success => style("success").green().to_string(),
                DeployStatus::Failed => style("failed").red().to_string(),
                DeployStatus::Skipped => style("skipped").dim().to_string(),
            };
            println!(
                "{:<16} {:<24} {:<10} {:>8}ms {:<6}",
                group.group,
                r.chart,
                status,
                r.duration.as_millis(),
                if r.cached { "yes" } else { "" }
            );
        }
        if let Some(cause) = group.cancelled {
            println!("{:<16} {}", group.group, style(format!("group {}", cause)).yellow());
        }
    }

    print_insights(ctx, &report.insights);

    let line = format!(
        "{} succeeded ({} cached), {} failed, {} skipped",
        report.succeeded(),
        report.cached(),
        report.failed(),
        report.skipped()
    );
    if report.is_success() {
        ui::outro_success(ctx, &line);
    } else {
        ui::outro_error(ctx, &line);
    }
    Ok(())
}
