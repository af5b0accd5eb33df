//! Deployment progress with CI fallback

use super::context::UiContext;
use crate::deploy::{DeployResult, DeployStatus};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const BAR_TEMPLATE: &str =
    "  {spinner:.cyan} {prefix}  {bar:20.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}";

/// Progress of one chart group
///
/// An indicatif bar in interactive mode; one line per finished chart
/// otherwise.
pub struct GroupProgress {
    bar: Option<ProgressBar>,
    quiet: bool,
    reported: Mutex<HashSet<String>>,
}

impl GroupProgress {
    pub fn new(ctx: &UiContext, group: &str, total: usize) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new(total as u64);
            let template = ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                .progress_chars("━╸─");
            bar.set_style(template);
            bar.set_prefix(group.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            Some(bar)
        } else {
            if !ctx.is_quiet() {
                println!("Deploying group {} ({} charts)...", group, total);
            }
            None
        };
        Self {
            bar,
            quiet: ctx.is_quiet(),
            reported: Mutex::new(HashSet::new()),
        }
    }

    /// Record a finished chart; a chart already recorded is ignored
    pub fn on_result(&self, result: &DeployResult) {
        let fresh = self
            .reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(result.chart.clone());
        if !fresh {
            return;
        }

        if let Some(ref bar) = self.bar {
            bar.inc(1);
            bar.set_message(result.chart.clone());
            return;
        }
        if self.quiet {
            return;
        }

        let label = match (result.status, result.cached) {
            (DeployStatus::Success, true) => style("[CACHED]").cyan(),
            (DeployStatus::Success, false) => style("[OK]").green(),
            (DeployStatus::Failed, _) => style("[FAIL]").red(),
            (DeployStatus::Skipped, _) => style("[SKIP]").dim(),
        };
        println!("  {} {} ({}ms)", label, result.chart, result.duration.as_millis());
    }

    /// Record every result the deployer never saw, such as charts
    /// cancelled while still queued
    pub fn settle(&self, results: &[DeployResult]) {
        for result in results {
            self.on_result(result);
        }
    }

    /// Charts recorded so far
    pub fn reported(&self) -> usize {
        self.reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Finish and clear the bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

impl Drop for GroupProgress {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::CancelCause;
    use chrono::Utc;

    #[test]
    fn plain_progress_prints_lines() {
        let ctx = UiContext::non_interactive();
        let progress = GroupProgress::new(&ctx, "web", 2);
        progress.on_result(&DeployResult::success("ui", Utc::now(), Duration::from_millis(5)));
        progress.on_result(&DeployResult::failed(
            "api",
            Utc::now(),
            Duration::from_millis(5),
            "boom",
        ));
        progress.finish();
    }

    #[test]
    fn settle_counts_charts_the_deployer_never_ran() {
        let ctx = UiContext::non_interactive().with_quiet(true);
        let progress = GroupProgress::new(&ctx, "web", 3);
        let ui = DeployResult::success("ui", Utc::now(), Duration::from_millis(5));
        progress.on_result(&ui);

        progress.settle(&[
            ui,
            DeployResult::cancelled("api", Utc::now(), CancelCause::Cancelled),
            DeployResult::cancelled("admin", Utc::now(), CancelCause::Cancelled),
        ]);

        assert_eq!(progress.reported(), 3);
    }
}
