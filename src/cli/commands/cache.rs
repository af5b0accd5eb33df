//! Cache command - inspect and clean the deployment result cache

use crate::cache::{CacheStats, DeploymentCache};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::ChartpilotResult;
use crate::ui::{self, UiContext};
use console::style;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> ChartpilotResult<()> {
    let cache = DeploymentCache::from_config(&config.cache);

    match args.action {
        CacheAction::Stats { format } => {
            cache.initialize().await?;
            print_stats(&cache.stats().await, format)
        }
        CacheAction::Prune => {
            cache.initialize().await?;
            let removed = cache.clear_expired().await;
            let ctx = UiContext::detect();
            ui::step_ok(&ctx, &format!("Removed {} expired entries", removed));
            Ok(())
        }
        CacheAction::Clear => {
            cache.clear().await?;
            let ctx = UiContext::detect();
            ui::step_ok_detail(&ctx, "Cache cleared", &cache.dir().display().to_string());
            Ok(())
        }
    }
}

fn print_stats(stats: &CacheStats, format: OutputFormat) -> ChartpilotResult<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(stats)?),
        OutputFormat::Plain => {
            println!("total={}", stats.total_entries);
            println!("valid={}", stats.valid_entries);
            println!("expired={}", stats.expired_entries);
            println!("dir={}", stats.cache_dir.display());
            println!("ttl_secs={}", stats.ttl_secs);
        }
        OutputFormat::Table => {
            println!("{}", style("Deployment cache").bold());
            println!("  {:<12} {}", "Directory:", stats.cache_dir.display());
            println!("  {:<12} {}s", "TTL:", stats.ttl_secs);
            println!("  {:<12} {}", "Entries:", stats.total_entries);
            println!("  {:<12} {}", "Valid:", style(stats.valid_entries).green());
            println!("  {:<12} {}", "Expired:", style(stats.expired_entries).dim());
        }
    }
    Ok(())
}
