//! Step and summary lines with a plain fallback for CI logs

use super::context::UiContext;
use console::{style, StyledObject};

fn marker(
    ctx: &UiContext,
    fancy: StyledObject<&'static str>,
    plain: StyledObject<&'static str>,
) -> String {
    if ctx.use_fancy_output() {
        fancy.to_string()
    } else {
        plain.to_string()
    }
}

/// Section header
pub fn section(ctx: &UiContext, title: &str) {
    if ctx.is_quiet() {
        return;
    }
    println!();
    println!("{}", style(title).bold());
}

pub fn step_ok(ctx: &UiContext, message: &str) {
    if ctx.is_quiet() {
        return;
    }
    let mark = marker(ctx, style("✓").green(), style("[OK]").green());
    println!("  {} {}", mark, message);
}

pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    if ctx.is_quiet() {
        return;
    }
    let mark = marker(ctx, style("✓").green(), style("[OK]").green());
    println!("  {} {} ({})", mark, message, style(detail).dim());
}

pub fn step_warn(ctx: &UiContext, message: &str) {
    if ctx.is_quiet() {
        return;
    }
    let mark = marker(ctx, style("!").yellow(), style("[WARN]").yellow());
    println!("  {} {}", mark, message);
}

pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    if ctx.is_quiet() {
        return;
    }
    let mark = marker(ctx, style("!").yellow(), style("[WARN]").yellow());
    println!("  {} {} - {}", mark, message, style(hint).dim());
}

pub fn step_error_detail(ctx: &UiContext, message: &str, detail: &str) {
    if ctx.is_quiet() {
        return;
    }
    let mark = marker(ctx, style("✗").red(), style("[FAIL]").red());
    println!("  {} {}: {}", mark, message, style(detail).red());
}

pub fn step_info(ctx: &UiContext, message: &str) {
    if ctx.is_quiet() {
        return;
    }
    let mark = marker(ctx, style("·").cyan(), style("[INFO]").cyan());
    println!("  {} {}", mark, message);
}

/// Dimmed follow-up line
pub fn remark(ctx: &UiContext, message: &str) {
    if ctx.is_quiet() {
        return;
    }
    println!("    {}", style(message).dim());
}

pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    if ctx.is_quiet() {
        return;
    }
    println!("  {}: {}", style(key).dim(), value);
}

/// Closing line for a successful run
pub fn outro_success(ctx: &UiContext, message: &str) {
    if ctx.is_quiet() {
        return;
    }
    println!();
    println!("{}", style(message).green().bold());
}

/// Closing line for a failed run
pub fn outro_error(ctx: &UiContext, message: &str) {
    if ctx.is_quiet() {
        return;
    }
    println!();
    println!("{}", style(message).red().bold());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_non_interactive() {
        let ctx = UiContext::non_interactive();
        section(&ctx, "Group web");
        step_ok(&ctx, "ui deployed");
        step_warn_hint(&ctx, "cache unavailable", "check permissions");
        step_error_detail(&ctx, "api", "exit status 1");
        outro_error(&ctx, "1 chart failed");
    }

    #[test]
    fn quiet_prints_nothing() {
        let ctx = UiContext::non_interactive().with_quiet(true);
        step_ok(&ctx, "hidden");
        key_value(&ctx, "key", "value");
    }
}
