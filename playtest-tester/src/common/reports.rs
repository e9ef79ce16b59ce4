use anyhow::Result;
use colored::Colorize;
use std::io::Write;
use std::time::Duration;

use playtest_core::{IterationOutcome, RunSummary};

fn outcome_badge(outcome: IterationOutcome) -> &'static str {
    match outcome {
        IterationOutcome::Victory => "🏆",
        IterationOutcome::Death => "💀",
        IterationOutcome::Timeout => "⏱️",
        IterationOutcome::Error => "❌",
    }
}

pub fn generate_console_report<W: Write>(
    out: &mut W,
    summary: &RunSummary,
    total_duration: Duration,
) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", "📊 Playtest Summary".bright_cyan().bold())?;
    writeln!(out, "{}", "===================".cyan())?;

    writeln!(out, "Game: {}", summary.game.bold())?;
    writeln!(out, "Test type: {}", summary.test_type)?;
    writeln!(out, "Agent: {}", summary.agent_id)?;
    writeln!(
        out,
        "Iterations: {}/{} completed",
        summary.iterations_completed, summary.iterations_planned
    )?;
    let counts = &summary.outcomes;
    writeln!(out, "Victories: {}", counts.victory.to_string().green())?;
    writeln!(out, "Deaths: {}", counts.death.to_string().yellow())?;
    writeln!(out, "Timeouts: {}", counts.timeout.to_string().yellow())?;
    writeln!(out, "Errors: {}", counts.error.to_string().red())?;
    writeln!(out, "Reloads: {} (recoveries: {})", summary.reloads, summary.recoveries)?;
    writeln!(out, "Total time: {total_duration:?}")?;
    writeln!(out)?;

    for log in &summary.iterations {
        writeln!(
            out,
            "{} iteration {:03} {} after {} step(s) in {} ms",
            outcome_badge(log.outcome),
            log.iteration,
            log.outcome.label().bold(),
            log.steps,
            log.duration_ms
        )?;
        if let Some(error) = &log.error {
            writeln!(out, "     • {}", error.red())?;
        }
        let violations = log.metrics.get("invariant_violations").copied().unwrap_or(0.0);
        if violations > 0.0 {
            writeln!(out, "     • {} invariant violation(s)", violations.to_string().red())?;
        }
    }

    if !summary.totals.is_empty() {
        writeln!(out)?;
        writeln!(out, "{}", "📈 Metric Totals".bright_yellow().bold())?;
        writeln!(out, "{}", "================".yellow())?;
        for (name, value) in &summary.totals {
            writeln!(out, "{name:24} {value}")?;
        }
    }

    if summary.aborted {
        writeln!(out)?;
        writeln!(
            out,
            "{} {}",
            "🛑 Run aborted:".red().bold(),
            summary.abort_reason.as_deref().unwrap_or("unknown reason")
        )?;
    }
    Ok(())
}

pub fn generate_json_report<W: Write>(out: &mut W, summary: &RunSummary) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, summary)?;
    writeln!(out)?;
    Ok(())
}

pub fn generate_markdown_report<W: Write>(out: &mut W, summary: &RunSummary) -> Result<()> {
    writeln!(out, "# Playtest Results: {}\n", summary.game)?;

    writeln!(out, "## Summary\n")?;
    writeln!(out, "- **Test type**: {}", summary.test_type)?;
    writeln!(out, "- **Agent**: {}", summary.agent_id)?;
    writeln!(
        out,
        "- **Iterations**: {}/{} completed",
        summary.iterations_completed, summary.iterations_planned
    )?;
    let counts = &summary.outcomes;
    writeln!(
        out,
        "- **Outcomes**: {} victory, {} death, {} timeout, {} error",
        counts.victory, counts.death, counts.timeout, counts.error
    )?;
    if let Some(reason) = &summary.abort_reason {
        writeln!(out, "- **Aborted**: {reason}")?;
    }
    writeln!(out)?;

    writeln!(out, "## Iterations\n")?;
    writeln!(out, "| # | Outcome | Steps | Duration (ms) | Error |")?;
    writeln!(out, "|---|---------|-------|---------------|-------|")?;
    for log in &summary.iterations {
        writeln!(
            out,
            "| {} | {} {} | {} | {} | {} |",
            log.iteration,
            outcome_badge(log.outcome),
            log.outcome,
            log.steps,
            log.duration_ms,
            log.error.as_deref().unwrap_or("")
        )?;
    }

    if !summary.totals.is_empty() {
        writeln!(out, "\n## Metric Totals\n")?;
        for (name, value) in &summary.totals {
            writeln!(out, "- `{name}`: {value}")?;
        }
    }
    Ok(())
}
