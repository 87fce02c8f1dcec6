use crate::commands::resolve_mod_dirs;
use crate::errors::CliError;
use crate::println_pad;
use crate::utils::config::AppConfig;
use crate::utils::format_elapsed;
use camino::{Utf8Path, Utf8PathBuf};
use colored::Colorize;
use pac_merge::{
    CommandCodec, MergeEngine, MergeProgress, MergeReport, MergeStage, PathCatalog,
};
use std::sync::Arc;

pub struct MergeArgs {
    pub mods: Vec<Utf8PathBuf>,
    pub force: bool,
}

pub fn run_merge(cfg: &AppConfig, args: MergeArgs) -> miette::Result<()> {
    let merge_config = cfg.merge_config()?;
    let mod_dirs = resolve_mod_dirs(cfg, args.mods)?;
    let codec = build_codec(cfg)?;
    let catalog = PathCatalog::load(&merge_config.manifest_path).map_err(CliError::from)?;

    println!(
        "{} {} contributing mod(s)",
        "Merging".bright_cyan().bold(),
        mod_dirs.len()
    );

    let engine = MergeEngine::new(merge_config, catalog, Arc::new(codec))
        .with_force(args.force)
        .with_progress(print_progress);
    let report = engine.run(&mod_dirs).map_err(CliError::from)?;

    print_report(&report);
    Ok(())
}

/// Codec for the configured archive tool. A program given as a path must exist.
pub(crate) fn build_codec(cfg: &AppConfig) -> Result<CommandCodec, CliError> {
    let program = cfg.codec.program.trim();
    let looks_like_path = program.contains('/') || program.contains('\\');
    if program.is_empty() || (looks_like_path && !Utf8Path::new(program).is_file()) {
        return Err(CliError::CodecNotConfigured {
            program: program.to_string(),
        });
    }
    Ok(CommandCodec::new(cfg.codec.clone()))
}

fn print_progress(progress: MergeProgress) {
    if progress.stage != MergeStage::Merging {
        return;
    }
    if let Some(name) = &progress.current_file {
        println_pad!(
            "{} {}",
            format!("[{}/{}]", progress.current, progress.total).dimmed(),
            name
        );
    }
}

fn print_report(report: &MergeReport) {
    println!();
    if report.short_circuited {
        println!(
            "{}",
            "✓ Nothing changed since the last merge".bright_green().bold()
        );
        println_pad!("{} {}", "Elapsed:".bright_white(), format_elapsed(report.elapsed));
        return;
    }

    let published = report.published().collect::<Vec<_>>();
    let skipped = report.skipped().collect::<Vec<_>>();

    if !published.is_empty() {
        println!("{}", "Published:".bright_green().bold());
        for (name, output) in &published {
            println_pad!(
                "{} {} {}",
                "•".bright_green(),
                name.bright_white(),
                format!("-> {}", output).dimmed()
            );
        }
    }

    if !skipped.is_empty() {
        println!("{}", "Skipped:".bright_yellow().bold());
        for (name, reason) in &skipped {
            let bullet = if reason.is_failure() {
                "✗".bright_red()
            } else {
                "•".bright_yellow()
            };
            println_pad!("{} {} {}", bullet, name, format!("({})", reason).dimmed());
        }
    }

    if !report.conflicts.is_empty() {
        println!("{}", "Conflicts:".bright_magenta().bold());
        for conflict in &report.conflicts {
            println_pad!(
                "{} {} in {}",
                "•".bright_magenta(),
                conflict.member.bright_white(),
                conflict.archive
            );
            println_pad!("    {} {}", "using".bright_green(), conflict.winner);
            for overridden in &conflict.overridden {
                println_pad!("    {} {}", "dropped".bright_red(), overridden);
            }
        }
    }

    println!();
    println_pad!(
        "{} {}  {} {}  {} {}  {} {}",
        "published:".bright_white(),
        published.len(),
        "unchanged:".bright_white(),
        report.count_no_change(),
        "skipped:".bright_white(),
        skipped.len(),
        "conflicts:".bright_white(),
        report.conflicts.len()
    );
    println_pad!("{} {}", "Elapsed:".bright_white(), format_elapsed(report.elapsed));

    if !report.succeeded() {
        println!();
        println_pad!(
            "{}",
            "Some archives failed and will be retried on the next run. Re-run with --verbose for details."
                .bright_yellow()
        );
    }
}
