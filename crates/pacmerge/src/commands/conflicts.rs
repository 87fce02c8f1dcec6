use crate::commands::merge::build_codec;
use crate::commands::resolve_mod_dirs;
use crate::errors::CliError;
use crate::println_pad;
use crate::utils::config::AppConfig;
use camino::Utf8PathBuf;
use colored::Colorize;
use pac_merge::{MergeEngine, PathCatalog};
use std::sync::Arc;

pub struct ConflictsArgs {
    pub mods: Vec<Utf8PathBuf>,
}

/// List archives replaced by more than one mod, without merging anything.
pub fn list_conflicts(cfg: &AppConfig, args: ConflictsArgs) -> miette::Result<()> {
    let merge_config = cfg.merge_config()?;
    let mod_dirs = resolve_mod_dirs(cfg, args.mods)?;
    let catalog = PathCatalog::load(&merge_config.manifest_path).map_err(CliError::from)?;
    let codec = build_codec(cfg)?;

    let engine = MergeEngine::new(merge_config, catalog, Arc::new(codec));
    let plan = engine.plan(&mod_dirs).map_err(CliError::from)?;

    if plan.is_empty() {
        println!(
            "{}",
            "✓ No archive is replaced by more than one mod".bright_green().bold()
        );
        return Ok(());
    }

    println!(
        "{} {}",
        plan.len().to_string().bright_cyan().bold(),
        "archive(s) need merging:".bright_cyan()
    );
    for planned in &plan {
        println!();
        match &planned.logical_path {
            Some(logical) => println_pad!(
                "{} {}",
                logical.bright_white().bold(),
                format!("({})", planned.archive_name).dimmed()
            ),
            None => println_pad!(
                "{} {}",
                planned.archive_name.bright_yellow().bold(),
                "(not in path catalog, will be skipped)".dimmed()
            ),
        }
        for (i, contributor) in planned.contributors.iter().enumerate() {
            println_pad!("  {} {}", format!("{}.", i + 1).dimmed(), contributor);
        }
    }

    Ok(())
}
