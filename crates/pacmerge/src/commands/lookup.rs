use crate::errors::CliError;
use crate::println_pad;
use crate::utils::config::AppConfig;
use colored::Colorize;
use pac_merge::{normalize_manifest_line, obfuscate_path, PathCatalog};

pub struct LookupArgs {
    pub name: String,
}

/// Resolve an obfuscated archive name to its logical path, or a logical path
/// to the name it is stored under.
pub fn lookup_archive(cfg: &AppConfig, args: LookupArgs) -> miette::Result<()> {
    let manifest_path = cfg.resolved_manifest_path()?;
    let catalog = PathCatalog::load(&manifest_path).map_err(CliError::from)?;

    let input = args.name.trim();
    if let Some(entry) = catalog.find_archive(input) {
        println_pad!("{} {}", "Key:".bright_white(), entry.obfuscated_key.bright_cyan());
        println_pad!("{} {}", "Path:".bright_white(), entry.logical_path.bright_green());
        return Ok(());
    }

    if !looks_like_key(input) {
        if let Some(normalized) = normalize_manifest_line(input) {
            let key = obfuscate_path(&normalized);
            let known = catalog.find_by_key(&key).is_some();
            println_pad!("{} {}", "Path:".bright_white(), normalized.bright_green());
            println_pad!("{} {}", "Key:".bright_white(), key.bright_cyan());
            if !known {
                println_pad!("{}", "(not listed in the path catalog)".dimmed());
            }
            return Ok(());
        }
    }

    println_pad!(
        "{} {}",
        "✗ Not found:".bright_red().bold(),
        input.bright_white()
    );
    Ok(())
}

/// Whether `name` is an obfuscated key (32 hex digits), with or without an extension.
fn looks_like_key(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name);
    stem.len() == 32 && stem.chars().all(|c| c.is_ascii_hexdigit())
}
