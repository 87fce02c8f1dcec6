use crate::errors::CliError;
use crate::utils::config::{self, AppConfig, CONFIG_KEYS};
use camino::{Utf8Path, Utf8PathBuf};
use colored::Colorize;
use miette::Result;

/// Print a config path entry with status indicator
fn print_path_config(
    name: &str,
    path: Option<&Utf8PathBuf>,
    validator: impl Fn(&Utf8PathBuf) -> bool,
) {
    match path {
        Some(p) => {
            let status = if validator(p) {
                "✓".bright_green()
            } else {
                "✗".bright_red()
            };
            println!("  {} {} {}", format!("{}:", name).bright_white(), p, status);
        }
        None => {
            println!(
                "  {} {}",
                format!("{}:", name).bright_white(),
                "(not set)".bright_yellow()
            );
        }
    }
}

fn print_value(name: &str, value: impl std::fmt::Display) {
    println!("  {} {}", format!("{}:", name).bright_white(), value);
}

pub fn show_config(explicit: Option<&Utf8Path>) -> Result<()> {
    let (cfg, config_path) = config::load_config(explicit)?;

    println!();
    println!("  {} {}", "config_file:".bright_white(), config_path);

    print_path_config("game_dir", cfg.game_dir.as_ref(), |p| p.is_dir());
    print_path_config("mods_root", cfg.mods_root.as_ref(), |p| p.is_dir());
    print_path_config("work_dir", cfg.work_dir.as_ref(), |p| p.is_dir());
    match cfg.resolved_manifest_path() {
        Ok(path) => print_path_config("manifest_path", Some(&path), |p| p.is_file()),
        Err(_) => print_path_config("manifest_path", None, |_| false),
    }
    print_value("verbose", cfg.verbose);
    print_value(
        "threads",
        cfg.threads
            .map(|n| n.to_string())
            .unwrap_or_else(|| "auto".to_string()),
    );
    print_value("redirector_dependency", &cfg.redirector_dependency);
    print_value("redirect_subpath", &cfg.redirect_subpath);
    print_value("codec.program", &cfg.codec.program);
    print_value("codec.decrypt_args", cfg.codec.decrypt_args.join(" "));
    print_value("codec.encrypt_args", cfg.codec.encrypt_args.join(" "));
    print_value("codec.unpack_args", cfg.codec.unpack_args.join(" "));
    print_value("codec.pack_args", cfg.codec.pack_args.join(" "));
    print_value("codec.timeout_secs", cfg.codec.timeout_secs);

    println!();
    Ok(())
}

pub fn set_config_value(explicit: Option<&Utf8Path>, key: &str, value: &str) -> Result<()> {
    let (mut cfg, config_path) = load_for_edit(explicit)?;
    cfg.set(key, value)?;
    config::save_config(&cfg, &config_path).map_err(CliError::from)?;

    println!("{}", "✓ Configuration updated".bright_green().bold());
    println!();
    println!("  {} {}", format!("{}:", key).bright_white(), value.bright_green());
    Ok(())
}

pub fn reset_config(explicit: Option<&Utf8Path>) -> Result<()> {
    let config_path = config::resolve_config_path(explicit).map_err(CliError::from)?;
    config::save_config(&AppConfig::default(), &config_path)
        .map_err(|e| miette::miette!("Failed to reset config: {}", e))?;

    println!("{}", "✓ Configuration reset to defaults".bright_green().bold());
    println!();
    println!("  {} {}", "Config file:".bright_white().bold(), config_path);
    println!();
    println!(
        "  {}",
        format!("Available keys: {}", CONFIG_KEYS.join(", ")).bright_cyan()
    );
    Ok(())
}

/// Load the file to edit. Unlike reading, `set` may create a file at an explicit path.
fn load_for_edit(explicit: Option<&Utf8Path>) -> Result<(AppConfig, Utf8PathBuf), CliError> {
    match config::load_config(explicit) {
        Err(CliError::ConfigNotFound { path }) => Ok((AppConfig::default(), path)),
        other => other,
    }
}
