use camino::Utf8PathBuf;
use clap::builder::{styling::AnsiColor, Styles};
use clap::ColorChoice;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use commands::{
    cache_info, clear_cache, list_conflicts, lookup_archive, reset_config, run_merge,
    set_config_value, show_config, ConflictsArgs, LookupArgs, MergeArgs,
};
use miette::{IntoDiagnostic, Result};

mod commands;
mod errors;
mod utils;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file to use instead of pacmerge.toml next to the executable
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<Utf8PathBuf>,

    /// Log every per-archive decision
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Merge archives that more than one mod replaces
    Merge {
        /// Contributing mod directory, highest priority first. Repeat for each mod;
        /// when omitted, mods are discovered under mods_root
        #[arg(short = 'm', long = "mod", value_name = "DIR")]
        mods: Vec<Utf8PathBuf>,

        /// Merge even if nothing changed since the last run
        #[arg(short, long)]
        force: bool,
    },
    /// List archives that more than one mod replaces, without merging
    Conflicts {
        /// Contributing mod directory, highest priority first
        #[arg(short = 'm', long = "mod", value_name = "DIR")]
        mods: Vec<Utf8PathBuf>,
    },
    /// Resolve an archive file name to its logical path, or a logical path to its file name
    Lookup {
        /// Obfuscated archive name or logical path
        name: String,
    },
    /// Inspect or clear the unpack cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Show or edit the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show cache and last merge statistics
    Info,
    /// Delete the cache, the last merge record, scratch folders and merged output
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Key to set, e.g. game_dir or codec.program
        key: String,
        /// New value; empty clears optional settings
        value: String,
    },
    /// Reset the configuration to defaults
    Reset,
}

fn parse_args() -> Result<Args> {
    // Configure colored/styled help output
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default())
        .placeholder(AnsiColor::Blue.on_default());

    let matches = Args::command()
        .styles(styles)
        .color(ColorChoice::Auto)
        .get_matches();

    Args::from_arg_matches(&matches).into_diagnostic()
}

fn main() -> Result<()> {
    let args = parse_args()?;
    let explicit_config = args.config.as_deref();

    if let Commands::Config { action } = &args.command {
        return match action {
            ConfigAction::Show => show_config(explicit_config),
            ConfigAction::Set { key, value } => set_config_value(explicit_config, key, value),
            ConfigAction::Reset => reset_config(explicit_config),
        };
    }

    let (cfg, _config_path) = utils::config::load_config(explicit_config)?;
    let log_dir = cfg.log_dir();
    let _log_guard = utils::logging::init_logging(log_dir.as_deref(), cfg.verbose || args.verbose);

    match args.command {
        Commands::Merge { mods, force } => run_merge(&cfg, MergeArgs { mods, force }),
        Commands::Conflicts { mods } => list_conflicts(&cfg, ConflictsArgs { mods }),
        Commands::Lookup { name } => lookup_archive(&cfg, LookupArgs { name }),
        Commands::Cache { action } => match action {
            CacheAction::Info => cache_info(&cfg),
            CacheAction::Clear => clear_cache(&cfg),
        },
        Commands::Config { .. } => Ok(()),
    }
}
