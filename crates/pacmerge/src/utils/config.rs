//! Application configuration management utilities.

use crate::errors::CliError;
use camino::{Utf8Path, Utf8PathBuf};
use pac_merge::config::DEFAULT_REDIRECT_SUBPATH;
use pac_merge::mods::DEFAULT_REDIRECTOR_DEPENDENCY;
use pac_merge::{CodecCommands, MergeConfig, MergeLayout};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;

pub const CONFIG_FILE_NAME: &str = "pacmerge.toml";

/// Manifest file looked up in the work directory when `manifest_path` is not set.
const DEFAULT_MANIFEST_NAME: &str = "paths.txt";

/// Application-wide configuration stored in pacmerge.toml.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// Folder holding the game's pristine archives.
    pub game_dir: Option<Utf8PathBuf>,
    /// Folder holding one sub-directory per installed mod.
    pub mods_root: Option<Utf8PathBuf>,
    /// Folder owned by the merger: scratch, state, logs and merged output.
    pub work_dir: Option<Utf8PathBuf>,
    /// Manifest of logical archive paths.
    pub manifest_path: Option<Utf8PathBuf>,
    pub verbose: bool,
    /// Worker threads for merging; unset lets the pool decide.
    pub threads: Option<usize>,
    /// Dependency id a mod must declare to take part in merging.
    pub redirector_dependency: String,
    /// Folder, inside each mod and the work directory, holding redirected archives.
    pub redirect_subpath: String,
    pub codec: CodecCommands,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            game_dir: None,
            mods_root: None,
            work_dir: None,
            manifest_path: None,
            verbose: false,
            threads: None,
            redirector_dependency: DEFAULT_REDIRECTOR_DEPENDENCY.to_string(),
            redirect_subpath: DEFAULT_REDIRECT_SUBPATH.to_string(),
            codec: CodecCommands::default(),
        }
    }
}

/// Keys accepted by [`AppConfig::set`], in display order.
pub const CONFIG_KEYS: &[&str] = &[
    "game_dir",
    "mods_root",
    "work_dir",
    "manifest_path",
    "verbose",
    "threads",
    "redirector_dependency",
    "redirect_subpath",
    "codec.program",
    "codec.decrypt_args",
    "codec.encrypt_args",
    "codec.unpack_args",
    "codec.pack_args",
    "codec.timeout_secs",
];

impl AppConfig {
    /// Update one setting from its string form. An empty value clears optional settings.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), CliError> {
        let value = value.trim();
        match key {
            "game_dir" => self.game_dir = optional_path(value),
            "mods_root" => self.mods_root = optional_path(value),
            "work_dir" => self.work_dir = optional_path(value),
            "manifest_path" => self.manifest_path = optional_path(value),
            "verbose" => {
                self.verbose = parse_bool(value)
                    .ok_or_else(|| CliError::invalid_config_value(key, value, "Use true or false"))?
            }
            "threads" => {
                self.threads = if value.is_empty() {
                    None
                } else {
                    let n = value.parse::<usize>().map_err(|_| {
                        CliError::invalid_config_value(
                            key,
                            value,
                            "Use a whole number (0 = automatic)",
                        )
                    })?;
                    (n > 0).then_some(n)
                }
            }
            "redirector_dependency" => self.redirector_dependency = non_empty(key, value)?,
            "redirect_subpath" => self.redirect_subpath = non_empty(key, value)?,
            "codec.program" => self.codec.program = value.to_string(),
            "codec.decrypt_args" => self.codec.decrypt_args = split_args(value),
            "codec.encrypt_args" => self.codec.encrypt_args = split_args(value),
            "codec.unpack_args" => self.codec.unpack_args = split_args(value),
            "codec.pack_args" => self.codec.pack_args = split_args(value),
            "codec.timeout_secs" => {
                self.codec.timeout_secs = value.parse().map_err(|_| {
                    CliError::invalid_config_value(
                        key,
                        value,
                        "Use a number of seconds (0 = no timeout)",
                    )
                })?
            }
            _ => {
                return Err(CliError::UnknownConfigKey {
                    key: key.to_string(),
                })
            }
        }
        Ok(())
    }

    pub fn require_work_dir(&self) -> Result<&Utf8Path, CliError> {
        self.work_dir
            .as_deref()
            .ok_or_else(|| CliError::setting_missing("work_dir"))
    }

    pub fn require_game_dir(&self) -> Result<&Utf8Path, CliError> {
        self.game_dir
            .as_deref()
            .ok_or_else(|| CliError::setting_missing("game_dir"))
    }

    /// Manifest path, falling back to `paths.txt` in the work directory.
    pub fn resolved_manifest_path(&self) -> Result<Utf8PathBuf, CliError> {
        match &self.manifest_path {
            Some(path) => Ok(path.clone()),
            None => Ok(self.require_work_dir()?.join(DEFAULT_MANIFEST_NAME)),
        }
    }

    /// Filesystem layout derived from the configured folders.
    pub fn layout(&self) -> Result<MergeLayout, CliError> {
        Ok(MergeLayout::new(
            self.require_work_dir()?.to_path_buf(),
            self.require_game_dir()?.to_path_buf(),
        )
        .with_redirect_subpath(self.redirect_subpath.as_str()))
    }

    /// Build the engine configuration.
    pub fn merge_config(&self) -> Result<MergeConfig, CliError> {
        Ok(MergeConfig::new(self.layout()?, self.resolved_manifest_path()?)
            .with_threads(self.threads))
    }

    /// Folder receiving rolling log files, if a work directory is configured.
    pub fn log_dir(&self) -> Option<Utf8PathBuf> {
        self.work_dir.as_ref().map(|dir| dir.join("logs"))
    }
}

fn optional_path(value: &str) -> Option<Utf8PathBuf> {
    (!value.is_empty()).then(|| Utf8PathBuf::from(value))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn non_empty(key: &str, value: &str) -> Result<String, CliError> {
    if value.is_empty() {
        return Err(CliError::invalid_config_value(key, value, "The value cannot be empty"));
    }
    Ok(value.to_string())
}

fn split_args(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

/// Returns the directory where the current executable resides.
pub fn install_dir() -> Option<Utf8PathBuf> {
    let exe = env::current_exe().ok()?;
    let parent = exe.parent()?;
    Utf8PathBuf::from_path_buf(parent.to_path_buf()).ok()
}

/// Returns the default configuration file path (pacmerge.toml next to the executable).
pub fn default_config_path() -> Option<Utf8PathBuf> {
    install_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Resolve the configuration file: the explicit path if given, otherwise the default.
pub fn resolve_config_path(explicit: Option<&Utf8Path>) -> io::Result<Utf8PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => default_config_path().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "Could not determine config path")
        }),
    }
}

/// Load the configuration.
///
/// A missing default file yields the defaults; a missing explicit file is an error.
pub fn load_config(explicit: Option<&Utf8Path>) -> Result<(AppConfig, Utf8PathBuf), CliError> {
    let path = resolve_config_path(explicit)?;
    if !path.exists() {
        if explicit.is_some() {
            return Err(CliError::config_not_found(path));
        }
        return Ok((AppConfig::default(), path));
    }

    let content = fs::read_to_string(path.as_std_path())?;
    let cfg = toml::from_str(&content).map_err(|e| {
        let span = e.span().map(Into::into);
        CliError::config_parse_error(Box::new(e), span)
    })?;
    Ok((cfg, path))
}

/// Save the configuration, creating the parent folder if needed.
pub fn save_config(cfg: &AppConfig, path: &Utf8Path) -> io::Result<()> {
    let content = toml::to_string_pretty(cfg).map_err(io::Error::other)?;
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            fs::create_dir_all(parent.as_std_path())?;
        }
    }
    fs::write(path.as_std_path(), content)
}
