//! Discovery of contributing mods.
//!
//! A mod directory carries a `ModConfig.json` describing it. Only mods that
//! declare a dependency on the file redirector ship redirected archives, so
//! only those take part in a merge.

use crate::error::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

/// Dependency id that marks a mod as shipping redirected archives.
pub const DEFAULT_REDIRECTOR_DEPENDENCY: &str = "reloaded.universal.redirector";

const MOD_CONFIG_FILE: &str = "ModConfig.json";

/// The fields of `ModConfig.json` the merger cares about.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModConfig {
    pub mod_id: String,
    #[serde(default)]
    pub mod_name: String,
    #[serde(default)]
    pub mod_dependencies: Vec<String>,
}

impl ModConfig {
    pub fn depends_on(&self, dependency: &str) -> bool {
        self.mod_dependencies
            .iter()
            .any(|d| d.eq_ignore_ascii_case(dependency))
    }
}

/// A mod directory found under the mods root.
#[derive(Debug, Clone)]
pub struct DiscoveredMod {
    pub dir: Utf8PathBuf,
    pub config: ModConfig,
}

impl DiscoveredMod {
    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.config.mod_name.is_empty() {
            &self.config.mod_id
        } else {
            &self.config.mod_name
        }
    }
}

/// Read a mod's `ModConfig.json`.
pub fn read_mod_config(mod_dir: &Utf8Path) -> Result<ModConfig> {
    let contents = std::fs::read_to_string(mod_dir.join(MOD_CONFIG_FILE).as_std_path())?;
    Ok(serde_json::from_str(&contents)?)
}

/// List the mods under `mods_root` that depend on `dependency`, in directory
/// name order.
///
/// Directories in `exclude` (typically the merger's own work directory) are
/// never returned. Directories without a readable config are skipped.
pub fn discover_mods(
    mods_root: &Utf8Path,
    dependency: &str,
    exclude: &[Utf8PathBuf],
) -> Result<Vec<DiscoveredMod>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(mods_root.as_std_path())? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        dirs.push(Utf8PathBuf::from_path_buf(entry.path()).map_err(Error::NonUtf8Path)?);
    }
    dirs.sort();

    let mut mods = Vec::new();
    for dir in dirs {
        if exclude.iter().any(|e| same_dir(e, &dir)) {
            continue;
        }
        if !dir.join(MOD_CONFIG_FILE).is_file() {
            tracing::debug!("No {} in {}, skipping", MOD_CONFIG_FILE, dir);
            continue;
        }

        let config = match read_mod_config(&dir) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Skipping mod {}: {}", dir, e);
                continue;
            }
        };

        if !config.depends_on(dependency) {
            tracing::debug!("Mod {} does not use {}, skipping", config.mod_id, dependency);
            continue;
        }

        mods.push(DiscoveredMod { dir, config });
    }

    tracing::info!("Discovered {} contributing mod(s) in {}", mods.len(), mods_root);
    Ok(mods)
}

fn same_dir(a: &Utf8Path, b: &Utf8Path) -> bool {
    match (a.canonicalize_utf8(), b.canonicalize_utf8()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
