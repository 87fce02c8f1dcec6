mod cache;
mod config;
mod conflicts;
mod lookup;
mod merge;

pub use cache::{cache_info, clear_cache};
pub use config::{reset_config, set_config_value, show_config};
pub use conflicts::{list_conflicts, ConflictsArgs};
pub use lookup::{lookup_archive, LookupArgs};
pub use merge::{run_merge, MergeArgs};

use crate::errors::CliError;
use crate::utils::config::AppConfig;
use camino::Utf8PathBuf;
use pac_merge::discover_mods;

/// Contributing mod directories, in priority order.
///
/// Explicit `--mod` directories bypass discovery; otherwise every mod under
/// `mods_root` that depends on the redirector is used.
pub(crate) fn resolve_mod_dirs(
    cfg: &AppConfig,
    explicit: Vec<Utf8PathBuf>,
) -> Result<Vec<Utf8PathBuf>, CliError> {
    if !explicit.is_empty() {
        if let Some(missing) = explicit.iter().find(|dir| !dir.is_dir()) {
            return Err(CliError::ModDirMissing {
                path: missing.clone(),
            });
        }
        return Ok(explicit);
    }

    let mods_root = cfg
        .mods_root
        .as_ref()
        .ok_or_else(|| CliError::setting_missing("mods_root"))?;
    if !mods_root.is_dir() {
        return Err(CliError::ModsRootMissing {
            path: mods_root.clone(),
        });
    }

    let exclude = cfg.work_dir.iter().cloned().collect::<Vec<_>>();
    let mods = discover_mods(mods_root, &cfg.redirector_dependency, &exclude)?;
    for discovered in &mods {
        tracing::debug!("Using mod {} ({})", discovered.display_name(), discovered.dir);
    }
    Ok(mods.into_iter().map(|m| m.dir).collect())
}
