use crate::errors::CliError;
use crate::println_pad;
use crate::utils::config::AppConfig;
use crate::utils::format_size;
use camino::Utf8Path;
use colored::Colorize;
use pac_merge::utils::{list_files_relative, remove_dir_if_exists, remove_file_if_exists};
use pac_merge::{MergeSnapshot, UnpackCache};

pub fn cache_info(cfg: &AppConfig) -> miette::Result<()> {
    let layout = cfg.layout()?;
    let cache_path = layout.cache_path();

    println!();
    println!("  {} {}", "cache_file:".bright_white(), cache_path);
    match UnpackCache::try_load(&cache_path) {
        Ok(Some(entries)) => {
            let stats = UnpackCache::from_entries(entries).stats();
            println!(
                "  {} {} archive(s), {} member(s), {}",
                "entries:".bright_white(),
                stats.committed,
                stats.members,
                format_size(file_size(&cache_path))
            );
        }
        Ok(None) => println!(
            "  {} {}",
            "entries:".bright_white(),
            "(no cache yet)".bright_yellow()
        ),
        Err(e) => println!(
            "  {} {} {}",
            "entries:".bright_white(),
            "✗".bright_red(),
            format!("{} (rebuilt on the next merge)", e).bright_red()
        ),
    }

    let unpacked_dir = layout.unpacked_dir();
    let unpacked = if unpacked_dir.is_dir() {
        list_files_relative(&unpacked_dir)
            .map_err(CliError::from)?
            .iter()
            .map(|rel| file_size(&unpacked_dir.join(rel)))
            .sum::<u64>()
    } else {
        0
    };
    println!("  {} {}", "unpacked:".bright_white(), format_size(unpacked));

    match MergeSnapshot::load(&layout.snapshot_path()).map_err(CliError::from)? {
        Some(snapshot) if snapshot.incomplete => println!(
            "  {} {}",
            "last_merge:".bright_white(),
            "did not finish (merged again on the next run)".bright_yellow()
        ),
        Some(snapshot) => println!(
            "  {} {} archive(s) merged",
            "last_merge:".bright_white(),
            snapshot.merge_sets.len()
        ),
        None => println!("  {} {}", "last_merge:".bright_white(), "(none)".bright_yellow()),
    }
    println!();
    Ok(())
}

/// Delete the unpack cache, the last-merge snapshot, all scratch folders and
/// the archives the last merge published.
pub fn clear_cache(cfg: &AppConfig) -> miette::Result<()> {
    let layout = cfg.layout()?;

    let mut removed_outputs = 0;
    let snapshot = MergeSnapshot::load(&layout.snapshot_path()).map_err(CliError::from)?;
    if let Some(snapshot) = snapshot {
        let publish_dir = layout.publish_dir();
        for name in snapshot.merge_sets.keys() {
            if remove_file_if_exists(&publish_dir.join(name)).map_err(CliError::from)? {
                removed_outputs += 1;
            }
        }
    }

    let merging_dir = layout.merging_dir();
    remove_dir_if_exists(&merging_dir).map_err(CliError::from)?;

    println!("{}", "✓ Merge cache cleared".bright_green().bold());
    println!();
    println_pad!("{} {}", "Removed:".bright_white(), merging_dir);
    println_pad!(
        "{} {}",
        "Merged archives removed:".bright_white(),
        removed_outputs
    );
    Ok(())
}

fn file_size(path: &Utf8Path) -> u64 {
    std::fs::metadata(path.as_std_path())
        .map(|m| m.len())
        .unwrap_or(0)
}
