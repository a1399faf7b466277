use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub spaces: usize,
    pub pages: usize,
    pub attachments: usize,
    pub attachment_bytes: u64,
    /// `.part` files left behind by an interrupted run.
    pub partial_files: usize,
}

/// Count what an existing mirror under `data_dir` holds. Missing folders
/// count as empty.
pub fn scan_mirror(data_dir: &Path) -> Result<MirrorStats> {
    let mut stats = MirrorStats::default();

    let spaces_dir = data_dir.join("spaces");
    if spaces_dir.is_dir() {
        for entry in WalkDir::new(&spaces_dir).follow_links(false) {
            let entry = entry.with_context(|| format!("failed to walk {}", spaces_dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("part") {
                stats.partial_files += 1;
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some("html") {
                continue;
            }
            // spaces/<key>/index.html
            if entry.depth() == 2 && entry.file_name() == "index.html" {
                stats.spaces += 1;
            } else {
                stats.pages += 1;
            }
        }
    }

    let download_dir = data_dir.join("download");
    if download_dir.is_dir() {
        for entry in WalkDir::new(&download_dir).follow_links(false) {
            let entry =
                entry.with_context(|| format!("failed to walk {}", download_dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|ext| ext.to_str()) == Some("part") {
                stats.partial_files += 1;
                continue;
            }
            let metadata = entry
                .metadata()
                .with_context(|| format!("failed to stat {}", entry.path().display()))?;
            stats.attachments += 1;
            stats.attachment_bytes += metadata.len();
        }
    }

    Ok(stats)
}
