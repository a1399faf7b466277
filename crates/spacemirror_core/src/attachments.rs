use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};

use crate::client::ContentApi;
use crate::config::MirrorSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
    Fetch,
    TooLarge,
    UpToDate,
}

/// Skip-or-fetch rule for one attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub max_size: u64,
    /// A local copy written more than this long after the remote change is fresh.
    pub grace: TimeDelta,
}

impl SyncPolicy {
    pub fn from_settings(settings: &MirrorSettings) -> Self {
        Self {
            max_size: settings.max_attachment_size,
            grace: settings.freshness_grace,
        }
    }

    pub fn decide(
        &self,
        declared_size: u64,
        remote_modified: Option<DateTime<Utc>>,
        local_written: Option<DateTime<Utc>>,
    ) -> FetchDecision {
        if declared_size > self.max_size {
            return FetchDecision::TooLarge;
        }
        match (remote_modified, local_written) {
            (_, None) | (None, Some(_)) => FetchDecision::Fetch,
            (Some(remote), Some(local)) if local > remote + self.grace => FetchDecision::UpToDate,
            (Some(_), Some(_)) => FetchDecision::Fetch,
        }
    }
}

/// Last-write time of `path`, or `None` when no file is there.
pub fn local_last_write(path: &Path) -> Result<Option<DateTime<Utc>>> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(error).with_context(|| format!("failed to stat {}", path.display()));
        }
    };
    if !metadata.is_file() {
        return Ok(None);
    }
    let modified = metadata
        .modified()
        .with_context(|| format!("failed to read mtime of {}", path.display()))?;
    Ok(Some(DateTime::<Utc>::from(modified)))
}

pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// Download into `<path>.part` and rename over `path` once complete.
///
/// On any failure the partial file is removed and `path` is left as it was.
pub fn download_to_path<A: ContentApi + ?Sized>(
    api: &mut A,
    content_id: &str,
    attachment_id: &str,
    path: &Path,
) -> Result<u64> {
    let part = partial_path(path);
    let result = write_part(api, content_id, attachment_id, &part).and_then(|bytes| {
        fs::rename(&part, path)
            .with_context(|| format!("failed to move {} into place", part.display()))?;
        Ok(bytes)
    });
    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    result
}

fn write_part<A: ContentApi + ?Sized>(
    api: &mut A,
    content_id: &str,
    attachment_id: &str,
    part: &Path,
) -> Result<u64> {
    let file =
        File::create(part).with_context(|| format!("failed to create {}", part.display()))?;
    let mut writer = BufWriter::new(file);
    let bytes = api.download_attachment(content_id, attachment_id, &mut writer)?;
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", part.display()))?;
    Ok(bytes)
}
