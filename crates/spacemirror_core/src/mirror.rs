use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::attachments::{FetchDecision, SyncPolicy, download_to_path, local_last_write};
use crate::client::{
    Attachment, ContentApi, ContentItem, PagedCursor, SPACE_LIST_PATH, SpaceSummary,
    attachment_listing_path, content_listing_path,
};
use crate::config::MirrorSettings;
use crate::page::{AttachmentLink, render_page};
use crate::storage;
use crate::toc::render_index;
use crate::tree::ContentTree;

/// Counters for one mirrored space. Failed downloads are only logged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpaceReport {
    pub space_key: String,
    pub pages_written: usize,
    pub archived_skipped: usize,
    pub attachments_listed: usize,
    pub attachments_downloaded: usize,
    pub attachments_up_to_date: usize,
    pub attachments_too_large: usize,
    pub bytes_downloaded: u64,
    pub orphan_parents: usize,
    pub request_count: usize,
}

pub fn list_space_keys<A: ContentApi>(api: &mut A) -> Result<Vec<String>> {
    let spaces = PagedCursor::<SpaceSummary>::new(SPACE_LIST_PATH)
        .collect_all(api)
        .context("failed to list spaces")?;
    Ok(spaces.into_iter().map(|space| space.key).collect())
}

/// Mirror `space` if given, otherwise every space the token can list.
/// Spaces run one after another; the first fatal error stops the run.
pub fn mirror_spaces<A: ContentApi>(
    data_dir: &Path,
    settings: &MirrorSettings,
    space: Option<&str>,
    api: &mut A,
) -> Result<Vec<SpaceReport>> {
    let keys = match space {
        Some(key) => vec![key.to_string()],
        None => list_space_keys(api)?,
    };
    let mut reports = Vec::with_capacity(keys.len());
    for key in &keys {
        let report = mirror_space_with_api(data_dir, settings, key, api)
            .with_context(|| format!("failed to mirror space {key}"))?;
        reports.push(report);
    }
    Ok(reports)
}

pub fn mirror_space_with_api<A: ContentApi>(
    data_dir: &Path,
    settings: &MirrorSettings,
    space_key: &str,
    api: &mut A,
) -> Result<SpaceReport> {
    info!(space = space_key, "downloading space");
    let policy = SyncPolicy::from_settings(settings);
    let requests_before = api.request_count();
    let mut tree = ContentTree::new();
    let mut report = SpaceReport {
        space_key: space_key.to_string(),
        ..SpaceReport::default()
    };

    let mut items = PagedCursor::<ContentItem>::new(content_listing_path(space_key));
    while let Some(item) = items.next_item(api)? {
        if item.is_archived() {
            debug!(space = space_key, page = %item.title, "skipping archived page");
            report.archived_skipped += 1;
            continue;
        }
        tree.observe(space_key, &item);

        info!(space = space_key, page = %item.title, status = %item.status, "downloading page");
        let links = sync_attachments(data_dir, &policy, space_key, &item, api, &mut report)?;

        let page_path = storage::resolve(data_dir, item.webui())?;
        fs::write(&page_path, render_page(space_key, &item, &links))
            .with_context(|| format!("failed to write {}", page_path.display()))?;
        report.pages_written += 1;
    }
    debug!(space = space_key, listing_pages = items.pages_fetched(), "content listing done");

    let index_path = storage::resolve(data_dir, &format!("/spaces/{space_key}/index.html"))?;
    fs::write(&index_path, render_index(&tree))
        .with_context(|| format!("failed to write {}", index_path.display()))?;

    let orphans = tree.orphan_keys();
    if !orphans.is_empty() {
        debug!(space = space_key, parents = ?orphans, "pages under unrendered parents");
    }
    report.orphan_parents = orphans.len();
    report.request_count = api.request_count().saturating_sub(requests_before);
    info!(
        space = space_key,
        pages = report.pages_written,
        downloaded = report.attachments_downloaded,
        "space done"
    );
    Ok(report)
}

fn sync_attachments<A: ContentApi>(
    data_dir: &Path,
    policy: &SyncPolicy,
    space_key: &str,
    item: &ContentItem,
    api: &mut A,
    report: &mut SpaceReport,
) -> Result<Vec<AttachmentLink>> {
    let mut links = Vec::new();
    let mut listing = PagedCursor::<Attachment>::new(attachment_listing_path(&item.id));
    while let Some(attachment) = listing.next_item(api)? {
        report.attachments_listed += 1;
        let download_path = attachment.download_path().to_string();
        let local = storage::resolve(data_dir, &download_path)?;
        links.push(AttachmentLink {
            title: attachment.title.clone(),
            download_path,
        });

        let decision = policy.decide(
            attachment.declared_size(),
            attachment.last_modified(),
            local_last_write(&local)?,
        );
        match decision {
            FetchDecision::TooLarge => {
                warn!(
                    space = space_key,
                    page = %item.title,
                    attachment = %attachment.title,
                    size = attachment.declared_size(),
                    "skipping attachment larger than the maximum size"
                );
                report.attachments_too_large += 1;
            }
            FetchDecision::UpToDate => {
                debug!(attachment = %attachment.title, "attachment is up to date");
                report.attachments_up_to_date += 1;
            }
            FetchDecision::Fetch => {
                debug!(attachment = %attachment.title, "downloading attachment");
                match download_to_path(api, &item.id, &attachment.id, &local) {
                    Ok(bytes) => {
                        report.attachments_downloaded += 1;
                        report.bytes_downloaded += bytes;
                    }
                    Err(error) => warn!(
                        space = space_key,
                        page = %item.title,
                        attachment = %attachment.title,
                        "could not download attachment: {error:#}"
                    ),
                }
            }
        }
    }
    Ok(links)
}
