use std::collections::VecDeque;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::MirrorSettings;

pub const API_GATEWAY_URL: &str = "https://api.atlassian.com/ex/confluence";
pub const SPACE_LIST_PATH: &str = "/rest/api/space";

/// `application/x-www-form-urlencoded` minus the unreserved characters.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// The remote operations the mirror needs. `ConfluenceClient` is the real
/// implementation; tests drive the mirror with an in-memory one.
pub trait ContentApi {
    /// GET one page of a paginated listing. `path` is relative to the
    /// per-site API root and may be a `_links.next` value verbatim.
    fn fetch_page(&mut self, path: &str) -> Result<ResultPage>;
    /// Stream one attachment body into `sink`, returning the byte count.
    fn download_attachment(
        &mut self,
        content_id: &str,
        attachment_id: &str,
        sink: &mut dyn Write,
    ) -> Result<u64>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultPage {
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default, rename = "_links")]
    pub links: PageLinks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageLinks {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpaceSummary {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebLinks {
    #[serde(default)]
    pub webui: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ancestor {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "_links")]
    pub links: WebLinks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentBody {
    #[serde(default)]
    pub styled_view: Option<BodyValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BodyValue {
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: String,
    /// Root first, immediate parent last.
    #[serde(default)]
    pub ancestors: Vec<Ancestor>,
    #[serde(default, rename = "_links")]
    pub links: WebLinks,
    #[serde(default)]
    pub body: ContentBody,
}

impl ContentItem {
    pub fn webui(&self) -> &str {
        &self.links.webui
    }

    pub fn markup(&self) -> &str {
        self.body
            .styled_view
            .as_ref()
            .map(|body| body.value.as_str())
            .unwrap_or_default()
    }

    pub fn is_archived(&self) -> bool {
        self.status == "archived"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadLinks {
    pub download: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttachmentExtensions {
    #[serde(default, rename = "fileSize")]
    pub file_size: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttachmentHistory {
    #[serde(default, rename = "lastUpdated")]
    pub last_updated: Option<VersionStamp>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionStamp {
    #[serde(default)]
    pub when: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub title: String,
    #[serde(rename = "_links")]
    pub links: DownloadLinks,
    #[serde(default)]
    pub extensions: AttachmentExtensions,
    #[serde(default)]
    pub history: Option<AttachmentHistory>,
}

impl Attachment {
    /// Web-relative download path with any query string removed.
    pub fn download_path(&self) -> &str {
        let link = self.links.download.as_str();
        link.split_once('?').map_or(link, |(path, _)| path)
    }

    pub fn declared_size(&self) -> u64 {
        self.extensions.file_size
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.history
            .as_ref()
            .and_then(|history| history.last_updated.as_ref())
            .and_then(|stamp| stamp.when)
    }
}

pub fn content_listing_path(space_key: &str) -> String {
    format!(
        "/rest/api/content?spaceKey={}&expand={}",
        utf8_percent_encode(space_key, QUERY_VALUE),
        utf8_percent_encode("body.styled_view,ancestors", QUERY_VALUE),
    )
}

pub fn attachment_listing_path(content_id: &str) -> String {
    format!(
        "/rest/api/content/{}/child/attachment?expand=history.lastUpdated",
        utf8_percent_encode(content_id, QUERY_VALUE)
    )
}

/// Lazily walks a `_links.next` chain, one buffered page at a time.
///
/// The api is lent per call so the caller can issue other requests between
/// items. A cursor cannot be rewound; build a new one to start over.
pub struct PagedCursor<T> {
    next_path: Option<String>,
    buffer: VecDeque<Value>,
    pages_fetched: usize,
    _item: PhantomData<T>,
}

impl<T: DeserializeOwned> PagedCursor<T> {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            next_path: Some(path.into()),
            buffer: VecDeque::new(),
            pages_fetched: 0,
            _item: PhantomData,
        }
    }

    pub fn next_item<A: ContentApi + ?Sized>(&mut self, api: &mut A) -> Result<Option<T>> {
        loop {
            if let Some(raw) = self.buffer.pop_front() {
                let item = serde_json::from_value(raw).context("failed to decode listing record")?;
                return Ok(Some(item));
            }
            let Some(path) = self.next_path.take() else {
                return Ok(None);
            };
            let page = api.fetch_page(&path)?;
            self.pages_fetched += 1;
            debug!(path = %path, records = page.results.len(), "fetched listing page");
            self.buffer.extend(page.results);
            self.next_path = page.links.next.filter(|next| !next.is_empty());
        }
    }

    pub fn collect_all<A: ContentApi + ?Sized>(mut self, api: &mut A) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while let Some(item) = self.next_item(api)? {
            out.push(item);
        }
        Ok(out)
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }
}

pub fn build_http_client(settings: &MirrorSettings) -> Result<Client> {
    Client::builder()
        .timeout(settings.http_timeout)
        .user_agent(settings.user_agent.clone())
        .build()
        .context("failed to build HTTP client")
}

/// Blocking client for one Confluence Cloud site, authenticated with a
/// bearer token. No retries: a failed run is re-run as a whole.
pub struct ConfluenceClient {
    client: Client,
    base_url: String,
    access_token: String,
    request_delay: Duration,
    request_count: usize,
}

impl ConfluenceClient {
    pub fn new(cloud_id: &str, access_token: &str, settings: &MirrorSettings) -> Result<Self> {
        Ok(Self {
            client: build_http_client(settings)?,
            base_url: format!("{API_GATEWAY_URL}/{cloud_id}"),
            access_token: access_token.to_string(),
            request_delay: settings.request_delay,
            request_count: 0,
        })
    }

    fn get(&mut self, path: &str) -> Result<reqwest::blocking::Response> {
        let url = format!("{}{}", self.base_url, path);
        self.request_count = self.request_count.saturating_add(1);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .with_context(|| format!("failed to request {path}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("GET {path} failed with HTTP {status}");
        }
        Ok(response)
    }

    fn pause(&self) {
        if !self.request_delay.is_zero() {
            sleep(self.request_delay);
        }
    }
}

impl ContentApi for ConfluenceClient {
    fn fetch_page(&mut self, path: &str) -> Result<ResultPage> {
        let response = self.get(path)?;
        let page = response
            .json::<ResultPage>()
            .with_context(|| format!("failed to parse listing response for {path}"))?;
        self.pause();
        Ok(page)
    }

    fn download_attachment(
        &mut self,
        content_id: &str,
        attachment_id: &str,
        sink: &mut dyn Write,
    ) -> Result<u64> {
        let path = format!(
            "/rest/api/content/{content_id}/child/attachment/{attachment_id}/download"
        );
        let result = self.get(&path).and_then(|mut response| {
            io::copy(&mut response, sink)
                .with_context(|| format!("failed to stream attachment {attachment_id}"))
        });
        self.pause();
        result
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}
