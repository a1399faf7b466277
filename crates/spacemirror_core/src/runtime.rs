use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const AUTH_FILENAME: &str = "auth.json";
pub const CONFIG_FILENAME: &str = "spacemirror.toml";
pub const DEFAULT_DATA_DIRNAME: &str = "data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub data_dir: PathBuf,
    pub spaces_dir: PathBuf,
    pub auth_path: PathBuf,
    pub config_path: PathBuf,
    pub data_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "data_dir={} ({})\nspaces_dir={}\nauth_path={}\nconfig_path={} ({})",
            normalize_for_display(&self.data_dir),
            self.data_source.as_str(),
            normalize_for_display(&self.spaces_dir),
            normalize_for_display(&self.auth_path),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }

    /// Location of the generated table of contents for one space.
    pub fn space_index_path(&self, space_key: &str) -> PathBuf {
        self.spaces_dir.join(space_key).join("index.html")
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (data_dir, data_source) = if let Some(path) = overrides.data_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("SPACEMIRROR_DATA_DIR")) {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else {
        (context.cwd.join(DEFAULT_DATA_DIRNAME), ValueSource::Default)
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("SPACEMIRROR_CONFIG")) {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else {
        (context.cwd.join(CONFIG_FILENAME), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        spaces_dir: data_dir.join("spaces"),
        auth_path: data_dir.join(AUTH_FILENAME),
        data_dir,
        config_path,
        data_source,
        config_source,
    })
}

/// Create the data folder if it is missing. Every command runs this first.
pub fn ensure_data_dir(paths: &ResolvedPaths) -> Result<bool> {
    if paths.data_dir.exists() {
        return Ok(false);
    }
    fs::create_dir_all(&paths.data_dir)
        .with_context(|| format!("failed to create {}", paths.data_dir.display()))?;
    Ok(true)
}

pub fn init_layout(paths: &ResolvedPaths, force: bool) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    for dir in [&paths.data_dir, &paths.spaces_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config = write_text_file(&paths.config_path, &render_config_template(paths), force)?;

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

pub fn render_config_template(paths: &ResolvedPaths) -> String {
    let data_dir = normalize_for_display(&paths.data_dir);
    format!(
        "# spacemirror configuration (materialized by `spacemirror init`)\n# Mirror output: {data_dir}\n\n[oauth]\n# Register an OAuth 2.0 (3LO) app in the Atlassian developer console.\n# client_id = \"\"\n# client_secret = \"\"\n# callback_url = \"http://localhost:8080/callback\"\n\n[mirror]\n# Attachments declared larger than this many bytes are never downloaded.\nmax_attachment_size = {max_size}\n# A local attachment newer than remote + grace is considered up to date.\nfreshness_grace_minutes = {grace}\n# Pause after each page fetch and attachment download.\nrequest_delay_ms = {delay}\nhttp_timeout_ms = {timeout}\n# user_agent = \"{user_agent}\"\n",
        max_size = crate::config::DEFAULT_MAX_ATTACHMENT_SIZE,
        grace = crate::config::DEFAULT_FRESHNESS_GRACE_MINUTES,
        delay = crate::config::DEFAULT_REQUEST_DELAY_MS,
        timeout = crate::config::DEFAULT_HTTP_TIMEOUT_MS,
        user_agent = crate::config::DEFAULT_USER_AGENT,
    )
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
