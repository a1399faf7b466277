use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use spacemirror_core::auth::{
    authorize_url, complete_authorization, generate_state, load_auth_state, refresh_auth_state,
};
use spacemirror_core::client::{ConfluenceClient, build_http_client};
use spacemirror_core::config::{MirrorSettings, OAuthSettings, load_config};
use spacemirror_core::mirror::mirror_spaces;
use spacemirror_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, ensure_data_dir, init_layout,
    normalize_for_display, resolve_paths,
};
use spacemirror_core::status::scan_mirror;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "spacemirror",
    version,
    about = "Mirror Confluence Cloud spaces into a browsable static file tree"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true, help = "Log at debug level")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create the data folder and a commented config file")]
    Init(InitArgs),
    #[command(about = "Authorize against Atlassian and store credentials")]
    Auth,
    #[command(about = "Mirror one space, or every accessible space")]
    Download(DownloadArgs),
    #[command(about = "Show resolved paths, credentials and mirror contents")]
    Status,
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct DownloadArgs {
    #[arg(long, value_name = "KEY", help = "Space key")]
    space: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_logging(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Auth) => run_auth(&runtime),
        Some(Commands::Download(args)) => run_download(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let rust_log = std::env::var("RUST_LOG").ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose, rust_log.as_deref()))
        .with_writer(io::stderr)
        .init();
}

/// `RUST_LOG` wins over `--verbose`.
fn log_filter(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    match rust_log.filter(|directives| !directives.trim().is_empty()) {
        Some(directives) => EnvFilter::new(directives),
        None if verbose => EnvFilter::new("debug"),
        None => EnvFilter::new("info"),
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, args.force)?;

    println!("Initialized spacemirror layout");
    println!("data_dir: {}", normalize_for_display(&paths.data_dir));
    println!("spaces_dir: {}", normalize_for_display(&paths.spaces_dir));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_auth(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    ensure_data_dir(&paths)?;
    let config = load_config(&paths.config_path)?;
    let oauth = OAuthSettings::from_config(&config)?;
    let settings = MirrorSettings::from_config(&config);

    let state = generate_state();
    let url = authorize_url(&oauth, &state)?;
    println!("Please head with your browser to");
    println!("{url}");
    print!("Please paste the URL you have been redirected to: ");
    io::stdout().flush().context("failed to flush stdout")?;

    let mut redirect = String::new();
    io::stdin()
        .lock()
        .read_line(&mut redirect)
        .context("failed to read redirect URL from stdin")?;
    if redirect.trim().is_empty() {
        bail!("no redirect URL given");
    }

    let client = build_http_client(&settings)?;
    let stored = complete_authorization(&client, &oauth, &redirect, &state, &paths.auth_path)?;
    println!("OK!");
    println!("auth_path: {}", normalize_for_display(&paths.auth_path));
    println!("cloudid: {}", stored.cloudid);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_download(runtime: &RuntimeOptions, args: DownloadArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    ensure_data_dir(&paths)?;
    let config = load_config(&paths.config_path)?;
    let oauth = OAuthSettings::from_config(&config)?;
    let settings = MirrorSettings::from_config(&config);

    let http = build_http_client(&settings)?;
    let auth = refresh_auth_state(&http, &oauth, &paths.auth_path)?;
    let mut api = ConfluenceClient::new(&auth.cloudid, &auth.access_token, &settings)?;

    let space = args.space.as_deref().map(str::trim).filter(|key| !key.is_empty());
    let reports = mirror_spaces(&paths.data_dir, &settings, space, &mut api)?;

    for report in &reports {
        println!("space: {}", report.space_key);
        println!("  pages_written: {}", report.pages_written);
        println!("  archived_skipped: {}", report.archived_skipped);
        println!("  attachments_listed: {}", report.attachments_listed);
        println!("  attachments_downloaded: {}", report.attachments_downloaded);
        println!("  attachments_up_to_date: {}", report.attachments_up_to_date);
        println!("  attachments_too_large: {}", report.attachments_too_large);
        println!("  bytes_downloaded: {}", report.bytes_downloaded);
        println!("  orphan_parents: {}", report.orphan_parents);
        println!(
            "  index: {}",
            normalize_for_display(&paths.space_index_path(&report.space_key))
        );
    }
    let requests: usize = reports.iter().map(|report| report.request_count).sum();
    info!(spaces = reports.len(), requests, "download finished");
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    ensure_data_dir(&paths)?;
    let stats = scan_mirror(&paths.data_dir)?;

    println!("mirror status");
    println!("data_dir: {}", normalize_for_display(&paths.data_dir));
    println!(
        "config: {} ({})",
        normalize_for_display(&paths.config_path),
        if paths.config_path.exists() {
            "found"
        } else {
            "missing"
        }
    );
    let auth = if paths.auth_path.exists() {
        match load_auth_state(&paths.auth_path) {
            Ok(state) => format!("yes (cloudid {})", state.cloudid),
            Err(error) => format!("unreadable ({error:#})"),
        }
    } else {
        "no".to_string()
    };
    println!("auth: {auth}");
    println!("spaces: {}", stats.spaces);
    println!("pages: {}", stats.pages);
    println!("attachments: {}", stats.attachments);
    println!("attachment_bytes: {}", stats.attachment_bytes);
    println!("partial_files: {}", stats.partial_files);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };
    resolve_paths(&context, &overrides)
}
