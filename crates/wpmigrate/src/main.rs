use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use wpmigrate_core::client::{WordPressClient, WordPressClientConfig};
use wpmigrate_core::config::{Settings, SettingsOverrides, load_config};
use wpmigrate_core::dump::clean_dumps;
use wpmigrate_core::entity::EntityKind;
use wpmigrate_core::exporter::{ExportOptions, export_site};
use wpmigrate_core::importer::{ImportOptions, import_workspace};
use wpmigrate_core::reconcile::ReconcileAction;
use wpmigrate_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, ensure_workspace_ready,
    init_layout, normalize_for_display, resolve_workspace,
};

#[derive(Debug, Parser)]
#[command(
    name = "wpmigrate",
    version,
    about = "Migrate categories, tags, users, media and posts between WordPress sites"
)]
struct Cli {
    #[arg(long, global = true, value_name = "URL", help = "WordPress site root")]
    host: Option<String>,
    #[arg(long = "lang", global = true, value_name = "LOCALE", help = "Locale subdirectory")]
    locale: Option<String>,
    #[arg(long, global = true, value_name = "NAME", help = "Site id used in dump file names")]
    site: Option<String>,
    #[arg(long, global = true, value_name = "NAME")]
    username: Option<String>,
    #[arg(long, global = true, value_name = "SECRET", help = "Application password")]
    password: Option<String>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Test mode: fetch a single page of 10 records")]
    test: bool,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(flatten)]
    logging: LoggingArgs,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Args)]
struct LoggingArgs {
    #[arg(long, global = true, help = "Disable all logging")]
    silent: bool,
    #[arg(long, global = true, alias = "debug", help = "Enable debug logging")]
    verbose: bool,
    #[arg(long, global = true, value_enum, default_value_t = Verbosity::Info)]
    verbosity: Verbosity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Verbosity {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Verbosity {
    fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    overrides: SettingsOverrides,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            overrides: SettingsOverrides {
                host: cli.host.clone(),
                locale: cli.locale.clone(),
                site: cli.site.clone(),
                username: cli.username.clone(),
                password: cli.password.clone(),
                test_mode: cli.test,
            },
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create the workspace directory layout")]
    Init(InitArgs),
    #[command(about = "Export the source site to JSON dump files")]
    Export(DirArgs),
    #[command(about = "Import the JSON dump into the destination site")]
    Import(ImportArgs),
    #[command(about = "Delete dumped JSON files")]
    Clean(CleanArgs),
}

#[derive(Debug, Args)]
struct DirArgs {
    #[arg(long, value_name = "PATH", help = "Workspace root (default ./data)")]
    dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct InitArgs {
    #[command(flatten)]
    dir: DirArgs,
    #[arg(long, help = "Wipe the locale directory before creating it")]
    force: bool,
    #[arg(long, help = "Skip writing wpmigrate.toml")]
    no_config: bool,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[command(flatten)]
    dir: DirArgs,
    #[arg(long, help = "Reconcile against the destination without creating anything")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct CleanArgs {
    #[command(flatten)]
    dir: DirArgs,
    #[arg(
        long = "kind",
        value_name = "TYPE",
        value_parser = parse_kind,
        help = "Only clean this entity type (repeatable)"
    )]
    kinds: Vec<EntityKind>,
    #[arg(long, help = "Also delete downloaded files in export/media")]
    media: bool,
}

fn parse_kind(value: &str) -> Result<EntityKind, String> {
    EntityKind::parse(value).map_err(|err| err.to_string())
}

impl Commands {
    fn dir(&self) -> &DirArgs {
        match self {
            Self::Init(args) => &args.dir,
            Self::Export(dir) => dir,
            Self::Import(args) => &args.dir,
            Self::Clean(args) => &args.dir,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);
    let no_dir = DirArgs { dir: None };
    let dir = cli.command.as_ref().map_or(&no_dir, Commands::dir);
    let env_loaded = load_env_files(&runtime, dir);
    if let Err(err) = init_tracing(&cli.logging) {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }
    if let Err(err) = env_loaded {
        error!("{err:#}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Export(args)) => run_export(&runtime, args),
        Some(Commands::Import(args)) => run_import(&runtime, args),
        Some(Commands::Clean(args)) => run_clean(&runtime, args),
        None => {
            let mut command = Cli::command();
            command
                .print_help()
                .context("failed to print help")
                .map(|()| println!())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            info!("Exiting...");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(logging: &LoggingArgs) -> Result<()> {
    let filter = if logging.silent {
        tracing_subscriber::EnvFilter::new("off")
    } else {
        let level = if logging.verbose {
            "debug"
        } else {
            logging.verbosity.as_str()
        };
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))
}

/// Load `./.env`, then `<workspace>/.env`. Variables already set win.
fn load_env_files(runtime: &RuntimeOptions, dir: &DirArgs) -> Result<()> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let root = resolve_workspace(
        &context,
        &PathOverrides {
            workspace_dir: dir.dir.clone(),
            config: runtime.config.clone(),
        },
    )?;
    let workspace_env = root.root_dir.join(".env");
    if workspace_env.exists() {
        dotenvy::from_path(&workspace_env)
            .with_context(|| format!("failed to load {}", normalize_path(&workspace_env)))?;
    }
    Ok(())
}

struct Prepared {
    settings: Settings,
    paths: ResolvedPaths,
}

fn prepare(runtime: &RuntimeOptions, dir: &DirArgs) -> Result<Prepared> {
    let context = ResolutionContext::from_process()?;
    let root = resolve_workspace(
        &context,
        &PathOverrides {
            workspace_dir: dir.dir.clone(),
            config: runtime.config.clone(),
        },
    )?;
    let config = load_config(&root.config_path)?;
    let settings = Settings::resolve(&config, &runtime.overrides)?;
    let paths = root.with_locale(&settings.locale);
    Ok(Prepared { settings, paths })
}

fn connect(settings: &Settings) -> Result<WordPressClient> {
    let host = settings.require_host()?;
    info!("Create connection with {host}/wp-json");
    WordPressClient::new(WordPressClientConfig {
        host: host.to_string(),
        credentials: settings.credentials.clone(),
        http: settings.http.clone(),
    })
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let Prepared { paths, .. } = prepare(runtime, &args.dir)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            force: args.force,
            materialize_config: !args.no_config,
        },
    )?;

    println!("Initialized wpmigrate workspace");
    println!("root_dir: {}", normalize_path(&paths.root_dir));
    println!("base_dir: {}", normalize_path(&paths.base_dir));
    println!("entries_dir: {}", normalize_path(&paths.entries_dir));
    println!("export_media_dir: {}", normalize_path(&paths.export_media_dir));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("removed_base_dir: {}", format_flag(report.removed_base_dir));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", format_flag(report.wrote_config));
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_export(runtime: &RuntimeOptions, args: DirArgs) -> Result<()> {
    let Prepared { settings, paths } = prepare(runtime, &args)?;
    ensure_workspace_ready(&paths)?;
    let mut client = connect(&settings)?;
    info!("Connection to Wordpress established.");

    let report = export_site(&paths, &mut client, &ExportOptions::from_settings(&settings))?;

    println!("Exported {} into {}", client.host(), normalize_path(&paths.base_dir));
    println!("site: {}", settings.site);
    println!("test_mode: {}", format_flag(settings.test_mode));
    for kind in &report.kinds {
        println!(
            "{}: {} records, {} files, {} page requests",
            kind.kind.endpoint(),
            kind.fetched,
            kind.files.len(),
            kind.page_requests
        );
    }
    let enrichment = &report.enrichment;
    println!("featured_media_resolved: {}", enrichment.featured_resolved);
    println!("featured_media_missing: {}", enrichment.featured_missing);
    println!("featured_media_failed: {}", enrichment.featured_failed);
    println!("content_recovered: {}", enrichment.content_recovered);
    println!("content_emptied: {}", enrichment.content_emptied);
    println!("requests: {}", report.request_count);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_import(runtime: &RuntimeOptions, args: ImportArgs) -> Result<()> {
    let Prepared { settings, paths } = prepare(runtime, &args.dir)?;
    ensure_workspace_ready(&paths)?;
    let mut client = connect(&settings)?;
    info!("Connection to Wordpress established.");

    let report = import_workspace(
        &paths,
        &mut client,
        &ImportOptions::from_settings(&settings, args.dry_run),
    )?;

    if report.dry_run {
        println!("Dry run against {} (nothing was created)", client.host());
    } else {
        println!("Imported {} into {}", normalize_path(&paths.base_dir), client.host());
    }
    for kind in &report.kinds {
        let reconcile = &kind.reconcile;
        println!(
            "{}: read={} filtered={} unreadable={} created={} reused={} planned={} skipped={} failed={}",
            kind.kind.endpoint(),
            kind.read,
            kind.filtered_out,
            kind.read_failures.len(),
            reconcile.count(ReconcileAction::Created),
            reconcile.count(ReconcileAction::Reused),
            reconcile.count(ReconcileAction::Planned),
            reconcile.skipped.len(),
            reconcile.failed.len(),
        );
    }
    for kind in EntityKind::ALL.into_iter().filter(|kind| *kind != EntityKind::Post) {
        println!("mapped_{}: {}", kind.endpoint(), report.mapping.len(kind));
    }
    println!("failed_total: {}", report.failed_total());
    println!("requests: {}", report.request_count);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_clean(runtime: &RuntimeOptions, args: CleanArgs) -> Result<()> {
    let Prepared { paths, .. } = prepare(runtime, &args.dir)?;
    ensure_workspace_ready(&paths)?;

    let mut kinds = if args.kinds.is_empty() {
        EntityKind::ALL.to_vec()
    } else {
        args.kinds
    };
    kinds.sort();
    kinds.dedup();

    let report = clean_dumps(&paths, &kinds, args.media)?;
    println!("Cleaned {}", normalize_path(&paths.entries_dir));
    println!(
        "kinds: {}",
        report
            .cleaned_kinds
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(",")
    );
    println!("removed_files: {}", report.removed_files.len());
    println!("removed_media_files: {}", report.removed_media_files);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn normalize_path(path: &Path) -> String {
    normalize_for_display(path)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
