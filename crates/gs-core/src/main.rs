//! guest-sync core CLI
//!
//! Entry point for gs-core: discovers the account's events, exports each
//! one's attendee list, normalizes it and upserts the records into the
//! remote store.
//!
//! stdout carries exactly one payload per command; logs and progress go to
//! stderr.

use clap::{Args, Parser, Subcommand};
use gs_common::{
    format_error_human, ContentKind, Error, EventId, OutputFormat, RawExport, RunId,
    StructuredError, SCHEMA_VERSION,
};
use gs_config::{
    load_config, ConfigOptions, ConfigSnapshot, ExportMode, GuestSyncConfig, ResolvedConfig,
};
use gs_core::coordinator::Coordinator;
use gs_core::discovery::{DiscoveryEngine, DiscoveryResult};
use gs_core::driver::{ContextFactory, SessionArtifact, WebDriverFactory};
use gs_core::events::{
    event_names as progress, JsonlWriter, NullEmitter, Phase, ProgressEmitter, ProgressEvent,
    RunEmitter,
};
use gs_core::exit_codes::ExitCode;
use gs_core::export::{ExportOrchestrator, UreqFetcher};
use gs_core::log_event;
use gs_core::logging::{
    event_names, get_host_id, init_logging, LogConfig, LogContext, LogFormat, LogLevel, Stage,
};
use gs_core::normalize::{normalize, AliasTable};
use gs_core::output::{render, CheckItem, CheckReport, Render, RunReport};
use gs_core::sync::{MemoryStore, MonotonicClock, RecordStore, RestStore, SyncEngine};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

/// guest-sync: mirror event attendee lists into a remote store
#[derive(Parser)]
#[command(name = "gs-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to config file (TOML, YAML or JSON; overrides GUEST_SYNC_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    /// Session artifact (browser storage-state JSON)
    #[arg(long, global = true, env = "GUEST_SYNC_SESSION")]
    session: Option<PathBuf>,

    /// Directory raw exports are written to
    #[arg(long, global = true, env = "GUEST_SYNC_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(long, global = true, env = "GUEST_SYNC_WORKERS")]
    workers: Option<usize>,

    /// WebDriver server URL
    #[arg(long, global = true, env = "GUEST_SYNC_WEBDRIVER_URL")]
    webdriver_url: Option<String>,

    /// Show the browser window
    #[arg(long, global = true)]
    headed: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover, export, normalize and sync every event
    Run(RunArgs),
    /// List event ids found in the listing sections
    Discover,
    /// Export events to the output directory without syncing
    Export(ExportArgs),
    /// Normalize a local export file and print the canonical records
    Normalize(NormalizeArgs),
    /// Check configuration, session artifact, store credentials and driver
    Check,
    /// Configuration management
    Config(ConfigArgs),
    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Export mode (overrides config)
    #[arg(long, value_enum)]
    mode: Option<ExportMode>,

    /// Sync into an in-memory store instead of the remote one
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Export mode (overrides config)
    #[arg(long, value_enum)]
    mode: Option<ExportMode>,

    /// Export these events instead of discovering them (repeatable)
    #[arg(long = "event", value_name = "ID")]
    events: Vec<String>,
}

#[derive(Args, Debug)]
struct NormalizeArgs {
    /// Export file to normalize
    file: PathBuf,

    /// Event id the rows belong to (default: file stem)
    #[arg(long)]
    event: Option<String>,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the resolved configuration with secrets redacted
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = (cli.global.verbose > 0 || cli.global.quiet)
        .then(|| LogLevel::from_verbosity(cli.global.verbose, cli.global.quiet));
    let format = cli.global.format.is_machine().then_some(LogFormat::Jsonl);
    init_logging(&LogConfig::from_env(level, format));

    let run_id = RunId::new();
    let log = LogContext::new(run_id.to_string(), get_host_id());

    let result = match &cli.command {
        Commands::Run(args) => run_run(&cli.global, args, &run_id, &log),
        Commands::Discover => run_discover(&cli.global, &run_id, &log),
        Commands::Export(args) => run_export(&cli.global, args, &run_id, &log),
        Commands::Normalize(args) => run_normalize(&cli.global, args, &run_id, &log),
        Commands::Check => run_check(&cli.global, &run_id, &log),
        Commands::Config(args) => match &args.command {
            ConfigCommands::Show => run_config_show(&cli.global, &run_id, &log),
        },
        Commands::Version => {
            print_version(&cli.global);
            Ok(ExitCode::Clean)
        }
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(err) => report_error(&cli.global, &err, ExitCode::for_error(&err), &log),
    };
    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Commands
// ============================================================================

fn run_run(
    global: &GlobalOpts,
    args: &RunArgs,
    run_id: &RunId,
    log: &LogContext,
) -> Result<ExitCode, Error> {
    let mut resolved = prepare(global, log)?;
    if let Some(mode) = args.mode {
        resolved.config.export.mode = mode;
    }
    let config = &resolved.config;

    let engine = DiscoveryEngine::from_config(config)?;
    let session = load_session(config, log)?;
    let store: Arc<dyn RecordStore> = if args.dry_run {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(remote_store(config)?)
    };
    let factory = connect_driver(config, &session, log)?;

    let emitter = make_emitter(global, run_id);
    let discovery = discover(&engine, factory.as_ref(), emitter.as_ref(), log)?;
    let ids: Vec<EventId> = discovery.ids.iter().cloned().collect();

    let sync = SyncEngine::new(
        store,
        Arc::new(MonotonicClock::system()),
        config.sync.batch_size,
    );
    let coordinator = build_coordinator(config, &session, Some(factory), emitter).with_sync(sync);
    let summary = coordinator.run(&ids, log);

    let report = RunReport {
        dry_run: args.dry_run,
        export_only: false,
        discovery: Some(discovery),
        summary,
        config: ConfigSnapshot::new(&resolved),
    };
    print_payload(global, &report, "run", run_id)?;
    Ok(ExitCode::Clean)
}

fn run_discover(global: &GlobalOpts, run_id: &RunId, log: &LogContext) -> Result<ExitCode, Error> {
    let resolved = prepare(global, log)?;
    let config = &resolved.config;

    let engine = DiscoveryEngine::from_config(config)?;
    let session = load_session(config, log)?;
    let factory = connect_driver(config, &session, log)?;

    let emitter = make_emitter(global, run_id);
    let discovery = discover(&engine, factory.as_ref(), emitter.as_ref(), log)?;
    print_payload(global, &discovery, "discover", run_id)?;
    Ok(ExitCode::Clean)
}

fn run_export(
    global: &GlobalOpts,
    args: &ExportArgs,
    run_id: &RunId,
    log: &LogContext,
) -> Result<ExitCode, Error> {
    let mut resolved = prepare(global, log)?;
    if let Some(mode) = args.mode {
        resolved.config.export.mode = mode;
    }
    let config = &resolved.config;

    let explicit = args
        .events
        .iter()
        .map(|raw| {
            EventId::parse(raw).ok_or_else(|| Error::Config(format!("invalid event id {raw:?}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let engine = if explicit.is_empty() {
        Some(DiscoveryEngine::from_config(config)?)
    } else {
        None
    };

    let session = load_session(config, log)?;
    let needs_driver = engine.is_some() || config.export.mode != ExportMode::Direct;
    let factory = if needs_driver {
        Some(connect_driver(config, &session, log)?)
    } else {
        None
    };

    let emitter = make_emitter(global, run_id);
    let (ids, discovery) = match (&engine, &factory) {
        (Some(engine), Some(factory)) => {
            let discovery = discover(engine, factory.as_ref(), emitter.as_ref(), log)?;
            (discovery.ids.iter().cloned().collect(), Some(discovery))
        }
        _ => (explicit, None),
    };

    let coordinator = build_coordinator(config, &session, factory, emitter);
    let summary = coordinator.run(&ids, log);

    let report = RunReport {
        dry_run: false,
        export_only: true,
        discovery,
        summary,
        config: ConfigSnapshot::new(&resolved),
    };
    print_payload(global, &report, "export", run_id)?;
    Ok(ExitCode::Clean)
}

fn run_normalize(
    global: &GlobalOpts,
    args: &NormalizeArgs,
    run_id: &RunId,
    log: &LogContext,
) -> Result<ExitCode, Error> {
    let event_id = match &args.event {
        Some(raw) => EventId::parse(raw),
        None => args
            .file
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(EventId::parse),
    }
    .ok_or_else(|| Error::Config("cannot derive an event id; pass --event".to_string()))?;

    let bytes = std::fs::read(&args.file)?;
    let raw = RawExport {
        event_id: event_id.clone(),
        bytes,
        kind: ContentKind::Csv,
        source_url: None,
        event_title: None,
    };

    match normalize(&raw, &AliasTable::default()) {
        Ok(normalized) => {
            log_event!(
                log,
                INFO,
                event_names::NORMALIZE_FINISHED,
                Stage::Normalize,
                "Normalized local export",
                records = normalized.records.len() as u64,
                rows_dropped = normalized.rows_dropped as u64
            );
            print_payload(global, &normalized, "normalize", run_id)?;
            Ok(ExitCode::Clean)
        }
        // A malformed local file is a usage problem, not a bug.
        Err(e) => Ok(report_error(
            global,
            &e.into_error(&event_id),
            ExitCode::ArgsError,
            log,
        )),
    }
}

fn run_check(global: &GlobalOpts, run_id: &RunId, log: &LogContext) -> Result<ExitCode, Error> {
    let mut checks = Vec::new();
    let mut first_failure: Option<ExitCode> = None;
    let mut fail = |checks: &mut Vec<CheckItem>, name: &str, err: Error| {
        first_failure.get_or_insert(ExitCode::for_error(&err));
        checks.push(CheckItem::fail(name, &err));
    };

    match prepare(global, log) {
        Ok(resolved) => {
            let config = &resolved.config;
            let source = match &resolved.path {
                Some(path) => format!("{} ({})", path.display(), resolved.source),
                None => resolved.source.to_string(),
            };
            checks.push(CheckItem::pass("config", source));

            match DiscoveryEngine::from_config(config) {
                Ok(_) => checks.push(CheckItem::pass("discovery", "profile url and pattern set")),
                Err(err) => fail(&mut checks, "discovery", err),
            }

            match load_session(config, log) {
                Ok(session) => checks.push(CheckItem::pass(
                    "session",
                    format!(
                        "{} platform cookie(s) in {}",
                        session.platform_cookies().len(),
                        session.path().display()
                    ),
                )),
                Err(err) => fail(&mut checks, "session", err),
            }

            match remote_store(config) {
                Ok(store) => {
                    checks.push(CheckItem::pass("credentials", store.endpoint().to_string()))
                }
                Err(err) => fail(&mut checks, "credentials", err),
            }

            let factory = WebDriverFactory::new(
                &config.run.webdriver_url,
                &config.platform.base_url,
                Vec::new(),
                config.run.headless,
            );
            match factory.probe() {
                Ok(()) => checks.push(CheckItem::pass("driver", config.run.webdriver_url.clone())),
                Err(err) => fail(&mut checks, "driver", err.into()),
            }
        }
        Err(err) => fail(&mut checks, "config", err),
    }

    let report = CheckReport::new(checks);
    print_payload(global, &report, "check", run_id)?;
    Ok(first_failure.unwrap_or(ExitCode::Clean))
}

#[derive(Serialize)]
struct ConfigShow {
    snapshot: ConfigSnapshot,
    config: GuestSyncConfig,
}

impl Render for ConfigShow {
    fn render_md(&self) -> String {
        let body = serde_json::to_string_pretty(&self.config).unwrap_or_default();
        format!(
            "# Configuration\n\n- Source: {}\n- Hash: `{}`\n\n```json\n{}\n```\n",
            self.snapshot.source,
            self.snapshot.short_id(),
            body
        )
    }

    fn render_summary(&self) -> String {
        let s = &self.snapshot.summary;
        format!(
            "{} config {}: mode {}, {} worker(s), store {}",
            self.snapshot.source,
            self.snapshot.short_id(),
            s.mode,
            s.workers,
            if s.store_configured {
                "configured"
            } else {
                "missing"
            }
        )
    }
}

fn run_config_show(
    global: &GlobalOpts,
    run_id: &RunId,
    log: &LogContext,
) -> Result<ExitCode, Error> {
    let resolved = prepare(global, log)?;
    let show = ConfigShow {
        snapshot: ConfigSnapshot::new(&resolved),
        config: resolved.config.redacted(),
    };
    print_payload(global, &show, "config show", run_id)?;
    Ok(ExitCode::Clean)
}

fn print_version(global: &GlobalOpts) {
    let version = env!("CARGO_PKG_VERSION");
    match global.format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "version": version,
                "name": "gs-core",
            });
            println!("{}", output);
        }
        OutputFormat::Exitcode => {}
        _ => println!("gs-core {}", version),
    }
}

// ============================================================================
// Preconditions and wiring
// ============================================================================

/// Load config and apply CLI overrides.
fn prepare(global: &GlobalOpts, log: &LogContext) -> Result<ResolvedConfig, Error> {
    let options = ConfigOptions {
        config_path: global.config.clone(),
    };
    let mut resolved = load_config(&options).map_err(|e| Error::Config(e.to_string()))?;
    apply_cli_overrides(&mut resolved.config, global)?;

    log_event!(
        log,
        INFO,
        event_names::CONFIG_LOADED,
        Stage::Init,
        "Configuration resolved",
        source = resolved.source.to_string().as_str(),
        env_overrides = resolved.env_overrides.len() as u64
    );
    Ok(resolved)
}

fn apply_cli_overrides(config: &mut GuestSyncConfig, global: &GlobalOpts) -> Result<(), Error> {
    if let Some(path) = &global.session {
        config.run.session_path = path.clone();
    }
    if let Some(dir) = &global.output_dir {
        config.run.output_dir = dir.clone();
    }
    if let Some(workers) = global.workers {
        if workers == 0 {
            return Err(Error::Config("--workers must be at least 1".to_string()));
        }
        config.run.workers = workers;
    }
    if let Some(url) = &global.webdriver_url {
        config.run.webdriver_url = url.clone();
    }
    if global.headed {
        config.run.headless = false;
    }
    Ok(())
}

fn load_session(config: &GuestSyncConfig, log: &LogContext) -> Result<SessionArtifact, Error> {
    let host = config
        .platform
        .host()
        .ok_or_else(|| Error::Config("platform.base_url has no host".to_string()))?;
    let session = SessionArtifact::load(&config.run.session_path, host).inspect_err(|err| {
        log_event!(
            log,
            ERROR,
            event_names::PRECONDITION_FAILED,
            Stage::Init,
            "Session artifact unusable",
            error = err.to_string().as_str()
        );
    })?;

    log_event!(
        log,
        INFO,
        event_names::SESSION_LOADED,
        Stage::Init,
        "Session artifact loaded",
        path = session.path().display().to_string().as_str(),
        cookies = session.platform_cookies().len() as u64
    );
    Ok(session)
}

fn remote_store(config: &GuestSyncConfig) -> Result<RestStore, Error> {
    let sync = &config.sync;
    match (&sync.url, &sync.key) {
        (Some(url), Some(key)) if sync.has_credentials() => {
            Ok(RestStore::new(url, key.clone(), &sync.table, sync.timeout()))
        }
        _ => Err(Error::CredentialsMissing(
            "set GUEST_SYNC_STORE_URL and GUEST_SYNC_STORE_KEY".to_string(),
        )),
    }
}

fn connect_driver(
    config: &GuestSyncConfig,
    session: &SessionArtifact,
    log: &LogContext,
) -> Result<Arc<WebDriverFactory>, Error> {
    let factory = WebDriverFactory::new(
        &config.run.webdriver_url,
        &config.platform.base_url,
        session.cookies().to_vec(),
        config.run.headless,
    )
    .with_download_root(config.run.output_dir.join(".capture"));

    if let Err(err) = factory.probe() {
        log_event!(
            log,
            ERROR,
            event_names::PRECONDITION_FAILED,
            Stage::Init,
            "Automation driver unreachable",
            endpoint = config.run.webdriver_url.as_str(),
            error = err.to_string().as_str()
        );
        return Err(err.into());
    }
    Ok(Arc::new(factory))
}

fn discover(
    engine: &DiscoveryEngine,
    factory: &dyn ContextFactory,
    emitter: &dyn ProgressEmitter,
    log: &LogContext,
) -> Result<DiscoveryResult, Error> {
    let mut driver = factory.open_context()?;
    let result = engine.discover(&mut *driver, log);
    emitter.emit(
        ProgressEvent::new(progress::DISCOVERY_COMPLETE, Phase::Discover)
            .with_progress(result.ids.len() as u64, None)
            .with_detail("sections", &result.sections),
    );
    Ok(result)
}

fn build_coordinator(
    config: &GuestSyncConfig,
    session: &SessionArtifact,
    factory: Option<Arc<WebDriverFactory>>,
    emitter: Arc<dyn ProgressEmitter>,
) -> Coordinator {
    let orchestrator = ExportOrchestrator::standard(
        config,
        Arc::new(UreqFetcher::new()),
        session.cookie_header(),
    );
    let coordinator = Coordinator::new(orchestrator, emitter)
        .with_mode(config.export.mode)
        .with_workers(config.run.workers);
    match factory {
        Some(factory) => coordinator.with_contexts(factory as Arc<dyn ContextFactory>),
        None => coordinator,
    }
}

fn make_emitter(global: &GlobalOpts, run_id: &RunId) -> Arc<dyn ProgressEmitter> {
    if global.format.is_machine() && !global.quiet {
        Arc::new(RunEmitter::new(
            run_id.to_string(),
            Arc::new(JsonlWriter::new(std::io::stderr())),
        ))
    } else {
        Arc::new(NullEmitter)
    }
}

// ============================================================================
// Output
// ============================================================================

fn print_payload<T: Render>(
    global: &GlobalOpts,
    value: &T,
    command: &str,
    run_id: &RunId,
) -> Result<(), Error> {
    if let Some(text) = render(value, global.format, command, &run_id.0)? {
        println!("{}", text);
    }
    Ok(())
}

fn report_error(global: &GlobalOpts, err: &Error, code: ExitCode, log: &LogContext) -> ExitCode {
    log_event!(
        log,
        ERROR,
        event_names::PRECONDITION_FAILED,
        Stage::Init,
        "Command failed",
        error = err.to_string().as_str(),
        exit_code = code.as_i32() as i64
    );
    match global.format {
        OutputFormat::Json => {
            let structured =
                StructuredError::from(err).with_context("exit_code", code.code_name());
            eprintln!("{}", structured.to_json());
        }
        OutputFormat::Exitcode => {}
        _ => {
            let use_color = !global.no_color && std::io::stderr().is_terminal();
            eprintln!("{}", format_error_human(err, use_color));
        }
    }
    code
}
