//! Kernel module lifecycle test harness CLI.

use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use std::{io, process};

use kmodharness::config::{Config, LoaderBackend, LogSourceKind};
use kmodharness::orchestrator::verdict::EXIT_HARNESS_ERROR;
use kmodharness::registry::{ModuleRegistry, ProcModules};
use kmodharness::{CancelToken, Orchestrator, RunReport, TestRequest};

mod output;

#[derive(Parser, Debug)]
#[command(
    name = "kmodharness",
    author,
    version,
    about = "Load, verify and unload a kernel module",
    long_about = None,
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a module, wait for its markers, unload it and report a verdict.
    TestModule(TestModuleArgs),

    /// List loaded kernel modules.
    Modules {
        /// Only show modules that taint the kernel.
        #[arg(long)]
        tainted: bool,
    },
}

#[derive(clap::Args, Debug)]
struct TestModuleArgs {
    /// Module artifact (.ko, .ko.xz, .ko.gz, .ko.zst).
    path: PathBuf,

    /// Text expected in the kernel log after the module initialises.
    #[arg(long)]
    load_marker: String,

    /// Text expected in the kernel log after the module exits.
    #[arg(long)]
    unload_marker: String,

    /// Seconds to wait for each marker.
    #[arg(long, value_parser = parse_timeout)]
    timeout: Option<Duration>,

    /// Loader backend.
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Read a plain text log instead of /dev/kmsg.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Module parameters passed at load time.
    #[arg(long)]
    params: Option<String>,

    /// Directory for per-module lock files.
    #[arg(long)]
    lock_dir: Option<PathBuf>,

    /// Print the run report as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    Syscall,
    Command,
}

impl From<Backend> for LoaderBackend {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Syscall => LoaderBackend::Syscall,
            Backend::Command => LoaderBackend::Command,
        }
    }
}

static CANCEL: OnceLock<CancelToken> = OnceLock::new();

extern "C" fn on_signal(_signum: libc::c_int) {
    if let Some(token) = CANCEL.get() {
        token.cancel();
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::from_file(path).unwrap_or_else(|e| fatal(&e.to_string())),
        None => Config::default(),
    };

    match cli.command {
        Command::TestModule(args) => cmd_test_module(config, args),
        Command::Modules { tainted } => cmd_modules(&config, tainted),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

fn parse_timeout(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|e| format!("timeout must be a non-negative number of seconds, got {s}: {e}"))
}

fn cmd_test_module(mut config: Config, args: TestModuleArgs) {
    if let Some(backend) = args.backend {
        config.loader.backend = backend.into();
    }
    if let Some(params) = args.params {
        config.loader.params = params;
    }
    if let Some(log_file) = args.log_file {
        config.log.source = LogSourceKind::File;
        config.log.path = log_file;
    }
    if let Some(dir) = args.lock_dir {
        config.lock.dir = dir;
    }

    let timeout = args.timeout.unwrap_or_else(|| config.timeout());
    log::debug!("configuration: {:?}", config);
    let request = TestRequest::new(args.path, args.load_marker, args.unload_marker)
        .with_timeout(timeout);

    let cancel = CANCEL.get_or_init(CancelToken::new).clone();
    install_signal_handlers();

    let orchestrator = Orchestrator::from_config(request, &config)
        .unwrap_or_else(|e| fatal(&e.to_string()))
        .with_cancel(cancel);
    let report = orchestrator.run();

    print_report(&report, args.json);
    process::exit(report.verdict.exit_code());
}

fn print_report(report: &RunReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{text}"),
            Err(e) => fatal(&format!("serializing report: {e}")),
        }
    } else {
        output::print_human(report);
    }
    io::stdout().flush().ok();
}

fn cmd_modules(config: &Config, tainted_only: bool) {
    let registry = ProcModules::new(config.registry.path.clone());
    let modules = registry.modules().unwrap_or_else(|e| fatal(&e.to_string()));
    output::print_modules(
        modules
            .iter()
            .filter(|m| !tainted_only || m.is_tainted()),
    );
}

fn install_signal_handlers() {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: the handler only performs an atomic store through an initialised OnceLock.
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

fn fatal(message: &str) -> ! {
    eprintln!("\n\x1b[1;31merror:\x1b[0m {message}\n");
    process::exit(EXIT_HARNESS_ERROR);
}
