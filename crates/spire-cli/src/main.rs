use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

use spire_core::{
    config, Dispatcher, EngineConfig, JsonFileStore, Registry, ReplayConfig, Replayer, Snapshot,
    StateStore, Value,
};

/// Spire — deterministic DApp execution engine
///
/// Replay a block feed, query DApps, and inspect saved state.
#[derive(Parser)]
#[command(name = "spire", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    engine: EngineArgs,

    /// Log filter, e.g. `info` or `spire_core=debug`
    #[arg(long, global = true, default_value = "info")]
    log: String,
}

/// Overrides for settings otherwise read from the environment
#[derive(Args)]
struct EngineArgs {
    /// Execution budget per call in milliseconds
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_ms: Option<u64>,

    /// Run programs without the sandbox (trusted programs only)
    #[arg(long, global = true)]
    no_sandbox: bool,

    /// Comma-separated ids allowed to be created
    #[arg(long, global = true, value_name = "ID,...")]
    allow: Option<String>,

    /// Serve views from deprovisioned DApps
    #[arg(long, global = true)]
    view_deprovisioned: bool,

    /// First block to apply when no state is saved
    #[arg(long, global = true)]
    start_block: Option<u64>,

    /// Save state at block numbers divisible by this
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    save_interval: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON Lines block feed into a state file
    Replay {
        /// Path to .jsonl feed, one block per line
        feed: PathBuf,
        /// State file to resume from and save to
        #[arg(long)]
        state: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a read-only view against saved state
    View {
        /// DApp id
        id: String,
        /// Function name passed as msg.func
        func: String,
        /// JSON arguments passed as msg.args
        args: Option<String>,
        /// State file to read
        #[arg(long)]
        state: PathBuf,
    },

    /// Print saved state
    State {
        /// State file to read
        #[arg(long)]
        state: PathBuf,
        /// Print only the SHA-256 state digest
        #[arg(long)]
        digest: bool,
    },

    /// Check that a program parses
    Check {
        /// Path to program file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show version information
    Version,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log))
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match cli.command {
        Commands::Replay { feed, state, json } => cmd_replay(&cli.engine, &feed, &state, json),
        Commands::View {
            id,
            func,
            args,
            state,
        } => cmd_view(&cli.engine, &id, &func, args.as_deref(), &state),
        Commands::State { state, digest } => cmd_state(&state, digest),
        Commands::Check { file, json } => cmd_check(&file, json),
        Commands::Version => {
            println!(
                "spire {} (spire-core {})",
                env!("CARGO_PKG_VERSION"),
                spire_core::VERSION
            );
            0
        }
    };

    process::exit(exit_code);
}

// ── Configuration ─────────────────────────────────────────

fn engine_config(args: &EngineArgs) -> spire_core::Result<EngineConfig> {
    let mut config = EngineConfig::from_env()?;
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if args.no_sandbox {
        config.sandboxed = false;
    }
    if let Some(allow) = &args.allow {
        config.allow_list = Some(config::parse_allow_list(allow));
    }
    if args.view_deprovisioned {
        config.serve_deprovisioned_views = true;
    }
    Ok(config)
}

fn replay_config(args: &EngineArgs) -> spire_core::Result<ReplayConfig> {
    let mut config = ReplayConfig::from_env()?;
    if let Some(start_block) = args.start_block {
        config.start_block = start_block;
    }
    if let Some(save_interval) = args.save_interval {
        config.save_interval = save_interval;
    }
    Ok(config)
}

/// Print an error and return the I/O-or-usage exit code
fn fail(message: impl std::fmt::Display) -> i32 {
    eprintln!("{} {}", "error:".red().bold(), message);
    2
}

fn load_snapshot(path: &Path) -> Result<Snapshot, i32> {
    match JsonFileStore::new(path).load() {
        Ok(Some(snapshot)) => Ok(snapshot),
        Ok(None) => Err(fail(format!("no saved state at {}", path.display()))),
        Err(e) => Err(fail(e)),
    }
}

// ── Commands ──────────────────────────────────────────────

fn cmd_replay(args: &EngineArgs, feed: &Path, state: &Path, json: bool) -> i32 {
    let (engine, replay) = match engine_config(args).and_then(|e| Ok((e, replay_config(args)?))) {
        Ok(configs) => configs,
        Err(e) => return fail(e),
    };
    let file = match fs::File::open(feed) {
        Ok(file) => file,
        Err(e) => return fail(format!("{}: {}", feed.display(), e)),
    };

    let mut replayer = match Replayer::open(engine, replay, JsonFileStore::new(state)) {
        Ok(replayer) => replayer,
        Err(e) => return fail(e),
    };
    let summary = match replayer.replay(BufReader::new(file)) {
        Ok(summary) => summary,
        Err(e) => return fail(e),
    };

    if json {
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => return fail(e),
        }
    } else {
        println!(
            "{} replayed {} block(s) to cursor {}",
            "✓".green().bold(),
            summary.blocks_applied,
            summary.cursor
        );
        println!(
            "  operations: {} ({} created, {} committed, {} deprovisioned, {} ignored, {} rejected)",
            summary.operations,
            summary.created,
            summary.committed,
            summary.deprovisioned,
            summary.ignored,
            summary.rejected
        );
        if summary.blocks_skipped > 0 {
            println!("  skipped {} already-applied block(s)", summary.blocks_skipped);
        }
    }
    0
}

fn cmd_view(args: &EngineArgs, id: &str, func: &str, view_args: Option<&str>, state: &Path) -> i32 {
    let engine = match engine_config(args) {
        Ok(engine) => engine,
        Err(e) => return fail(e),
    };
    let view_args = match view_args {
        Some(text) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(parsed) => Value::from_json(&parsed),
            Err(e) => return fail(format!("args must be JSON: {}", e)),
        },
        None => Value::empty_object(),
    };
    let snapshot = match load_snapshot(state) {
        Ok(snapshot) => snapshot,
        Err(code) => return code,
    };

    let (registry, _) = Registry::restore(snapshot);
    let response = Dispatcher::with_registry(engine, registry).view(id, func, view_args);
    match serde_json::to_string(&response) {
        Ok(text) => println!("{}", text),
        Err(e) => return fail(e),
    }
    if response.is_error() {
        1
    } else {
        0
    }
}

fn cmd_state(state: &Path, digest: bool) -> i32 {
    let snapshot = match load_snapshot(state) {
        Ok(snapshot) => snapshot,
        Err(code) => return code,
    };

    if digest {
        let (registry, _) = Registry::restore(snapshot);
        match registry.state_digest() {
            Ok(hex) => println!("{}", hex),
            Err(e) => return fail(e),
        }
    } else {
        match serde_json::to_string_pretty(&snapshot) {
            Ok(text) => println!("{}", text),
            Err(e) => return fail(e),
        }
    }
    0
}

fn cmd_check(file: &Path, json: bool) -> i32 {
    let text = match fs::read_to_string(file) {
        Ok(text) => text,
        Err(e) => return fail(format!("{}: {}", file.display(), e)),
    };

    let result = spire_core::script::parse(&text);
    if json {
        let report = match &result {
            Ok(_) => serde_json::json!({ "valid": true }),
            Err(e) => serde_json::json!({ "valid": false, "error": e.to_string() }),
        };
        println!("{}", report);
    } else {
        match &result {
            Ok(_) => println!("{} {} is a valid program", "✓".green().bold(), file.display()),
            Err(e) => eprintln!("{} {}: {}", "✗".red().bold(), file.display(), e),
        }
    }

    if result.is_ok() {
        0
    } else {
        1
    }
}
