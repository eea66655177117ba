mod classify;
mod config;
mod daemon;
mod exec;
mod harness;
mod poll;
mod report;
mod runner;
mod sandbox;
mod session;
mod suite;
mod tolerant;

use std::process::ExitCode;

use anyhow::{anyhow, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::daemon::DaemonArtifacts;
use crate::harness::ProbeHarness;
use crate::sandbox::DockerProvider;
use crate::suite::Suite;

const DEFAULT_CONFIG_PATH: &str = "config/probe.toml";

/// Exit status when the run could not happen at all.
const EXIT_FATAL: u8 = 2;

fn print_help() {
    println!(
        "\
sandbox-probe v{}

Provisions a throwaway sandbox, starts a command-interception daemon in
it and checks which security properties actually hold.

USAGE:
    sandbox-probe [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: {DEFAULT_CONFIG_PATH}]

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit
    --detect         Only run the daemon's capability detection commands

EXIT STATUS:
    0    every probe passed
    1    at least one probe failed or errored
    2    fatal error (bad config, sandbox could not be created)

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG    Log level filter for tracing
                (e.g. debug, sandbox_probe=debug,warn)

EXAMPLES:
    sandbox-probe                           # uses {DEFAULT_CONFIG_PATH}
    sandbox-probe /etc/probe/strict.toml    # custom config path
    sandbox-probe --detect                  # capability discovery only
    RUST_LOG=debug sandbox-probe            # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

struct Args {
    config_path: String,
    detect: bool,
}

fn parse_args() -> Result<Args> {
    let mut config_path = None;
    let mut detect = false;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("sandbox-probe v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--detect" => detect = true,
            flag if flag.starts_with('-') => return Err(anyhow!("Unknown option: {flag}")),
            path => {
                if config_path.replace(path.to_string()).is_some() {
                    return Err(anyhow!("Only one CONFIG_PATH may be given"));
                }
            }
        }
    }

    Ok(Args {
        config_path: config_path.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()),
        detect,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    // Handle --help / --version before anything else
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {e}\n\nTry 'sandbox-probe --help'.");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sandbox_probe=info")),
        )
        .init();

    println!(
        r#"
   ___                 _ _                 ___          _
  / __| __ _ _ _  __| | |__  _____ __  | _ \_ _ ___| |__  ___
  \__ \/ _` | ' \/ _` | '_ \/ _ \ \ /  |  _/ '_/ _ \ '_ \/ -_)
  |___/\__,_|_||_\__,_|_.__/\___/_\_\  |_| |_| \___/_.__/\___|
                                                        v{}
"#,
        env!("CARGO_PKG_VERSION")
    );

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    // Load configuration
    info!("Loading configuration from {}", args.config_path);
    let config = Config::load(&args.config_path)?;

    info!(
        "Sandbox: {} (image {}, lifetime {}s, network {})",
        config.sandbox.provider,
        config.sandbox.image,
        config.sandbox.lifetime_secs,
        if config.sandbox.network { "on" } else { "off" }
    );
    info!(
        "Daemon: {} at {} (readiness {:?})",
        config.daemon.binary, config.daemon.base_url, config.daemon.readiness
    );

    let artifacts = DaemonArtifacts::read(&config.daemon)?;
    let harness = ProbeHarness::new(&config, &artifacts);
    let provider =
        Box::new(DockerProvider::new().with_create_timeout(config.sandbox.create_timeout()));

    if args.detect {
        info!("Running capability detection");
        harness.detect(provider, std::io::stdout()).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let suite = match &config.suite.path {
        Some(path) => {
            info!("Loading probe suite from {}", path.display());
            Suite::load(path)?
        }
        None => Suite::builtin()?,
    };
    info!(
        "Suite: {} categories, {} cases",
        suite.categories.len(),
        suite.total_cases()
    );

    let (counters, _) = harness.run(provider, suite, std::io::stdout()).await?;

    if counters.all_passed() {
        info!("All {} probes passed", counters.total());
        Ok(ExitCode::SUCCESS)
    } else {
        info!(
            "{} of {} probes did not pass",
            counters.failed + counters.errors,
            counters.total()
        );
        Ok(ExitCode::FAILURE)
    }
}
