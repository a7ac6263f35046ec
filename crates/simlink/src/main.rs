mod cli;
mod commands;
mod config;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use simlink_api::LoopbackBridge;
use simlink_core::Correlator;

use crate::cli::{BridgeKind, Cli, Command, GlobalOpts};
use crate::commands::Ctx;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    init_tracing(cli.global.verbose);

    // Dispatch and handle errors with proper exit codes
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // stdout carries command output; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let Cli { global, command } = cli;

    match command {
        // Config commands don't need a bridge
        Command::Config(args) => commands::config_cmd::handle(args, &global),

        // Shell completions generation
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "simlink", &mut std::io::stdout());
            Ok(())
        }

        // All other commands talk to the simulator
        cmd => {
            let cfg = config::load_config(&config::config_path(&global))?;
            let link = config::resolve_link(&cfg, &global)?;
            let ctx = Ctx {
                format: config::output_format(&global, &cfg)?,
                quiet: global.quiet,
            };
            let bridge = build_bridge(&global, &cfg)?;

            tracing::debug!(command = ?cmd, client = %link.client_name, "dispatching command");
            Correlator::run(bridge, link, |correlator| async move {
                commands::dispatch(cmd, &correlator, ctx).await
            })
            .await
        }
    }
}

/// Build the bridge selected by `--bridge`, seeded from config and flags.
fn build_bridge(global: &GlobalOpts, cfg: &config::Config) -> Result<LoopbackBridge, CliError> {
    match global.bridge {
        BridgeKind::Loopback => {
            let bridge = LoopbackBridge::new();
            for (name, value) in config::resolve_seeds(cfg, global)? {
                bridge.seed(&name, value);
            }
            if !(global.offline || cfg.defaults.offline) {
                bridge.start();
            }
            Ok(bridge)
        }
    }
}
