//! `cmdgate` – vehicle command gate process.
//!
//! 1. Initialises logging (and OTLP export when configured).
//! 2. Loads `~/.cmdgate/config.toml` (or `$CMDGATE_CONFIG`).  A missing file
//!    is created with the built-in defaults; an unreadable, malformed or
//!    invalid one is fatal.
//! 3. Starts the gate loop on a Tokio runtime with the built-in source active.
//! 4. Runs the operator REPL on a plain thread.
//! 5. Stops on **Ctrl-C** or `/quit`.

mod config;
mod repl;

use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use cmdgate_middleware::EventBus;
use cmdgate_runtime::{GateLoop, init_tracing};

fn main() -> ExitCode {
    let _telemetry = init_tracing("cmdgate");
    print_banner();

    let cfg = match config::load_or_init() {
        Ok((cfg, config::Origin::File)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok((cfg, config::Origin::Defaults)) => {
            println!(
                "  No config found; defaults written to {}",
                config::config_path().display().to_string().dimmed()
            );
            cfg
        }
        Err(e) => {
            error!(error = %e, "config unreadable");
            eprintln!("{} {}", "Fatal:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let (settings, period) = match cfg.to_settings().and_then(|s| Ok((s, cfg.period()?))) {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            eprintln!("{} {}", "Fatal:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    let bus = EventBus::default();
    let (gate_loop, handle) = match GateLoop::new(settings, bus, period) {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "failed to build gate");
            eprintln!("{} {}", "Fatal:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    // ── Shutdown ──────────────────────────────────────────────────────────
    let (stop_tx, shutdown) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);

    let ctrlc_stop = stop_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping gate …".yellow().bold());
        ctrlc_stop.send_replace(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use /quit to stop");
    }

    let task = runtime.spawn(gate_loop.run(shutdown.clone()));
    info!(rate_hz = cfg.rate, inputs = cfg.inputs.len(), "gate running");

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Operator shell ────────────────────────────────────────────────────
    let repl_stop = stop_tx.clone();
    let repl_shutdown = shutdown.clone();
    std::thread::spawn(move || {
        repl::run(handle, repl_shutdown, move || {
            repl_stop.send_replace(true);
        })
    });

    if let Err(e) = runtime.block_on(task) {
        error!(error = %e, "gate loop terminated abnormally");
        return ExitCode::FAILURE;
    }
    println!("{}", "  ✓ Gate stopped.".green());
    ExitCode::SUCCESS
}

fn print_banner() {
    println!();
    println!("{}", r#"                   __           __     "#.bold().cyan());
    println!("{}", r#"  ______ _  ___/ /__ ____ _/ /____ "#.bold().cyan());
    println!("{}", r#" / __/  ' \/ _  / _ `/ _ `/ __/ -_)"#.bold().cyan());
    println!("{}", r#" \__/_/_/_/\_,_/\_, /\_,_/\__/\__/ "#.bold().cyan());
    println!("{}", r#"               /___/                 "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "cmdgate".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Vehicle control command gate");
    println!();
}
