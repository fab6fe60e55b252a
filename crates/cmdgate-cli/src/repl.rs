//! REPL – operator shell for a running gate.
//!
//! Supported slash-commands:
//!   /select <id> [transition] – switch the active command source
//!   /status                   – active source, transition flag, last output
//!   /sources                  – registered sources with their health
//!   /diag                     – every diagnostic record
//!   /help                     – show this list
//!   /quit | /exit             – stop the gate and exit

use colored::{ColoredString, Colorize};
use std::io::{self, BufRead, Write};

use cmdgate_runtime::{GateHandle, GateSnapshot};
use cmdgate_types::{DiagnosticRecord, HealthLevel, SelectRequest, SourceId};
use tokio::sync::watch;

/// A parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Select(SelectRequest),
    Status,
    Sources,
    Diagnostics,
    Help,
    Quit,
}

/// Parse one input line.  `Err` carries the message to show the operator.
pub fn parse(line: &str) -> Result<Action, String> {
    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();
    match (command, args.as_slice()) {
        ("/select", [id, rest @ ..]) => {
            let id: u16 = id
                .parse()
                .map_err(|_| format!("'{id}' is not a source id (0-65535)"))?;
            let transition = match rest {
                [] => false,
                ["transition" | "t" | "true"] => true,
                [other, ..] => return Err(format!("unexpected argument '{other}'")),
            };
            Ok(Action::Select(SelectRequest {
                source: SourceId(id),
                transition,
            }))
        }
        ("/select", []) => Err("usage: /select <id> [transition]".to_string()),
        ("/status", []) => Ok(Action::Status),
        ("/sources", []) => Ok(Action::Sources),
        ("/diag", []) => Ok(Action::Diagnostics),
        ("/help", []) => Ok(Action::Help),
        ("/quit" | "/exit", []) => Ok(Action::Quit),
        (other, _) => Err(format!("unknown command '{other}'")),
    }
}

/// Run the shell on the current (non-async) thread.
///
/// Returns on `/quit`, EOF or once `shutdown` reports `true`.  Only `/quit`
/// stops the gate, through `stop`.
pub fn run(handle: GateHandle, shutdown: watch::Receiver<bool>, stop: impl Fn()) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if *shutdown.borrow() {
            break;
        }

        print!("{} ", "cmdgate>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        match parse(&line) {
            Ok(Action::Select(request)) => cmd_select(&handle, request),
            Ok(Action::Status) => print_status(&handle.snapshot()),
            Ok(Action::Sources) => print_sources(&handle.snapshot()),
            Ok(Action::Diagnostics) => print_diagnostics(&handle.snapshot().diagnostics),
            Ok(Action::Help) => cmd_help(),
            Ok(Action::Quit) => {
                println!("{}", "Stopping gate.".green());
                stop();
                break;
            }
            Err(message) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                message,
                "/help".bold()
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "cmdgate Commands".bold().underline());
    println!("  {}  – switch source", "/select <id> [transition]".bold().cyan());
    println!("  {}                    – active source and last output", "/status".bold().cyan());
    println!("  {}                   – registered sources", "/sources".bold().cyan());
    println!("  {}                      – diagnostic records", "/diag".bold().cyan());
    println!("  {}              – stop the gate and exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_select(handle: &GateHandle, request: SelectRequest) {
    match handle.select_blocking(request) {
        Ok(response) if response.success => println!("  {} {}", "✓".green().bold(), response.message),
        Ok(response) => println!("  {} {}", "✗".red().bold(), response.message),
        Err(e) => println!("  {}: {}", "Gate unavailable".red(), e),
    }
}

fn print_status(view: &GateSnapshot) {
    let name = source_name(view, view.active);
    println!(
        "  Active source : {} ({})",
        view.active.to_string().bold(),
        name
    );
    println!(
        "  Limits        : {}",
        if view.transition {
            "transition".yellow()
        } else {
            "nominal".normal()
        }
    );
    println!("  Vehicle speed : {:.2} m/s", view.vehicle.speed);
    match &view.last_output {
        Some(out) => println!(
            "  Last output   : v={:.2} m/s  a={:.2} m/s²  steer={:.3} rad",
            out.longitudinal.velocity,
            out.longitudinal.acceleration,
            out.lateral.steering_tire_angle
        ),
        None => println!("  Last output   : {}", "none".dimmed()),
    }
}

fn print_sources(view: &GateSnapshot) {
    for (id, name) in &view.sources {
        let marker = if *id == view.active { "*" } else { " " };
        let health = view
            .diagnostics
            .iter()
            .find(|r| r.name == format!("source/{name}"))
            .map_or_else(|| "-".dimmed(), |r| level(r.level));
        println!("  {marker} {:>5}  {:<12} {}", id.to_string().bold(), name, health);
    }
}

fn print_diagnostics(records: &[DiagnosticRecord]) {
    if records.is_empty() {
        println!("  {}", "no cycle has run yet".dimmed());
    }
    for record in records {
        println!("  {:<20} {:<6} {}", record.name, level(record.level), record.message);
    }
}

fn source_name(view: &GateSnapshot, id: SourceId) -> &str {
    view.sources
        .iter()
        .find(|(sid, _)| *sid == id)
        .map_or("?", |(_, name)| name.as_str())
}

fn level(level: HealthLevel) -> ColoredString {
    match level {
        HealthLevel::Ok => level.to_string().green(),
        HealthLevel::Warn => level.to_string().yellow(),
        HealthLevel::Stale => level.to_string().red().bold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_defaults_to_nominal_limits() {
        assert_eq!(
            parse("/select 2"),
            Ok(Action::Select(SelectRequest {
                source: SourceId(2),
                transition: false
            }))
        );
    }

    #[test]
    fn select_accepts_transition_flag() {
        for line in ["/select 1 transition", "/select 1 t", "  /select   1 true \n"] {
            assert_eq!(
                parse(line),
                Ok(Action::Select(SelectRequest {
                    source: SourceId(1),
                    transition: true
                })),
                "{line}"
            );
        }
    }

    #[test]
    fn select_rejects_bad_arguments() {
        assert!(parse("/select").is_err());
        assert!(parse("/select planner").is_err());
        assert!(parse("/select 70000").is_err());
        assert!(parse("/select 1 maybe").is_err());
    }

    #[test]
    fn simple_commands_parse() {
        assert_eq!(parse("/status"), Ok(Action::Status));
        assert_eq!(parse("/sources"), Ok(Action::Sources));
        assert_eq!(parse("/diag"), Ok(Action::Diagnostics));
        assert_eq!(parse("/help"), Ok(Action::Help));
        assert_eq!(parse("/exit"), Ok(Action::Quit));
        assert!(parse("/status now").is_err());
        assert!(parse("/reboot").is_err());
    }
}
