use chrono::Local;
use std::{error::Error, thread};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use botstatus::{
    cli::{Cli, Commands, parse_args},
    config::{load_config, parse_duration},
    report::{render_brief, render_detailed, render_down, render_transitions},
    status::StatusEngine,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    let config = load_config(args.config.as_deref())?;
    info!(
        "watching {} and {} node(s)",
        config.status_dir.display(),
        config.nodes.len()
    );
    let engine = StatusEngine::from_config(config)?;

    match args.command {
        Commands::Status {
            detailed,
            refresh,
            json,
            stream,
        } => {
            let interval = match stream.as_deref() {
                Some(raw) => Some(
                    parse_duration(raw)
                        .ok_or_else(|| format!("invalid stream interval '{raw}'"))?,
                ),
                None => None,
            };

            print_status(&engine, detailed, refresh, json)?;

            if let Some(interval) = interval {
                let mut seen = engine.snapshot()?.generation;
                loop {
                    thread::sleep(interval);
                    if let Err(err) = print_status(&engine, detailed, false, json) {
                        error!("failed to refresh status: {err}");
                        continue;
                    }
                    let snapshot = engine.snapshot()?;
                    if !json && snapshot.generation != seen {
                        print!("{}", render_transitions(&snapshot.changes));
                    }
                    seen = snapshot.generation;
                }
            }
        }
        Commands::Down { json } => {
            engine.update_status(false)?;
            let down = engine.get_down_server()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&down)?);
            } else if down.is_empty() {
                println!("All nodes reachable.");
            } else {
                print!("{}", render_down(&down));
            }
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_status(
    engine: &StatusEngine,
    detailed: bool,
    refresh: bool,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    if refresh {
        engine.update_status(true)?;
    }

    let body = match (detailed, json) {
        (false, true) => serde_json::to_string_pretty(&engine.get_status()?)?,
        (true, true) => serde_json::to_string_pretty(&engine.get_detailed_status()?)?,
        (false, false) => render_brief(&engine.get_status()?),
        (true, false) => render_detailed(&engine.detailed_report()?),
    };

    if json {
        println!("{body}");
    } else {
        let captured_at = engine.snapshot()?.captured_at.with_timezone(&Local);
        println!(
            "{}\nUpdated: {}",
            body.trim_end(),
            captured_at.format("%Y/%m/%d %H:%M:%S")
        );
    }

    Ok(())
}
