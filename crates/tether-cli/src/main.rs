use std::{env, process::ExitCode, time::Instant};

use tether::{Bridge, BridgeConfig, BridgeOptions, ConsoleMode, reference::ReferenceLoader};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: tether [--config FILE] [ARGS...]";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tether=info")))
        .with_writer(std::io::stderr)
        .init();

    // guest output goes to stdout unless the config file says otherwise
    let defaults = BridgeConfig {
        console: ConsoleMode::Stdio,
        ..BridgeConfig::default()
    };
    let mut args: Vec<String> = env::args().skip(1).collect();
    let config = match args.first().map(String::as_str) {
        Some("--help" | "-h") => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Some("--config") => {
            if args.len() < 2 {
                eprintln!("{USAGE}");
                return ExitCode::FAILURE;
            }
            let path = args.remove(1);
            args.remove(0);
            match defaults.overlay_file(&path) {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("error: {err}");
                    return ExitCode::FAILURE;
                }
            }
        }
        _ => defaults,
    };

    let options = match BridgeOptions::from_config(&config) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let bridge = match Bridge::load(&ReferenceLoader::new(), "echo", options) {
        Ok(bridge) => bridge,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let start = Instant::now();
    let result = bridge.main(args.as_slice()).into_inner();
    let report = bridge.collect_garbage();
    tracing::debug!(elapsed = ?start.elapsed(), ?report, "guest main finished");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
