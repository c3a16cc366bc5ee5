//! podsync binary: load configuration, construct the app, run until
//! signal.
//!
//! Exit codes: 0 on graceful shutdown, 1 on unrecoverable startup failure.

use podsync::{app::App, config::Config, run_with_shutdown};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

struct Opts {
    config_path: PathBuf,
    headless: bool,
    debug: bool,
}

fn parse_opts() -> Opts {
    let default_path = std::env::var("PODSYNC_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    let mut opts = Opts {
        config_path: default_path,
        headless: false,
        debug: false,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(value) = args.next() {
                    opts.config_path = PathBuf::from(value);
                } else {
                    eprintln!("--config requires a path");
                    std::process::exit(2);
                }
            }
            "--headless" => opts.headless = true,
            "--debug" => opts.debug = true,
            other => {
                eprintln!("unknown argument: {other}");
                eprintln!("usage: podsync [--config <path>] [--headless] [--debug]");
                std::process::exit(2);
            }
        }
    }

    opts
}

#[tokio::main]
async fn main() {
    let opts = parse_opts();

    let default_level = if opts.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %opts.config_path.display(),
        "running podsync"
    );

    let config = match Config::load(&opts.config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let app = match App::new(config, opts.config_path).await {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = %e, "failed to start");
            std::process::exit(1);
        }
    };

    let result = if opts.headless {
        app.run_headless().await
    } else {
        run_with_shutdown(app).await
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "run error");
        std::process::exit(1);
    }
}
