use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use splitkit::cli::{self, Args, Command};
use splitkit::store::RedisStore;

fn init_tracing(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    if args.no_color {
        colored::control::set_override(false);
    }
    init_tracing(args.log_directive());

    if let Command::Completions { shell } = &args.command {
        cli::render_completions(*shell, &mut std::io::stdout());
        return ExitCode::SUCCESS;
    }

    let store = match RedisStore::connect(&args.redis_url) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("{} {}: {}", "error:".red().bold(), args.redis_url, e);
            return ExitCode::from(2);
        }
    };

    match cli::run(&args.command, store, args.json) {
        Ok(output) => {
            println!("{}", output.trim_end());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
