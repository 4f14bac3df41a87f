//! Tapedeck CLI

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use tapedeck::config::Config;
use tapedeck::Vcr;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Tapedeck v{}", env!("CARGO_PKG_VERSION"));
        eprintln!();
        eprintln!("Usage: tapedeck <command> [options]");
        eprintln!();
        eprintln!("Commands:");
        eprintln!("  check <config.toml>    Validate a configuration file");
        process::exit(1);
    }

    let command = &args[1];

    match command.as_str() {
        "check" => {
            if args.len() < 3 {
                eprintln!("Usage: tapedeck check <config.toml>");
                process::exit(1);
            }

            if let Err(e) = check(&PathBuf::from(&args[2])) {
                eprintln!("Error: {e:#}");
                process::exit(1);
            }
        }
        _ => {
            eprintln!("Unknown command: {command}");
            eprintln!("Run 'tapedeck' for usage information.");
            process::exit(1);
        }
    }
}

fn check(path: &std::path::Path) -> anyhow::Result<()> {
    let config = Config::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    let vcr = Vcr::new(config).context("building engine context")?;

    let config = vcr.config();
    let options = vcr.default_cassette_options();
    println!("Configuration: {}", path.display());
    if let Some(dir) = &config.cassette_library_dir {
        println!("  cassette library:   {}", dir.display());
    }
    println!("  record mode:        {:?}", options.record);
    println!("  match requests on:  {}", options.match_requests_on.join(", "));
    println!("  ignored hosts:      {}", config.ignore_hosts.len());
    println!("  ignore localhost:   {}", config.ignore_localhost);
    println!(
        "  live without cassette: {}",
        config.allow_http_connections_when_no_cassette
    );
    println!("  hooks:              {}", vcr.hooks().len());

    Ok(())
}
