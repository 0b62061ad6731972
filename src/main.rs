//! sitelock - inspect isolation decisions from the command line
//!
//! Usage: `sitelock [--config=FILE] [switches] <url> [<url>...]`
//!
//! Each URL is resolved in a fresh browsing group and its process lock is
//! printed.

use sitelock::{IsolationConfig, IsolationEngine, NAME, ProfileId, VERSION};
use std::env;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    if let Err(e) = run(&args) {
        eprintln!("{}: {}", NAME, e);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> sitelock::Result<()> {
    let (config_path, switches): (Vec<&String>, Vec<&String>) =
        args.iter().partition(|a| a.starts_with("--config="));

    let mut config = match config_path.last().and_then(|a| a.split_once('=')) {
        Some((_, path)) => IsolationConfig::load(path)?,
        None => IsolationConfig::default(),
    };
    let urls = config.apply_args(switches);

    let engine = IsolationEngine::new(config)?;
    println!("{} v{}", NAME, VERSION);
    for url in &urls {
        let context = engine.create_browsing_group(ProfileId(0));
        match engine.resolve_isolation(url, None, &context) {
            Ok(lock) => println!("{:<40} {}", url, lock),
            Err(e) => println!("{:<40} error: {}", url, e),
        }
        engine.destroy_browsing_group(context.group)?;
    }
    Ok(())
}

fn print_usage() {
    println!("{} v{}", NAME, VERSION);
    println!("Usage: {} [--config=FILE] [switches] <url> [<url>...]", NAME);
    println!();
    println!("Switches:");
    println!("  --isolate-origins=LIST                  Comma-separated origins to isolate");
    println!("  --field-trial-isolate-origins=LIST      Trial origins, subject to opt-out");
    println!("  --site-per-process                      Isolate every site");
    println!("  --disable-site-isolation-trials         Ignore trial origins");
    println!("  --disable-origin-agent-cluster-isolation");
    println!("  --disable-coop-isolation");
    println!("  --renderer-process-limit=N");
    println!("  --profile-dir=DIR                       Persist per-profile state");
}
