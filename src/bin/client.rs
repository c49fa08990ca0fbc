//! bump-echo client entry point.

use bump_echo::client::run_sessions;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the client
#[derive(Parser, Debug)]
#[command(name = "bump-echo-client")]
#[command(version = "0.1.0")]
#[command(about = "Scripted client for the bump-echo server", long_about = None)]
struct CliArgs {
    /// Server host name
    host: String,

    /// Server port
    port: u16,

    /// Number of concurrent sessions
    #[arg(short = 'n', long, default_value_t = 1)]
    sessions: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %args.host,
        port = args.port,
        sessions = args.sessions,
        "Starting bump-echo client"
    );

    let elapsed = run_sessions(&args.host, args.port, args.sessions)?;
    println!("Elapsed: {:.3}s", elapsed.as_secs_f64());

    Ok(())
}
