use clap::{ArgAction, Parser};

use parlor::config::{DEFAULT_PORT, ServerConfig};
use parlor::server::Server;
use parlor::telemetry;

#[derive(Parser, Debug)]
#[command(name = "parlor-server", version, about = "Parlor chat server")]
struct Args {
    /// Port the server listens on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();
    // The server defaults to info so connects and disconnects are visible.
    telemetry::init(args.verbose.saturating_add(1));

    let server = Server::new(ServerConfig::with_port(args.port));
    if let Err(err) = server.run() {
        tracing::error!("server failed: {err}");
        std::process::exit(1);
    }
}
