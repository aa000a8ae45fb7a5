use std::sync::Arc;

use clap::{ArgAction, Parser};

use parlor::client;
use parlor::console::{Color, Console};
use parlor::telemetry;

#[derive(Parser, Debug)]
#[command(name = "parlor-client", version, about = "Parlor chat client")]
struct Args {
    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();
    telemetry::init(args.verbose);

    let console = Arc::new(Console::new());
    if let Err(err) = client::run(&console) {
        let _ = console.write(&format!("Error: {err}\n"), Color::Red);
        std::process::exit(1);
    }
}
