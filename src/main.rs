use std::io;
use std::process;

use tracing_subscriber::EnvFilter;

use wombat::repl;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let stdin = io::stdin();
    let stdout = io::stdout();
    let stderr = io::stderr();
    if let Err(error) = repl::run(stdin.lock(), stdout.lock(), stderr.lock()) {
        eprintln!("wombat: {}", error);
        process::exit(1);
    }
}
