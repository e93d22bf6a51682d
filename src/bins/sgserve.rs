use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing::debug;

use spyglass::commands::register_default_handlers;
use spyglass::consts::DEFAULT_RPC_PORT;
use spyglass::debugger::Debugger;
use spyglass::errors::DebuggerError;
use spyglass::rpc::RpcServer;

/// Serve the debugger engine over the framed TCP protocol
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// TCP port the RPC server listens on
    #[clap(short, long, default_value_t = DEFAULT_RPC_PORT)]
    port: u16,

    /// Maximum log level (error, warn, info, debug, trace)
    #[clap(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), DebuggerError> {
    let args = Args::parse();
    setup_logger(&args.log_level);
    debug!("set up the logger");

    let session = Arc::new(Mutex::new(Debugger::build()?));
    let mut server = RpcServer::build();
    register_default_handlers(&mut server, session);

    server.serve(args.port)
}

fn setup_logger(level: &str) {
    let level: tracing::Level = level.parse().unwrap_or_else(|_| {
        eprintln!("unknown log level {level:?}, using info");
        tracing::Level::INFO
    });
    // construct a subscriber that prints formatted traces to stdout
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .without_time()
        .finish();
    // use that subscriber to process traces emitted after this point
    tracing::subscriber::set_global_default(subscriber).expect("could not setup logger");
}
