use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use file_exchange::{ServerConfig, init_logger, run_server};

/// Multi-client file exchange and messaging server.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON config file; keys it leaves out keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory where stored files live
    #[arg(short, long)]
    storage_dir: Option<PathBuf>,

    /// Name used to tag log lines and the log file
    #[arg(long, default_value = "file_exchange")]
    name: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match ServerConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => ServerConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Err(e) = config.validate() {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let logger = init_logger(&args.name, &config.logger);

    // Multi-threaded runtime sized by `worker_threads`; each connection is one task on it.
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .thread_name("file-exchange-worker")
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            logger.error(&format!("Failed to build Tokio runtime: {}", e));
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run_server(config, logger.clone())) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logger.error(&format!("Server error: {}", e));
            ExitCode::FAILURE
        }
    }
}
