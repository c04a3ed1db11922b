use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use mptun_core::config::Config;
use mptun_core::server::Server;

#[derive(Parser, Debug)]
#[command(name = "mptun", about = "UDP load balancer and session relay")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/mptun.toml")]
    config: PathBuf,
}

fn init_logging(cfg: &mptun_core::config::LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.level.clone()));

    match cfg.output.as_str() {
        "stdout" => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
        "stderr" => {
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
            None
        }
        path => {
            let file_path = PathBuf::from(path);
            let dir = file_path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = file_path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("mptun.log"));
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(non_blocking).init();
            Some(guard)
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config).await {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load config {:?}: {e}", args.config);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("invalid config: {e}");
        std::process::exit(1);
    }

    let _logging_guard = init_logging(&config.logging);

    info!(bind = %config.server.bind, balance = %config.server.balance, "mptun starting");

    let mut server = match Server::start(&config.server).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };

    info!("server running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutting down");

    server.stop().await;
}
