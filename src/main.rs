//! docwire server binary.
//!
//! ```text
//! CLI flags → config file → overrides → validate
//!     → logging, metrics
//!     → Listener → WireServer (one Conn per client)
//!     → SIGINT/SIGTERM → cancel root context → drain
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use docwire::config::{read_config, validate_config, ServerConfig};
use docwire::handler::basic::{BasicHandler, UserCatalog};
use docwire::handler::proxy::TcpProxy;
use docwire::handler::ProxyHandler;
use docwire::lifecycle::{wait_for_signal, Shutdown};
use docwire::net::{Listener, ProxyFactory, WireServer};
use docwire::observability::{logging, metrics::ConnMetrics};
use docwire::Mode;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "docwire", version, about = "Document-database wire protocol server")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:27017.
    #[arg(long)]
    listen_addr: Option<String>,

    /// Operating mode: direct, proxy, diff-direct or diff-proxy.
    #[arg(long)]
    mode: Option<Mode>,

    /// Upstream address for proxy and diff modes.
    #[arg(long)]
    proxy_addr: Option<String>,

    /// Directory for raw traffic captures.
    #[arg(long)]
    capture_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(addr) = self.listen_addr {
            config.listener.bind_address = addr;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(addr) = self.proxy_addr {
            config.proxy.address = addr;
        }
        if let Some(dir) = self.capture_dir {
            config.capture.dir = Some(dir);
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match read_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("docwire: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => ServerConfig::default(),
    };
    cli.apply(&mut config);

    logging::init(&config.observability.log_level);

    if let Err(errors) = validate_config(&config) {
        for e in &errors {
            tracing::error!(field = %e.field, "{}", e.message);
        }
        return ExitCode::FAILURE;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = %config.mode,
        bind_address = %config.listener.bind_address,
        "docwire starting"
    );

    match run(config).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => docwire::observability::metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let handler = Arc::new(BasicHandler::new(Arc::new(UserCatalog::default())));
    let mut server = WireServer::new(config.mode, handler, Arc::new(ConnMetrics::new()))
        .with_capture_dir(config.capture.dir.clone());

    if config.mode.uses_proxy() {
        let upstream = config.proxy.clone();
        let factory: ProxyFactory = Arc::new(move || Arc::new(TcpProxy::new(upstream.clone())) as Arc<dyn ProxyHandler>);
        server = server.with_proxy(factory);
    }

    let listener = Listener::bind(&config.listener).await?;
    let shutdown = Shutdown::new();

    let mut accept = tokio::spawn({
        let server = server.clone();
        let ctx = shutdown.context();
        async move { server.run(listener, ctx).await }
    });

    let stopped = tokio::select! {
        signal = wait_for_signal() => {
            shutdown.trigger(format!("received {}", signal));
            None
        }
        res = &mut accept => Some(res),
    };

    let res = match stopped {
        Some(res) => {
            shutdown.trigger("accept loop stopped");
            res
        }
        None => accept.await,
    };

    shutdown.drain(server.tracker(), DRAIN_TIMEOUT).await;
    res??;
    Ok(())
}
