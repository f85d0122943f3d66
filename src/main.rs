//! CIM Storage Provider host
//!
//! Loads the provider configuration and a device snapshot, builds the
//! provider context and answers one CIM operation from the command line,
//! or serves indications and metrics until interrupted.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐      ┌──────────────────────────────┐
//! │  CLI command (enumerate,     │      │  /metrics (Prometheus)       │
//! │  references, invoke, ...)    │      │                              │
//! └──────────────┬───────────────┘      └──────────────┬───────────────┘
//!                │                                     │
//!                ▼                                     │
//!     ┌─────────────────────┐    snapshot()            │
//!     │  ProviderContext    │ ─────────────────────────┘
//!     └──────────┬──────────┘
//!                │ IndicationQueue
//!                ▼
//!     ┌─────────────────────┐
//!     │ IndicationDispatcher│ ── LoggingSink
//!     └─────────────────────┘
//! ```

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cim_storage_provider::{
    Error, IndicationDispatcher, IndicationFilter, InstanceName, LoggingSink, MemoryEngine,
    ProviderConfig, ProviderContext, ProviderMetrics, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// CIM Storage Provider - local storage model for WBEM clients
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Provider configuration file (YAML)
    #[arg(long, env = "CIM_STORAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Device snapshot the in-memory engine starts from (YAML)
    #[arg(long, env = "CIM_STORAGE_SNAPSHOT")]
    snapshot: PathBuf,

    /// Write the device graph back to the snapshot after a method call
    #[arg(long, env = "CIM_STORAGE_SAVE")]
    save: bool,

    /// Override the InstanceID prefix
    #[arg(long, env = "CIM_STORAGE_PREFIX")]
    prefix: Option<String>,

    /// Override the hosting system name
    #[arg(long, env = "CIM_STORAGE_SYSTEM_NAME")]
    system_name: Option<String>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enumerate instances of a class
    Enumerate {
        class: String,
        /// Return object paths only
        #[arg(long)]
        keys_only: bool,
    },
    /// Get one instance by object path
    Get { path: String },
    /// Enumerate all records of an association class
    Associations {
        class: String,
        #[arg(long)]
        keys_only: bool,
    },
    /// Association records referencing an object
    References {
        path: String,
        /// Restrict to one association class
        #[arg(long)]
        result_class: Option<String>,
    },
    /// Enumerate capabilities of a capabilities class
    Capabilities { class: String },
    /// Enumerate settings of a setting class
    Settings { class: String },
    /// Invoke a service method with JSON parameters
    Invoke {
        class: String,
        method: String,
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// Deliver indications and serve metrics until interrupted
    Serve,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting CIM Storage Provider");
    info!("  Version: {}", cim_storage_provider::VERSION);
    info!("  Snapshot: {:?}", args.snapshot);

    let config = load_config(&args)?;
    info!("  System: {} ({})", config.system_name, config.system_class_name);
    info!("  InstanceID prefix: {}", config.instance_id_prefix);

    let engine = Arc::new(MemoryEngine::load_snapshot(&args.snapshot)?);
    info!("Storage engine loaded with {} devices", engine.len());

    let ctx = Arc::new(ProviderContext::with_defaults(config, engine.clone())?);
    let loaded = ctx.load_settings()?;
    info!("Setting catalog loaded ({} settings)", loaded);

    let shutdown = CancellationToken::new();
    let dispatcher = IndicationDispatcher::spawn(ctx.indications(), shutdown.child_token())?;
    dispatcher.subscribe(IndicationFilter::all("log"), Arc::new(LoggingSink))?;

    // Start metrics server
    if let Some(addr) = args.metrics_addr.clone() {
        let metrics = ctx.metrics().clone();
        let token = shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&addr, metrics, token).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let outcome = match &args.command {
        Command::Serve => {
            info!("Serving until interrupted");
            tokio::signal::ctrl_c().await?;
            info!("Interrupted");
            Ok(())
        }
        command => run_command(&ctx, command),
    };

    if outcome.is_ok() && args.save && matches!(args.command, Command::Invoke { .. }) {
        let content = serde_yaml::to_string(&engine.snapshot())?;
        std::fs::write(&args.snapshot, content)?;
        info!("Device snapshot written to {:?}", args.snapshot);
    }

    drain(&ctx, &dispatcher).await;
    shutdown.cancel();
    dispatcher.shutdown().await;

    let snapshot = ctx.metrics().snapshot();
    debug!("Final metrics: {:?}", snapshot);
    info!("Provider shutdown complete");
    outcome
}

fn load_config(args: &Args) -> Result<ProviderConfig> {
    let mut config = match &args.config {
        Some(path) => ProviderConfig::load(path)?,
        None => ProviderConfig::default(),
    };
    if let Some(prefix) = &args.prefix {
        config.instance_id_prefix = prefix.clone();
    }
    if let Some(system_name) = &args.system_name {
        config.system_name = system_name.clone();
    }
    config.validate()?;
    Ok(config)
}

// =============================================================================
// Commands
// =============================================================================

fn run_command(ctx: &ProviderContext, command: &Command) -> Result<()> {
    match command {
        Command::Enumerate { class, keys_only } => print_json(&ctx.enumerate_instances(class, *keys_only)?),
        Command::Get { path } => print_json(&ctx.get_instance(&parse_path(path)?)?),
        Command::Associations { class, keys_only } => {
            print_json(&ctx.enumerate_associations(class, *keys_only)?)
        }
        Command::References { path, result_class } => {
            print_json(&ctx.references(&parse_path(path)?, result_class.as_deref())?)
        }
        Command::Capabilities { class } => {
            if ctx.capabilities_provider_for_class(class).is_none() {
                return Err(Error::NotSupported(format!("{} is not a capabilities class", class)));
            }
            print_json(&ctx.enumerate_instances(class, false)?)
        }
        Command::Settings { class } => print_json(&ctx.enumerate_settings(class)?),
        Command::Invoke { class, method, params } => {
            let params: Value = serde_json::from_str(params)?;
            print_json(&ctx.invoke(class, method, &params)?)
        }
        Command::Serve => Ok(()),
    }
}

fn parse_path(raw: &str) -> Result<InstanceName> {
    raw.parse()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Give the dispatcher a moment to log what the command enqueued
async fn drain(ctx: &ProviderContext, dispatcher: &IndicationDispatcher) {
    let enqueued = ctx.indications().enqueued();
    let handled = || {
        let stats = dispatcher.stats();
        stats.delivered.load(Ordering::Relaxed)
            + stats.failed.load(Ordering::Relaxed)
            + stats.unmatched.load(Ordering::Relaxed)
    };
    let wait = async {
        while handled() < enqueued {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(2), wait).await.is_err() {
        warn!("{} indications left undelivered", enqueued.saturating_sub(handled()));
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "hyper=warn".parse() {
        filter = filter.add_directive(directive);
    }

    // Command output goes to stdout, logs to stderr
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

fn provider_gauges(metrics: &ProviderMetrics) -> std::result::Result<prometheus::Registry, prometheus::Error> {
    use prometheus::{IntGauge, IntGaugeVec, Opts, Registry};

    let registry = Registry::new();
    let snapshot = metrics.snapshot();

    let requests = IntGaugeVec::new(
        Opts::new("cim_storage_requests_total", "Requests handled by the provider core"),
        &["kind"],
    )?;
    for (kind, value) in [
        ("enumerate", snapshot.enumerations),
        ("get", snapshot.gets),
        ("invoke", snapshot.invocations),
        ("setting_change", snapshot.setting_changes),
    ] {
        requests.with_label_values(&[kind]).set(value as i64);
    }

    let faults = IntGaugeVec::new(
        Opts::new("cim_storage_faults_total", "Faults returned by the provider core"),
        &["category"],
    )?;
    for (category, value) in [
        ("not_found", snapshot.faults_not_found),
        ("invalid_parameter", snapshot.faults_invalid_parameter),
        ("not_supported", snapshot.faults_not_supported),
        ("failed", snapshot.faults_failed),
    ] {
        faults.with_label_values(&[category]).set(value as i64);
    }

    let indications = IntGauge::new("cim_storage_indications_total", "Indications enqueued")?;
    indications.set(snapshot.indications_enqueued as i64);

    registry.register(Box::new(requests))?;
    registry.register(Box::new(faults))?;
    registry.register(Box::new(indications))?;
    Ok(registry)
}

async fn run_metrics_server(addr: &str, metrics: Arc<ProviderMetrics>, shutdown: CancellationToken) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let mut response = Response::new(Body::empty());
                    match req.uri().path() {
                        "/metrics" => {
                            let encoder = TextEncoder::new();
                            let mut buffer = Vec::new();
                            let encoded = provider_gauges(&metrics)
                                .and_then(|registry| encoder.encode(&registry.gather(), &mut buffer));
                            match encoded {
                                Ok(()) => {
                                    if let Ok(value) = encoder.format_type().parse() {
                                        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
                                    }
                                    *response.body_mut() = Body::from(buffer);
                                }
                                Err(e) => {
                                    error!("Metrics encoding failed: {}", e);
                                    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                }
                            }
                        }
                        _ => {
                            *response.status_mut() = StatusCode::NOT_FOUND;
                            *response.body_mut() = Body::from("not found");
                        }
                    }
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid metrics server address: {}", e)))?;

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Failed(format!("Metrics server bind failed: {}", e)))?
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Failed(format!("Metrics server error: {}", e)))?;

    Ok(())
}
