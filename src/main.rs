use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sensorwatch::data::duration::format_duration;
use sensorwatch::{
    ApiClient, LatestReading, Mode, PushStream, Session, Settings, ViewModel,
};

#[derive(Parser, Debug)]
#[command(name = "sensorwatch")]
#[command(about = "Reconcile push and polled sensor telemetry into live snapshots")]
struct Args {
    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Connect to a TCP push feed (host:port)
    #[arg(long)]
    connect: Option<String>,

    /// Base URL of the HTTP API
    #[arg(long)]
    api: Option<String>,

    /// Which view to serve
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Poll interval in live mode (e.g., "5s", "500ms")
    #[arg(long)]
    poll_interval: Option<String>,

    /// Skip seeding the roster from /api/devices
    #[arg(long)]
    no_bootstrap: bool,

    /// Print every snapshot as one JSON line on stdout
    #[arg(long)]
    json: bool,

    /// Log filter (e.g., "sensorwatch=debug"); overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    let settings = load_settings(&args)?;
    let config = settings.session_config()?;
    info!(
        mode = %config.mode,
        poll_interval = %format_duration(config.poll_interval),
        staleness_timeout = %format_duration(config.staleness_timeout),
        "starting"
    );

    let client = ApiClient::builder()
        .endpoint(settings.api_base.clone())
        .timeout(settings.request_timeout()?)
        .build()?;

    // The device list seeds the roster before any live input is applied.
    let records = if settings.bootstrap {
        match client.devices().await {
            Ok(records) => {
                info!(count = records.len(), "fetched device list");
                records
            }
            Err(e) => {
                warn!(error = %e, "device bootstrap failed, continuing without it");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let push = match &settings.push_addr {
        Some(addr) => Some(connect_push(addr).await?),
        None => None,
    };

    let poller: Option<Arc<dyn LatestReading>> = Some(Arc::new(client));
    let session = Session::spawn_seeded(config, records, push, poller);

    let mut views = session.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            changed = views.changed() => {
                if changed.is_err() {
                    warn!("session ended");
                    break;
                }
                let view = views.borrow_and_update().clone();
                emit(&view, args.json)?;
            }
        }
    }

    let report = session.shutdown().await;
    info!(
        poll_task_cancelled = report.poll_task_cancelled,
        watchdog_timers_cancelled = report.watchdog_timers_cancelled,
        push_closed = report.push_closed,
        "teardown complete"
    );
    Ok(())
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("sensorwatch=info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Settings file and environment, then command-line overrides.
fn load_settings(args: &Args) -> Result<Settings> {
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(addr) = &args.connect {
        settings.push_addr = Some(addr.clone());
    }
    if let Some(api) = &args.api {
        settings.api_base = api.clone();
    }
    if let Some(mode) = args.mode {
        settings.mode = mode;
    }
    if let Some(interval) = &args.poll_interval {
        settings.poll_interval = interval.clone();
    }
    if args.no_bootstrap {
        settings.bootstrap = false;
    }
    settings.validate()?;
    Ok(settings)
}

async fn connect_push(addr: &str) -> Result<PushStream> {
    info!(addr, "connecting to push feed");
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;
    info!(addr, "push feed connected");
    Ok(PushStream::spawn(stream, addr))
}

fn emit(view: &ViewModel, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(view)?);
        return Ok(());
    }

    let current = view.current.as_ref();
    info!(
        revision = view.revision,
        connected = view.connected,
        connectivity = ?view.connectivity,
        devices = view.devices.len(),
        live = view.live_devices(),
        device = current.map(|c| c.device_name.as_str()).unwrap_or("-"),
        temperature = ?current.and_then(|c| c.readings.temperature),
        humidity = ?current.and_then(|c| c.readings.humidity),
        pressure = ?current.and_then(|c| c.readings.pressure),
        "snapshot"
    );
    Ok(())
}
