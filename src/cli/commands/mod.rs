use crate::config::credentials::{CREDENTIAL_NAMES, get_credential_value};
use crate::config::{Config, get_config_path, load_config, save_config};
use crate::dispatch::Dispatcher;
use crate::events::InboundEvent;
use crate::gateway::auth::AuthConfig;
use crate::gateway::{self, AppState, Branding, RouterParts};
use crate::pipeline::{AuditLog, MediaStore, Pipeline, WebhookForwarder};
use crate::session::{SessionManager, SessionSettings, StartOutcome};
use crate::sidecar::{CallbackRegistry, SidecarEngine, callback_router};
use crate::utils::metrics::install_recorder;
use crate::utils::task_tracker::TaskTracker;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Parser)]
#[command(name = "wabridge")]
#[command(about = "HTTP bridge between a WhatsApp session and a webhook consumer")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (session, inbound pipeline, HTTP API)
    Serve {
        /// Config file (default: ~/.wabridge/config.json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override gateway.port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Write a starter config with a freshly generated access key
    Init {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Replace an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Validate the config and print a redacted summary
    Check {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port } => serve(config.as_deref(), port).await?,
        Commands::Init { config, force } => {
            let path = init(config.as_deref(), force)?;
            println!("Wrote {}", path.display());
            println!("Edit engine.sidecarUrl and webhook.url, then run `wabridge check`.");
        }
        Commands::Check { config } => check(config.as_deref())?,
    }

    Ok(())
}

/// The long-lived pieces of a running bridge.
struct Bridge {
    session: SessionManager,
    inbound: mpsc::Receiver<InboundEvent>,
    pipeline: Arc<Pipeline>,
    media: Arc<MediaStore>,
    state: AppState,
    parts: RouterParts,
}

fn assemble(config: &Config, metrics: Option<PrometheusHandle>) -> Result<Bridge> {
    let base_url = config.public_base_url();
    let media = Arc::new(
        MediaStore::new(config.uploads_path(), &base_url, config.media.max_bytes)
            .context("failed to prepare uploads directory")?,
    );
    let audit = Arc::new(AuditLog::new(config.audit.capacity));
    let forwarder = Arc::new(WebhookForwarder::from_config(&config.webhook));

    let registry = Arc::new(CallbackRegistry::new());
    let engine = SidecarEngine::from_config(config, registry.clone())
        .context("failed to create sidecar engine")?;
    let (session, inbound) =
        SessionManager::spawn(Arc::new(engine), SessionSettings::from_config(config));

    let pipeline = Arc::new(Pipeline::new(
        Arc::new(session.clone()),
        media.clone(),
        audit.clone(),
        forwarder,
    ));

    let state = AppState {
        session: session.clone(),
        dispatcher: Arc::new(Dispatcher::new(Arc::new(session.clone()))),
        audit,
        branding: Arc::new(Branding::from_config(config)),
        staging_dir: config.staging_path(),
        max_upload_bytes: config.gateway.max_upload_bytes,
        metrics,
    };
    let parts = RouterParts {
        auth: AuthConfig::new(&config.gateway.access_key),
        uploads_dir: config.uploads_path(),
        extra: callback_router(registry, &config.engine.callback_secret),
    };

    Ok(Bridge {
        session,
        inbound,
        pipeline,
        media,
        state,
        parts,
    })
}

async fn serve(config_path: Option<&Path>, port: Option<u16>) -> Result<()> {
    info!("Loading configuration...");
    let mut config = load_config(config_path)?;
    if let Some(port) = port {
        config.gateway.port = port;
    }
    config.validate()?;
    info!(
        "Configuration loaded. Session '{}', sidecar {}",
        config.session.name, config.engine.sidecar_url
    );

    let metrics = match install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("metrics disabled: {:#}", e);
            None
        }
    };

    let bridge = assemble(&config, metrics)?;
    let tasks = TaskTracker::new();

    tasks
        .spawn("pipeline", bridge.pipeline.clone().run(bridge.inbound))
        .await;

    if config.media.retention_hours > 0 {
        let retention = Duration::from_secs(config.media.retention_hours * 3600);
        tasks
            .spawn("retention-sweep", retention_loop(bridge.media.clone(), retention))
            .await;
    } else {
        debug!("media retention disabled, uploads are kept forever");
    }

    let server = gateway::start(
        &config.gateway.host,
        config.gateway.port,
        bridge.state,
        bridge.parts,
    )
    .await?;

    match bridge.session.start().await {
        StartOutcome::Started => info!("session start requested"),
        other => warn!("session start returned {:?}", other),
    }

    println!("Starting wabridge...");
    println!(
        "HTTP API listening on {}:{}",
        config.gateway.host, config.gateway.port
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
        res = server => {
            if let Err(e) = res {
                error!("HTTP API task failed: {}", e);
            }
        }
    }

    let exited = tasks.cancel_all().await;
    if !exited.is_empty() {
        error!("background tasks stopped before shutdown: {}", exited.join(", "));
    }
    bridge.session.shutdown().await;
    info!("wabridge stopped");
    Ok(())
}

/// Delete expired uploads once per [`SWEEP_INTERVAL`].
async fn retention_loop(media: Arc<MediaStore>, retention: Duration) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match media.sweep(retention).await {
            Ok(n) => debug!("retention sweep done ({} removed)", n),
            Err(e) => warn!("retention sweep failed: {:#}", e),
        }
    }
}

/// Write default settings plus a random access key. Refuses to clobber an
/// existing file unless `force` is set.
fn init(config_path: Option<&Path>, force: bool) -> Result<PathBuf> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => get_config_path()?,
    };
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let mut config = Config::default();
    config.gateway.access_key = Uuid::new_v4().simple().to_string();
    save_config(&config, Some(path.as_path()))?;
    info!("wrote starter config to {}", path.display());
    Ok(path)
}

fn check(config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => get_config_path()?,
    };
    let config = load_config(Some(path.as_path()))?;

    println!("wabridge config check\n");
    println!(
        "Config: {} {}",
        path.display(),
        if path.exists() { "\u{2713}" } else { "(defaults)" }
    );
    for line in summary(&config) {
        println!("{}", line);
    }

    match config.validate() {
        Ok(()) => {
            println!("\nConfig is valid \u{2713}");
            Ok(())
        }
        Err(e) => {
            println!("\nConfig is invalid \u{2717}");
            Err(e).context("config validation failed")
        }
    }
}

/// Human-readable config summary. Secrets only show whether they are set.
fn summary(config: &Config) -> Vec<String> {
    let mut lines = vec![
        format!("Listen: {}:{}", config.gateway.host, config.gateway.port),
        format!("Public URL: {}", config.public_base_url()),
        format!("Session: {}", config.session.name),
        format!("Credentials: {}", config.credentials_path().display()),
        format!("Sidecar: {}", config.engine.sidecar_url),
        format!(
            "Webhook: {}",
            if config.webhook.url.is_empty() {
                "disabled"
            } else {
                config.webhook.url.as_str()
            }
        ),
        format!("Uploads: {}", config.uploads_path().display()),
        format!(
            "Retention: {}",
            if config.media.retention_hours == 0 {
                "forever".to_string()
            } else {
                format!("{}h", config.media.retention_hours)
            }
        ),
        format!("Audit capacity: {}", config.audit.capacity),
    ];
    for name in CREDENTIAL_NAMES {
        if *name == "webhook-url" {
            continue;
        }
        let set = get_credential_value(config, name).is_some_and(|v| !v.is_empty());
        lines.push(format!(
            "{}: {}",
            name,
            if set { "\u{2713}" } else { "not set" }
        ));
    }
    lines
}
