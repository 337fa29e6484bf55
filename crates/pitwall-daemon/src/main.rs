//! pitwall-daemon: Formula SAE dashboard server.
//!
//! Boot order: open store and run migrations, bootstrap the admin account
//! on an empty user table, seed the sensor catalog, start the telemetry
//! hub and active source, start the LDX watcher, then serve HTTP. On
//! SIGINT/SIGTERM the HTTP listener stops accepting, the shutdown signal
//! fans out to every task, the hub closes all subscribers with 1001, and
//! the watcher finishes its in-flight file before exiting.
//!
//! Exit codes: 0 normal, 1 configuration/boot failure, 2 fatal runtime
//! fault.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pitwall_core::auth::hash_password;
use pitwall_core::config::ServerConfig;
use pitwall_core::schema::FormRegistry;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use pitwall_daemon::http::{router, AppState, AuthConfig};
use pitwall_daemon::hub::TelemetryHub;
use pitwall_daemon::source::{load_serial_config, SerialTelemetry, SourceManager};
use pitwall_daemon::store::Store;
use pitwall_daemon::values::ValueService;
use pitwall_daemon::watcher::{LdxWatcher, WATCH_DIRECTORY_KEY};

/// Formula SAE dashboard server
#[derive(Parser, Debug)]
#[command(name = "pitwall-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory holding the database file
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Directory holding form descriptors
    #[arg(long, default_value = "./forms")]
    forms_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let boot = match boot(&args) {
        Ok(boot) => boot,
        Err(e) => {
            error!(error = %e, "boot failed");
            return ExitCode::from(1);
        }
    };

    match run(boot).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal runtime error");
            ExitCode::from(2)
        }
    }
}

struct Boot {
    config: ServerConfig,
    store: Store,
    registry: Arc<RwLock<FormRegistry>>,
}

/// Everything that must succeed before any task starts.
fn boot(args: &Args) -> Result<Boot> {
    let config = ServerConfig::from_env().context("invalid configuration")?;

    let db_path = args.data_dir.join("pitwall.db");
    let store = Store::open(&db_path)
        .with_context(|| format!("failed to open store at {}", db_path.display()))?;
    info!(path = %db_path.display(), "store opened");

    bootstrap_admin(&store, &config)?;

    let seeded = store
        .seed_default_sensors()
        .context("failed to seed sensors")?;
    if seeded > 0 {
        info!(count = seeded, "seeded default sensor catalog");
    }

    if store
        .get_setting(WATCH_DIRECTORY_KEY)
        .context("failed to read settings")?
        .is_none()
    {
        if let Some(dir) = &config.ldx_watch_dir {
            store
                .put_setting(WATCH_DIRECTORY_KEY, dir)
                .context("failed to store watch directory")?;
            info!(path = %dir, "watch directory taken from LDX_WATCH_DIR");
        }
    }

    let registry = FormRegistry::load(&args.forms_dir)
        .with_context(|| format!("failed to load forms from {}", args.forms_dir.display()))?;
    info!(forms = registry.len(), "form registry loaded");

    Ok(Boot {
        config,
        store,
        registry: Arc::new(RwLock::new(registry)),
    })
}

/// Creates the bootstrap admin when the user table is empty.
fn bootstrap_admin(store: &Store, config: &ServerConfig) -> Result<()> {
    if store.count_users().context("failed to count users")? > 0 {
        return Ok(());
    }
    let (Some(username), Some(password)) = (&config.admin_username, &config.admin_password)
    else {
        warn!("user table is empty and ADMIN_USERNAME/ADMIN_PASSWORD are unset; no one can log in");
        return Ok(());
    };
    let hash = hash_password(password).context("failed to hash bootstrap password")?;
    store
        .create_user(username, &hash, true, &[])
        .context("failed to create bootstrap admin")?;
    info!(user = %username, "bootstrap admin created");
    Ok(())
}

async fn run(boot: Boot) -> Result<()> {
    let Boot {
        config,
        store,
        registry,
    } = boot;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let hub = Arc::new(TelemetryHub::new());
    let serial = SerialTelemetry::spawn(load_serial_config(&store), shutdown_rx.clone());
    let sources = Arc::new(SourceManager::new(
        store.clone(),
        Arc::clone(&hub),
        serial,
    ));
    let producer = tokio::spawn(Arc::clone(&sources).run(shutdown_rx.clone()));

    let watcher = LdxWatcher::new(store.clone(), Arc::clone(&registry));
    let watcher_task = tokio::spawn(watcher.run(shutdown_rx.clone()));

    let state = AppState {
        store: store.clone(),
        registry,
        values: Arc::new(ValueService::new(store)),
        hub: Arc::clone(&hub),
        sources: Arc::clone(&sources),
        auth: Arc::new(AuthConfig {
            jwt_secret: config.jwt_secret.clone(),
            token_ttl: config.token_ttl,
        }),
    };

    let app = router(state, &config.allowed_origins);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "pitwall-daemon listening");

    tokio::spawn(signal_listener(shutdown_tx));

    let mut serve_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = serve_shutdown.changed().await;
        })
        .await
        .context("server error")?;

    // HTTP is down; close subscribers and let tasks drain.
    hub.close_all();
    let drain = Duration::from_secs(2);
    let _ = tokio::time::timeout(drain, producer).await;
    let _ = tokio::time::timeout(drain, watcher_task).await;
    info!("shutdown complete");
    Ok(())
}

/// Flips the shutdown signal on SIGINT or SIGTERM.
async fn signal_listener(shutdown_tx: watch::Sender<bool>) {
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGINT handler");
            return;
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            return;
        }
    };
    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
    let _ = shutdown_tx.send(true);
}
