use std::{
    sync::{Mutex, OnceLock, PoisonError},
    time::Instant,
};

use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

use yatube_util::{AppConfig, Environment};

const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Counters emitted by the handlers, with their help text.
const COUNTERS: &[(&str, &str)] = &[
    ("posts_created_total", "Posts published"),
    ("posts_updated_total", "Posts edited by their authors"),
    (
        "comments_created_total",
        "Comment submissions, labelled by result",
    ),
    (
        "follow_changes_total",
        "Follow edges created or removed, labelled by action",
    ),
    (
        "page_cache_requests_total",
        "Main feed cache lookups, labelled by result",
    ),
    ("auth_logins_total", "Login attempts, labelled by result"),
];

static TRACING_READY: OnceLock<()> = OnceLock::new();
static RECORDER: Mutex<Option<PrometheusHandle>> = Mutex::new(None);
static STARTED: OnceLock<Instant> = OnceLock::new();

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to initialize tracing: {0}")]
    Tracing(#[from] TryInitError),
    #[error("failed to initialize prometheus recorder: {0}")]
    Metrics(#[from] BuildError),
}

fn git_sha() -> &'static str {
    option_env!("GIT_SHA").unwrap_or("unknown")
}

/// Installs the global subscriber: pretty output locally, JSON lines in production.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryError> {
    if TRACING_READY.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = config.environment == Environment::Production;
    let pretty_layer = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_timer(UtcTime::rfc_3339())
            .pretty()
    });
    let json_layer = json.then(|| {
        fmt::layer()
            .with_target(false)
            .with_timer(UtcTime::rfc_3339())
            .json()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty_layer)
        .with(json_layer)
        .try_init()?;

    TRACING_READY.set(()).ok();
    tracing::info!(
        stage = "telemetry",
        env = %config.environment.as_str(),
        version = BUILD_VERSION,
        git_sha = git_sha(),
        "tracing initialized"
    );
    Ok(())
}

/// Installs the Prometheus recorder once per process and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    let mut installed = RECORDER.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = installed.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *installed = Some(handle.clone());

    describe_gauge!("app_build_info", "Build metadata for the running binary");
    describe_gauge!("app_uptime_seconds", "Seconds since the process started");
    for (name, help) in COUNTERS {
        describe_counter!(*name, *help);
    }
    gauge!("app_build_info", "version" => BUILD_VERSION, "git" => git_sha()).set(1.0);
    STARTED.get_or_init(Instant::now);

    Ok(handle)
}

/// Prometheus exposition with the uptime gauge refreshed.
pub fn render_metrics(handle: &PrometheusHandle) -> String {
    let uptime = STARTED
        .get()
        .map(|start| start.elapsed().as_secs_f64())
        .unwrap_or_default();
    gauge!("app_uptime_seconds").set(uptime);
    handle.render()
}
