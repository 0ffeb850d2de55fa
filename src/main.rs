// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, PersistentVolumeClaim, Pod},
};
use kube::{
    runtime::{
        controller::{self, Action},
        watcher::Config,
        Controller,
    },
    Api, Client, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use sidetor::{
    constants::{
        DEFAULT_CONTROLLER_CONCURRENCY, DEFAULT_INIT_IMAGE, DEFAULT_RELAY_IMAGE,
        DEFAULT_SIDECAR_CONTAINER_NAME, HEALTH_SERVER_PATH, METRICS_SERVER_BIND_ADDRESS,
        METRICS_SERVER_PATH, METRICS_SERVER_PORT, TOKIO_WORKER_THREADS,
    },
    context::{Context, Settings},
    crd::{OnionService, TorBridgeConfig},
    exec::KubeExec,
    labels::{K8S_MANAGED_BY, MANAGED_BY_ONION_SERVICE, MANAGED_BY_TOR_BRIDGE_CONFIG},
    metrics,
    reconcilers::{
        reconcile_onionservice, reconcile_pod, reconcile_torbridgeconfig, retry::BackoffTracker,
        ReconcileOutcome,
    },
    selector::LabelQuery,
    store::KubeStore,
};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

#[derive(Parser, Debug)]
#[command(
    name = "sidetor",
    version,
    about = "Routes workload traffic through an injected Tor relay sidecar"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers against the current cluster
    Run(RunArgs),
    /// Print shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Name of the injected relay container
    #[arg(long, env = "SIDETOR_SIDECAR_NAME", default_value = DEFAULT_SIDECAR_CONTAINER_NAME)]
    sidecar_name: String,

    /// Relay image used when a resource does not set one
    #[arg(long, env = "SIDETOR_RELAY_IMAGE", default_value = DEFAULT_RELAY_IMAGE)]
    relay_image: String,

    /// Image for the onion service permissions init container
    #[arg(long, env = "SIDETOR_INIT_IMAGE", default_value = DEFAULT_INIT_IMAGE)]
    init_image: String,

    /// Watch a single namespace instead of the whole cluster
    #[arg(long, env = "SIDETOR_NAMESPACE")]
    namespace: Option<String>,

    /// Maximum concurrent reconciles per controller
    #[arg(long, env = "SIDETOR_CONCURRENCY", default_value_t = DEFAULT_CONTROLLER_CONCURRENCY)]
    concurrency: u16,

    /// Port for the metrics and health endpoints
    #[arg(long, env = "SIDETOR_METRICS_PORT", default_value_t = METRICS_SERVER_PORT)]
    metrics_port: u16,

    /// Label (key=value) that opts a pod into sidecar injection
    #[arg(long, env = "SIDETOR_SENTINEL_LABEL", default_value = "tor=hide-me", value_parser = parse_sentinel_label)]
    sentinel_label: (String, String),
}

impl RunArgs {
    fn settings(&self) -> Settings {
        Settings {
            sidecar_container_name: self.sidecar_name.clone(),
            relay_image: self.relay_image.clone(),
            init_image: self.init_image.clone(),
            sentinel_label: self.sentinel_label.clone(),
        }
    }
}

/// Parse a single `key=value` label requirement.
fn parse_sentinel_label(raw: &str) -> Result<(String, String), String> {
    let query = LabelQuery::parse(raw).map_err(|e| e.to_string())?;
    let mut requirements = query.requirements().iter();
    match (requirements.next(), requirements.next()) {
        (Some((key, value)), None) => Ok((key.clone(), value.clone())),
        _ => Err(format!("expected exactly one key=value label, got \"{raw}\"")),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = match cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "sidetor", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Run(args) => args,
    };

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("sidetor-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

/// Initialize logging.
///
/// Respects `RUST_LOG` for filtering (default INFO) and `RUST_LOG_FORMAT`
/// (`json` or `text`) for output format.
fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(args: RunArgs) -> Result<()> {
    init_logging();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = args.namespace.as_deref().unwrap_or("<all>"),
        "Starting sidetor controller"
    );

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;

    let ctx = Arc::new(Context::new(
        KubeStore::new(client.clone()),
        KubeExec::new(client.clone()),
        args.settings(),
    ));

    info!(
        sidecar = %ctx.settings.sidecar_container_name,
        sentinel = %ctx.settings.sentinel_selector(),
        "Starting all controllers"
    );

    // Controllers should never exit - if one does, log it and exit the process
    tokio::select! {
        result = run_torbridgeconfig_controller(client.clone(), ctx.clone(), &args) => {
            error!("CRITICAL: TorBridgeConfig controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("TorBridgeConfig controller exited unexpectedly without error")
        }
        result = run_pod_controller(client.clone(), ctx.clone(), &args) => {
            error!("CRITICAL: Pod controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Pod controller exited unexpectedly without error")
        }
        result = run_onionservice_controller(client.clone(), ctx.clone(), &args) => {
            error!("CRITICAL: OnionService controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("OnionService controller exited unexpectedly without error")
        }
        result = run_metrics_server(args.metrics_port) => {
            error!("CRITICAL: Metrics server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Metrics server exited unexpectedly without error")
        }
    }
}

/// Namespaced API handle, or cluster-wide when no namespace is configured.
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn managed_by(value: &str) -> Config {
    Config::default().labels(&format!("{K8S_MANAGED_BY}={value}"))
}

/// Run the `TorBridgeConfig` controller
async fn run_torbridgeconfig_controller(
    client: Client,
    ctx: Arc<Context>,
    args: &RunArgs,
) -> Result<()> {
    info!("Starting TorBridgeConfig controller");

    let namespace = args.namespace.as_deref();
    let api = scoped_api::<TorBridgeConfig>(&client, namespace);
    let configmaps = scoped_api::<ConfigMap>(&client, namespace);

    Controller::new(api, Config::default())
        .owns(configmaps, managed_by(MANAGED_BY_TOR_BRIDGE_CONFIG))
        .with_config(controller::Config::default().concurrency(args.concurrency))
        .shutdown_on_signal()
        .run(reconcile_torbridgeconfig_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the sentinel `Pod` controller
async fn run_pod_controller(client: Client, ctx: Arc<Context>, args: &RunArgs) -> Result<()> {
    let selector = ctx.settings.sentinel_selector().to_string();
    info!(selector = %selector, "Starting Pod controller");

    let api = scoped_api::<Pod>(&client, args.namespace.as_deref());

    Controller::new(api, Config::default().labels(&selector))
        .with_config(controller::Config::default().concurrency(args.concurrency))
        .shutdown_on_signal()
        .run(reconcile_pod_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `OnionService` controller
async fn run_onionservice_controller(
    client: Client,
    ctx: Arc<Context>,
    args: &RunArgs,
) -> Result<()> {
    info!("Starting OnionService controller");

    let namespace = args.namespace.as_deref();
    let api = scoped_api::<OnionService>(&client, namespace);

    Controller::new(api, Config::default())
        .owns(
            scoped_api::<Deployment>(&client, namespace),
            managed_by(MANAGED_BY_ONION_SERVICE),
        )
        .owns(
            scoped_api::<ConfigMap>(&client, namespace),
            managed_by(MANAGED_BY_ONION_SERVICE),
        )
        .owns(
            scoped_api::<PersistentVolumeClaim>(&client, namespace),
            managed_by(MANAGED_BY_ONION_SERVICE),
        )
        .with_config(controller::Config::default().concurrency(args.concurrency))
        .shutdown_on_signal()
        .run(reconcile_onionservice_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Reconcile wrapper for `TorBridgeConfig`
async fn reconcile_torbridgeconfig_wrapper(
    config: Arc<TorBridgeConfig>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let result = reconcile_torbridgeconfig(&ctx, (*config).clone()).await;
    finish(&ctx, config.as_ref(), start, result)
}

/// Reconcile wrapper for sentinel pods
async fn reconcile_pod_wrapper(pod: Arc<Pod>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let result = reconcile_pod(&ctx, (*pod).clone()).await;
    finish(&ctx, pod.as_ref(), start, result)
}

/// Reconcile wrapper for `OnionService`
async fn reconcile_onionservice_wrapper(
    service: Arc<OnionService>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let result = reconcile_onionservice(&ctx, (*service).clone()).await;
    finish(&ctx, service.as_ref(), start, result)
}

/// Record the reconcile result and translate it into a controller action.
fn finish<K>(
    ctx: &Context,
    resource: &K,
    start: Instant,
    result: Result<ReconcileOutcome>,
) -> Result<Action, ReconcileError>
where
    K: Resource<DynamicType = ()>,
{
    let kind = K::kind(&());
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();

    match result {
        Ok(outcome) => {
            metrics::record_reconciliation_success(&kind, start.elapsed());
            ctx.backoff
                .reset(&BackoffTracker::key(&kind, &namespace, &name));
            debug!(kind = %kind, namespace = %namespace, name = %name, outcome = ?outcome, "Reconcile finished");
            Ok(outcome_to_action(&kind, outcome))
        }
        Err(e) => {
            metrics::record_reconciliation_error(&kind, start.elapsed());
            error!(kind = %kind, namespace = %namespace, name = %name, error = %format!("{e:#}"), "Reconcile failed");
            Err(e.into())
        }
    }
}

fn outcome_to_action(kind: &str, outcome: ReconcileOutcome) -> Action {
    match outcome {
        ReconcileOutcome::Converged => Action::await_change(),
        ReconcileOutcome::RequeueAfter(delay) => {
            metrics::record_reconciliation_requeue(kind, "pending");
            Action::requeue(delay)
        }
    }
}

/// Requeue a failed object with per-object exponential backoff.
fn error_policy<K>(resource: Arc<K>, _err: &ReconcileError, ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let kind = K::kind(&());
    let key = BackoffTracker::key(
        &kind,
        &resource.namespace().unwrap_or_default(),
        &resource.name_any(),
    );
    let delay = ctx.backoff.next_delay(&key);
    metrics::record_error(&kind, "reconcile_error");
    debug!(key = %key, delay_secs = delay.as_secs_f64(), "Requeueing after error");
    Action::requeue(delay)
}

/// Serve Prometheus metrics and a liveness endpoint.
async fn run_metrics_server(port: u16) -> Result<()> {
    let app = Router::new()
        .route(METRICS_SERVER_PATH, get(metrics_handler))
        .route(HEALTH_SERVER_PATH, get(|| async { "ok" }));

    let address = format!("{METRICS_SERVER_BIND_ADDRESS}:{port}");
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind metrics server to {address}"))?;
    info!(address = %address, "Metrics server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
