//! mcloud-controller: reconciles declared cloud resources with the provider.
//!
//! This daemon:
//! - Loads the declared Cloud DNS zones and Cloud Run services from a manifest
//! - Re-reads the manifest periodically and prunes objects that disappeared
//! - Runs one control loop per resource kind against the provider APIs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mcloud_controller::clients::dns::DEFAULT_DNS_ENDPOINT;
use mcloud_controller::clients::run::DEFAULT_RUN_ENDPOINT;
use mcloud_controller::clients::{CloudDnsClient, CloudRunClient, GcpHttp};
use mcloud_controller::config::{DiffPolicies, TrackedField};
use mcloud_controller::manifest::{self, Manifest};
use mcloud_controller::model::dns::{DnsZoneSpec, DnsZoneStatus};
use mcloud_controller::model::run::{CloudRunSpec, CloudRunStatus};
use mcloud_controller::reconciler::dns::DnsZoneProvider;
use mcloud_controller::reconciler::run::CloudRunProvider;
use mcloud_controller::{Controller, ControllerConfig, MemoryStore, ObjectStore, Reconciler};

/// mcloud controller
#[derive(Parser, Debug)]
#[command(name = "mcloud-controller", version, about)]
struct Args {
    /// Manifest file declaring DNS zones and Cloud Run services (JSON)
    #[arg(long)]
    manifest: PathBuf,

    /// Seconds between manifest re-reads
    #[arg(long, default_value = "30")]
    sync_interval: u64,

    /// Cloud DNS API endpoint
    #[arg(long, default_value = DEFAULT_DNS_ENDPOINT)]
    dns_endpoint: String,

    /// Cloud Run API endpoint
    #[arg(long, default_value = DEFAULT_RUN_ENDPOINT)]
    run_endpoint: String,

    /// OAuth2 access token sent as bearer token
    #[arg(long, env = "MCLOUD_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Timeout for a single provider call in seconds
    #[arg(long, default_value = "30")]
    request_timeout: u64,

    /// Requeue delay while an operation is in flight, in milliseconds
    #[arg(long, default_value = "1000")]
    short_retry_ms: u64,

    /// Requeue delay once in sync, in seconds
    #[arg(long, default_value = "60")]
    steady_interval: u64,

    /// Extra diff policy, e.g. run.traffic=exact or dns.dnssec_state=ignore (repeatable)
    #[arg(long = "track")]
    track: Vec<TrackedField>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mcloud_controller=info,reqwest=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let instance = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    info!("Starting mcloud-controller on {}", instance);
    info!("Manifest: {}", args.manifest.display());
    info!("DNS endpoint: {}", args.dns_endpoint);
    info!("Run endpoint: {}", args.run_endpoint);

    let config = ControllerConfig {
        short_retry: Duration::from_millis(args.short_retry_ms),
        steady_interval: Duration::from_secs(args.steady_interval),
        request_timeout: Duration::from_secs(args.request_timeout),
        ..Default::default()
    };
    let policies = DiffPolicies::from_overrides(&args.track)?;

    let http = GcpHttp::new(args.access_token.clone(), config.request_timeout)?;

    let dns_store: Arc<dyn ObjectStore<DnsZoneSpec, DnsZoneStatus>> =
        Arc::new(MemoryStore::<DnsZoneSpec, DnsZoneStatus>::new());
    let run_store: Arc<dyn ObjectStore<CloudRunSpec, CloudRunStatus>> =
        Arc::new(MemoryStore::<CloudRunSpec, CloudRunStatus>::new());

    // Declare objects before the loops start
    apply_manifest(&args.manifest, &dns_store, &run_store)
        .await
        .context("initial manifest load failed")?;

    let dns = Controller::new(Reconciler::new(
        DnsZoneProvider::new(
            CloudDnsClient::new(http.clone(), args.dns_endpoint.clone()),
            policies.dns,
        ),
        dns_store.clone(),
        config.clone(),
    ));
    let run = Controller::new(Reconciler::new(
        CloudRunProvider::new(
            CloudRunClient::new(http, args.run_endpoint.clone()),
            policies.run,
        ),
        run_store.clone(),
        config.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dns_handle = tokio::spawn(dns.run(shutdown_rx.clone()));
    let run_handle = tokio::spawn(run.run(shutdown_rx));

    let mut interval = tokio::time::interval(Duration::from_secs(args.sync_interval));
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = apply_manifest(&args.manifest, &dns_store, &run_store).await {
                    error!("Manifest sync failed: {:#}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = dns_handle.await;
    let _ = run_handle.await;
    info!("mcloud-controller stopped");

    Ok(())
}

/// Load the manifest and apply it to both stores.
async fn apply_manifest(
    path: &Path,
    dns_store: &Arc<dyn ObjectStore<DnsZoneSpec, DnsZoneStatus>>,
    run_store: &Arc<dyn ObjectStore<CloudRunSpec, CloudRunStatus>>,
) -> Result<()> {
    let manifest = Manifest::load(path)?;

    let dns = manifest::sync(dns_store.as_ref(), &manifest.dns_zones)
        .await
        .context("failed to sync DNS zones")?;
    let run = manifest::sync(run_store.as_ref(), &manifest.cloud_runs)
        .await
        .context("failed to sync Cloud Run services")?;

    if dns.changed() || run.changed() {
        info!(
            "Applied manifest (dns: +{} ~{} -{}, run: +{} ~{} -{})",
            dns.created,
            dns.updated,
            dns.deletion_requested,
            run.created,
            run.updated,
            run.deletion_requested,
        );
    }
    Ok(())
}
