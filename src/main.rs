//! Monarch Operator - reconciles MonarchMesh resources

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use kube::Client;

use monarch::config::{MeshConfig, DEFAULT_MESH_PORT, DEFAULT_RESYNC_SECS};
use monarch::controller::{build_mesh_controller, Context};
use monarch::startup::{crd_yaml, ensure_crd};
use monarch::telemetry::{init_telemetry, LogFormat, TelemetryConfig};

/// Monarch - Kubernetes operator for Monarch worker meshes
#[derive(Parser, Debug)]
#[command(name = "monarch-operator", version, about, long_about = None)]
struct Cli {
    /// Print the MonarchMesh CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Log output format
    #[arg(long, env = "MONARCH_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Installs the MonarchMesh CRD, then watches MonarchMesh, Service and
    /// StatefulSet objects in all namespaces until SIGTERM.
    Controller(ControllerArgs),
}

/// Controller mode arguments
#[derive(Args, Debug, Clone)]
struct ControllerArgs {
    /// Label key carrying the owning mesh name on children and pods
    #[arg(long, env = "MONARCH_MESH_LABEL_KEY", default_value = "monarch.pytorch.org/mesh-name")]
    mesh_label_key: String,

    /// Application name label key
    #[arg(long, env = "MONARCH_APP_LABEL_KEY", default_value = "app.kubernetes.io/name")]
    app_label_key: String,

    /// Application name label value
    #[arg(long, env = "MONARCH_APP_LABEL_VALUE", default_value = "monarch-worker")]
    app_label_value: String,

    /// Port used when a mesh leaves spec.port unset
    #[arg(long, env = "MONARCH_DEFAULT_PORT", default_value_t = DEFAULT_MESH_PORT)]
    default_port: i32,

    /// Suffix appended to the mesh name for the headless Service
    #[arg(long, env = "MONARCH_SERVICE_SUFFIX", default_value = "-svc")]
    service_suffix: String,

    /// Name of the Service port
    #[arg(long, env = "MONARCH_PORT_NAME", default_value = "monarch")]
    port_name: String,

    /// Cluster DNS domain
    #[arg(long, env = "MONARCH_CLUSTER_DOMAIN", default_value = "cluster.local")]
    cluster_domain: String,

    /// Seconds between periodic resyncs of a healthy mesh
    #[arg(long, env = "MONARCH_RESYNC_SECS", default_value_t = DEFAULT_RESYNC_SECS)]
    resync_secs: u64,

    /// Skip CRD installation (when the CRD is managed out of band)
    #[arg(long, env = "MONARCH_SKIP_CRD_INSTALL")]
    skip_crd_install: bool,
}

impl Default for ControllerArgs {
    fn default() -> Self {
        let defaults = MeshConfig::default();
        Self {
            mesh_label_key: defaults.mesh_label_key,
            app_label_key: defaults.app_label_key,
            app_label_value: defaults.app_label_value,
            default_port: defaults.default_port,
            service_suffix: defaults.service_suffix,
            port_name: defaults.port_name,
            cluster_domain: defaults.cluster_domain,
            resync_secs: defaults.resync_interval.as_secs(),
            skip_crd_install: false,
        }
    }
}

impl From<&ControllerArgs> for MeshConfig {
    fn from(args: &ControllerArgs) -> Self {
        MeshConfig {
            mesh_label_key: args.mesh_label_key.clone(),
            app_label_key: args.app_label_key.clone(),
            app_label_value: args.app_label_value.clone(),
            default_port: args.default_port,
            service_suffix: args.service_suffix.clone(),
            port_name: args.port_name.clone(),
            cluster_domain: args.cluster_domain.clone(),
            resync_interval: Duration::from_secs(args.resync_secs),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = crd_yaml().map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
        ..Default::default()
    })?;

    match cli.command {
        Some(Commands::Controller(args)) => run_controller(args).await,
        None => run_controller(ControllerArgs::default()).await,
    }
}

/// Run controller mode
async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let config = MeshConfig::from(&args);
    config.validate()?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if args.skip_crd_install {
        tracing::info!("Skipping CRD installation");
    } else {
        ensure_crd(&client).await?;
    }

    tracing::info!(
        service_suffix = %config.service_suffix,
        default_port = config.default_port,
        resync_secs = config.resync_interval.as_secs(),
        "Starting Monarch controllers..."
    );

    let ctx = Arc::new(Context::for_cluster(client.clone(), config));
    build_mesh_controller(client, ctx).await;

    tracing::info!("Monarch controller shutting down");
    Ok(())
}
