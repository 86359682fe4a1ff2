//! nginx-operator - converges Nginx custom resources into running workloads

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use nginx_operator::config::{ControllerConfig, DEFAULT_ERROR_REQUEUE, DEFAULT_FILTER_REQUEUE};
use nginx_operator::controller::{error_policy, reconcile, Context};
use nginx_operator::crd::Nginx;
use nginx_operator::filter::AnnotationFilter;
use nginx_operator::telemetry::{init_logging, LogFormat};
use nginx_operator::CONTROLLER_NAME;

/// nginx-operator - declarative nginx deployments on Kubernetes
#[derive(Parser, Debug)]
#[command(name = "nginx-operator", version, about, long_about = None)]
struct Cli {
    /// Generate the CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Log output format
    #[arg(long, value_enum, env = "NGINX_OPERATOR_LOG_FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    Controller(ControllerArgs),
}

/// Controller mode arguments
#[derive(Args, Debug, Default)]
struct ControllerArgs {
    /// Only converge Nginx objects whose annotations match this selector
    /// (label selector syntax, e.g. `shard=a,tier in (edge)`)
    #[arg(long, env = "NGINX_OPERATOR_ANNOTATION_FILTER", default_value = "")]
    annotation_filter: String,

    /// Seconds before a filtered-out object is looked at again
    #[arg(long, env = "NGINX_OPERATOR_FILTER_REQUEUE_SECS", default_value_t = DEFAULT_FILTER_REQUEUE.as_secs())]
    filter_requeue_secs: u64,

    /// Seconds before a retryable failure is retried
    #[arg(long, env = "NGINX_OPERATOR_ERROR_REQUEUE_SECS", default_value_t = DEFAULT_ERROR_REQUEUE.as_secs())]
    error_requeue_secs: u64,

    /// Skip installing the CRD on startup
    #[arg(long)]
    skip_crd_install: bool,
}

impl ControllerArgs {
    /// Arguments as if `controller` had been given with no flags
    fn parse_defaults() -> Self {
        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            args: ControllerArgs,
        }
        Wrapper::parse_from(["nginx-operator"]).args
    }

    fn to_config(&self) -> anyhow::Result<ControllerConfig> {
        Ok(ControllerConfig {
            annotation_filter: AnnotationFilter::parse(&self.annotation_filter)
                .map_err(|e| anyhow::anyhow!("invalid --annotation-filter: {}", e))?,
            filter_requeue: Duration::from_secs(self.filter_requeue_secs),
            error_requeue: Duration::from_secs(self.error_requeue_secs),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Nginx::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_logging(cli.log_format)?;

    match cli.command {
        Some(Commands::Controller(args)) => run_controller(args).await,
        None => run_controller(ControllerArgs::parse_defaults()).await,
    }
}

/// Ensure the Nginx CRD is installed
///
/// The operator installs its own CRD on startup using server-side apply so the
/// schema always matches the running version.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CONTROLLER_NAME).force();

    tracing::info!("Installing Nginx CRD...");
    crds.patch(
        "nginxes.devops.github.com",
        &params,
        &Patch::Apply(&Nginx::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Nginx CRD: {}", e))?;

    Ok(())
}

/// Run the controller until a shutdown signal arrives
async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let config = args.to_config()?;
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if !args.skip_crd_install {
        ensure_crd_installed(&client).await?;
    }

    if !config.annotation_filter.is_empty() {
        tracing::info!(filter = %config.annotation_filter, "Only converging Nginx objects matching annotation filter");
    }

    let nginxes: Api<Nginx> = Api::all(client.clone());
    let ctx = Arc::new(Context::from_client(client.clone(), config));

    tracing::info!("Starting Nginx controller");
    Controller::new(nginxes, WatcherConfig::default())
        .owns(Api::<Deployment>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Service>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Ingress>::all(client), WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!(nginx = %obj.name, "reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = %e, "reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("Nginx controller stopped");
    Ok(())
}
