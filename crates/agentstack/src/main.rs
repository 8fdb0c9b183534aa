//! agentstack: deploy, tear down and inspect one versioned agent stack
//!
//! Every setting comes from the environment (or the matching long flag), so
//! each subcommand runs without arguments in CI.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agentstack::aws::{AwsContext, Cloud, FromAwsContext, Inventory, ResourceScanner, verify_account};
use agentstack::config::{DeployArgs, DeploySettings, DeploymentConfig, IdentityArgs};
use agentstack::orchestrator::{Deployer, DockerCli, Teardown};

/// Default log filter: our own crates at info, the AWS SDK only when it warns
const DEFAULT_LOG_FILTER: &str = "info,aws_config=warn,aws_smithy_runtime=warn,\
aws_smithy_runtime_api=warn,aws_sdk_cloudformation=warn,aws_sdk_ecr=warn,aws_sdk_iam=warn,\
aws_sdk_kms=warn,aws_sdk_lambda=warn,aws_sdk_s3=warn,aws_sdk_s3vectors=warn,aws_sdk_sqs=warn,\
aws_sdk_sts=warn";

#[derive(Parser, Debug)]
#[command(name = "agentstack")]
#[command(about = "Deploy and tear down versioned agent stacks on AWS")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build and push the images, then create or update the stack
    Deploy(Box<DeployArgs>),

    /// Remove every resource of a deployment, reporting what is left
    Teardown(IdentityArgs),

    /// List a deployment's live resources without changing anything
    Scan {
        #[command(flatten)]
        identity: IdentityArgs,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Build the service clients once the credentials are known to belong to
/// the deployment account
async fn connect(config: &DeploymentConfig) -> Result<Cloud> {
    let identity = &config.identity;
    if let Some(profile) = &config.aws_profile {
        info!(profile = %profile, "Using AWS profile");
    }

    let ctx = AwsContext::with_profile(identity.region(), config.aws_profile.as_deref()).await;
    verify_account(&ctx, identity.account())
        .await
        .context("account precondition failed, nothing was changed")?;

    Ok(Cloud::from_context(&ctx))
}

async fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    match args.command {
        Command::Deploy(deploy) => {
            let config = DeploymentConfig::try_from(deploy.identity.clone())
                .context("invalid deployment configuration")?;
            let settings = DeploySettings::load(&deploy)
                .await
                .context("invalid deploy configuration")?;
            let cloud = connect(&config).await?;

            let deployer = Deployer::new(&cloud, Arc::new(DockerCli::default()), &config, settings);
            let summary = deployer.run().await?;

            println!("\nStack {} is {}", summary.stack.name, summary.stack.raw_status);
            if !summary.stack_healthy() {
                println!(
                    "  the template is unchanged, so the stack stays rolled back; \
                     fix the cause and deploy a change, or tear it down"
                );
            }
            println!("Repository {}", summary.repository_uri);
            for image in &summary.images {
                println!("  pushed {image}");
            }
        }

        Command::Teardown(identity) => {
            let config =
                DeploymentConfig::try_from(identity).context("invalid deployment configuration")?;
            let cloud = connect(&config).await?;

            let report = Teardown::new(cloud, &config).run().await;
            report.print_summary();
            if !report.is_clean() {
                warn!(
                    unresolved = report.unresolved().len(),
                    warnings = report.warnings.len(),
                    "Teardown left resources behind, see the summary above"
                );
            }
        }

        Command::Scan { identity, format } => {
            let config =
                DeploymentConfig::try_from(identity).context("invalid deployment configuration")?;
            let cloud = connect(&config).await?;

            let inventory = ResourceScanner::new(cloud, config.identity.clone())
                .scan_all()
                .await;
            match format {
                OutputFormat::Table => print_inventory(&inventory),
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&inventory)
                        .context("failed to serialize inventory")?
                ),
            }
        }
    }

    Ok(())
}

fn print_inventory(inventory: &Inventory) {
    if inventory.is_empty() {
        println!("No resources found.");
    } else {
        let mut resources: Vec<_> = inventory.resources.iter().collect();
        resources.sort_by(|a, b| {
            (a.kind.cleanup_priority(), &a.name).cmp(&(b.kind.cleanup_priority(), &b.name))
        });

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Kind"),
                Cell::new("Name"),
                Cell::new("Parent"),
                Cell::new("Found via"),
            ]);
        for resource in resources {
            table.add_row(vec![
                Cell::new(resource.kind),
                Cell::new(&resource.name),
                Cell::new(resource.parent.as_deref().unwrap_or("")),
                Cell::new(resource.discovered_via),
            ]);
        }
        println!("{table}");
        println!("\n{} resources", inventory.len());
    }

    if !inventory.errors.is_empty() {
        println!("\nListings that failed (results may be incomplete):");
        for error in &inventory.errors {
            println!("  - {error}");
        }
    }
}
