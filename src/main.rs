//! Provisions tenant databases from the command line.
//!
//! Usage:
//!   tenant-provisioner provision --name acme --db-name acme_db \
//!       [--username root --email root@acme.test --password secret]
//!   tenant-provisioner batch tenants.json
//!   tenant-provisioner list
//!   tenant-provisioner show acme_db
//!
//! Configuration comes from the environment (or a .env file); see `Config`.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tenant_provisioner::config::Config;
use tenant_provisioner::db::registry::ConfigRegistry;
use tenant_provisioner::models::outcome::ProvisioningOutcome;
use tenant_provisioner::models::tenant::{ClientSpec, TenantCreated, TenantSpec};
use tenant_provisioner::services::{metrics, provisioning::ProvisioningService};

#[derive(Parser)]
#[command(name = "tenant-provisioner", about = "Provision per-tenant PostgreSQL databases")]
struct Args {
    /// Print Prometheus metrics to stderr before exiting
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision a single tenant
    Provision {
        #[arg(long)]
        name: String,
        #[arg(long)]
        db_name: String,
        /// Username of the tenant's administrative account
        #[arg(long, requires_all = ["email", "password"])]
        username: Option<String>,
        #[arg(long, requires = "username")]
        email: Option<String>,
        #[arg(long, requires = "username", env = "TENANT_ADMIN_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Provision every tenant listed in a JSON array file
    Batch { file: PathBuf },
    /// Print the database registry
    List,
    /// Print one registry entry
    Show { db_name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let result = run(args.command, &config).await;

    if args.metrics {
        eprintln!("{}", metrics::render()?);
    }
    result
}

async fn run(command: Command, config: &Config) -> anyhow::Result<()> {
    match command {
        Command::Provision {
            name,
            db_name,
            username,
            email,
            password,
        } => {
            let client = match (username, email, password) {
                (Some(username), Some(email), Some(password)) => Some(ClientSpec {
                    username,
                    email,
                    password,
                }),
                _ => None,
            };
            let tenant = TenantSpec::new(name, db_name, client)?;
            let service = ProvisioningService::from_config(config)?;
            let outcome = service.on_tenant_created(TenantCreated { tenant }).await?;
            print_json(&outcome)?;
            ensure_succeeded(std::slice::from_ref(&outcome))
        }
        Command::Batch { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("read {}", file.display()))?;
            let specs: Vec<TenantSpec> = serde_json::from_str(&raw)
                .with_context(|| format!("parse tenant list {}", file.display()))?;
            let service = ProvisioningService::from_config(config)?;
            info!("Provisioning {} tenant(s), {} at a time", specs.len(), config.concurrency);

            let mut outcomes = Vec::new();
            let mut rejected = 0usize;
            for result in service.provision_many(specs, config.concurrency).await {
                match result {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => {
                        rejected += 1;
                        eprintln!("rejected: {e}");
                    }
                }
            }
            print_json(&outcomes)?;
            if rejected > 0 {
                anyhow::bail!("{rejected} tenant(s) rejected by validation");
            }
            ensure_succeeded(&outcomes)
        }
        // Registry reads need no admin connection.
        Command::List => print_json(&ConfigRegistry::new(&config.registry_path).load_all().await?),
        Command::Show { db_name } => match ConfigRegistry::new(&config.registry_path).get(&db_name).await? {
            Some(entry) => print_json(&entry),
            None => anyhow::bail!("no registry entry for {db_name}"),
        },
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn ensure_succeeded(outcomes: &[ProvisioningOutcome]) -> anyhow::Result<()> {
    let failed = outcomes.iter().filter(|o| !o.succeeded).count();
    if failed > 0 {
        anyhow::bail!("provisioning failed for {failed} tenant(s)");
    }
    Ok(())
}
