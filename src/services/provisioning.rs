//! Tenant provisioning workflow.
//!
//! One call to [`ProvisioningService::provision_tenant`] drives a tenant
//! through `Validated → DatabaseCreated → ConfigRegistered → Migrated →
//! AccountReady`. A failed create or migrate step unwinds the compensations
//! collected so far (in reverse order) and ends in `Aborted`. A failed
//! registry write or account creation is logged and recorded on the outcome,
//! but leaves the provisioned database in place.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use futures_util::stream::{self, StreamExt};
use sqlx::postgres::PgConnectOptions;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::db::account::{AccountInitializer, PgAccountInitializer};
use crate::db::migrator::{SchemaMigrator, SqlxMigrator};
use crate::db::provisioner::{CreateStatus, DatabaseProvisioner, PgProvisioner};
use crate::db::registry::ConfigRegistry;
use crate::error::{ProvisionerError, ValidationError};
use crate::models::database_config::{ConnectionDefaults, DatabaseConfig};
use crate::models::outcome::{AccountStatus, FailureStage, ProvisioningOutcome, ProvisioningState};
use crate::models::tenant::{TenantCreated, TenantSpec};
use crate::services::metrics;

/// Undo action registered once the side effect it reverts has happened.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Compensation {
    DropDatabase(String),
}

#[derive(Debug, Default)]
struct Compensations(Vec<Compensation>);

impl Compensations {
    fn push(&mut self, action: Compensation) {
        self.0.push(action);
    }

    /// Runs every action, newest first. Failures are logged and never
    /// propagated. Returns true when at least one action ran and all of
    /// them succeeded.
    async fn unwind(self, provisioner: &dyn DatabaseProvisioner) -> bool {
        let mut all_ok = !self.0.is_empty();
        for action in self.0.into_iter().rev() {
            match &action {
                Compensation::DropDatabase(db_name) => {
                    match provisioner.drop_database(db_name).await {
                        Ok(()) => {
                            info!(db_name = %db_name, "rolled back database");
                            metrics::record_rollback(true);
                        }
                        Err(e) => {
                            warn!(db_name = %db_name, error = %e, "rollback drop failed");
                            metrics::record_rollback(false);
                            all_ok = false;
                        }
                    }
                }
            }
        }
        all_ok
    }
}

pub struct ProvisioningService {
    provisioner: Arc<dyn DatabaseProvisioner>,
    migrator: Arc<dyn SchemaMigrator>,
    accounts: Arc<dyn AccountInitializer>,
    registry: Arc<ConfigRegistry>,
    connection: ConnectionDefaults,
}

impl ProvisioningService {
    pub fn new(
        provisioner: Arc<dyn DatabaseProvisioner>,
        migrator: Arc<dyn SchemaMigrator>,
        accounts: Arc<dyn AccountInitializer>,
        registry: Arc<ConfigRegistry>,
        connection: ConnectionDefaults,
    ) -> Self {
        Self {
            provisioner,
            migrator,
            accounts,
            registry,
            connection,
        }
    }

    /// Wires the PostgreSQL-backed components from deployment configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let admin = PgConnectOptions::from_str(config.admin_database_url()?)
            .context("parse ADMIN_DATABASE_URL")?;

        Ok(Self::new(
            Arc::new(PgProvisioner::new(admin, config.provision_timeout)),
            Arc::new(SqlxMigrator::new(config.migrate_timeout)),
            Arc::new(PgAccountInitializer::new(
                config.bcrypt_cost,
                config.account_timeout,
            )),
            Arc::new(ConfigRegistry::new(&config.registry_path)),
            config.tenant_connection.clone(),
        ))
    }

    /// Handler for the catalog's "tenant created" event.
    pub async fn on_tenant_created(
        &self,
        event: TenantCreated,
    ) -> Result<ProvisioningOutcome, ValidationError> {
        self.provision_tenant(&event.tenant).await
    }

    /// Provisions one tenant. Only a validation failure is returned as an
    /// error; every other failure is reported through the outcome.
    pub async fn provision_tenant(
        &self,
        spec: &TenantSpec,
    ) -> Result<ProvisioningOutcome, ValidationError> {
        if let Err(e) = spec.validate() {
            warn!(tenant = %spec.name, db_name = ?spec.db_name, error = %e, "tenant rejected");
            metrics::record_rejection(e.reason());
            return Err(e);
        }

        let span = info_span!(
            "provision_tenant",
            attempt = %Uuid::new_v4(),
            tenant = %spec.name,
            db_name = %spec.db_name,
        );
        let outcome = self.run(spec).instrument(span).await;
        metrics::record_outcome(&outcome);
        Ok(outcome)
    }

    /// Provisions several tenants, at most `concurrency` at a time. Results
    /// come back in completion order.
    pub async fn provision_many(
        &self,
        specs: Vec<TenantSpec>,
        concurrency: usize,
    ) -> Vec<Result<ProvisioningOutcome, ValidationError>> {
        stream::iter(specs)
            .map(|spec| async move { self.provision_tenant(&spec).await })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    async fn run(&self, spec: &TenantSpec) -> ProvisioningOutcome {
        let db_name = spec.db_name.as_str();
        let mut outcome = ProvisioningOutcome::started(spec);
        let mut compensations = Compensations::default();

        info!("provisioning tenant database");

        match self.provisioner.create_database(db_name).await {
            Ok(CreateStatus::Created) => {
                compensations.push(Compensation::DropDatabase(db_name.to_string()));
            }
            // Redelivered event: the database is not ours to drop.
            Ok(CreateStatus::AlreadyExists) => {
                info!("database already exists, resuming provisioning");
            }
            Err(e) => {
                error!(error = %e, issued = e.create_issued(), "database creation failed");
                // Only clean up after a CREATE DATABASE this attempt sent. An
                // error before that point may be hiding a live database.
                if e.create_issued() {
                    compensations.push(Compensation::DropDatabase(db_name.to_string()));
                }
                return self
                    .abort(outcome, FailureStage::DatabaseCreate, e.into(), compensations)
                    .await;
            }
        }
        outcome.advance(ProvisioningState::DatabaseCreated);

        let config = DatabaseConfig::for_tenant(db_name, &self.connection);
        match self.registry.upsert(db_name, config.clone()).await {
            Ok(()) => outcome.advance(ProvisioningState::ConfigRegistered),
            Err(e) => {
                error!(error = %e, "registry upsert failed, continuing");
                outcome.registry_error = Some(e.to_string());
            }
        }

        if let Err(e) = self.migrator.migrate(&config).await {
            error!(error = %e, "migration failed");
            return self
                .abort(outcome, FailureStage::Migrate, e.into(), compensations)
                .await;
        }
        outcome.advance(ProvisioningState::Migrated);

        match &spec.client {
            Some(client) => match self.accounts.ensure_account(&config, client).await {
                Ok(status) => {
                    outcome.account = status;
                    outcome.advance(ProvisioningState::AccountReady);
                }
                Err(e) => {
                    error!(username = %client.username, error = %e, "account creation failed, database kept");
                    outcome.account = AccountStatus::Failed;
                    outcome.record_failure(FailureStage::AccountCreate, &ProvisionerError::from(e));
                }
            },
            None => outcome.advance(ProvisioningState::AccountReady),
        }

        info!(state = ?outcome.state, account = ?outcome.account, "tenant provisioned");
        outcome.finish(true)
    }

    async fn abort(
        &self,
        mut outcome: ProvisioningOutcome,
        stage: FailureStage,
        error: ProvisionerError,
        compensations: Compensations,
    ) -> ProvisioningOutcome {
        outcome.record_failure(stage, &error);
        outcome.rolled_back = compensations.unwind(self.provisioner.as_ref()).await;
        outcome.advance(ProvisioningState::Aborted);
        warn!(stage = stage.as_str(), rolled_back = outcome.rolled_back, "provisioning aborted");
        outcome.finish(false)
    }
}
