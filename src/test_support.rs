//! In-memory stand-ins for the database server, migration engine and
//! account store, sharing one call log so tests can assert exactly which
//! outbound calls a workflow made.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use tempfile::TempDir;

use crate::db::account::{AccountInitializer, NewAccount};
use crate::db::migrator::{latest_version, SchemaMigrator};
use crate::db::provisioner::{CreateStatus, DatabaseProvisioner, PgProvisioner};
use crate::db::registry::ConfigRegistry;
use crate::error::{AccountError, MigrationError, ProvisionError};
use crate::models::database_config::{ConnectionDefaults, DatabaseConfig};
use crate::models::outcome::AccountStatus;
use crate::models::tenant::ClientSpec;
use crate::services::provisioning::ProvisioningService;

pub fn client(username: &str, password: &str) -> ClientSpec {
    ClientSpec {
        username: username.into(),
        email: format!("{username}@acme.test"),
        password: password.into(),
    }
}

/// Real server for `#[ignore]`d tests. The admin connection comes from
/// `TEST_ADMIN_DATABASE_URL`; tenant databases are reached with
/// `TEST_TENANT_DB_HOST`, `TEST_TENANT_DB_PORT`, `TEST_TENANT_DB_USER` and
/// `TEST_TENANT_DB_PASSWORD`, falling back to the usual defaults.
pub fn live_server() -> Option<(PgProvisioner, ConnectionDefaults)> {
    let url = std::env::var("TEST_ADMIN_DATABASE_URL").ok()?;
    let admin = PgConnectOptions::from_str(&url).ok()?;
    let defaults = ConnectionDefaults::default();
    let env_or = |key: &str, default: String| std::env::var(key).unwrap_or(default);

    let connection = ConnectionDefaults {
        host: env_or("TEST_TENANT_DB_HOST", defaults.host),
        port: std::env::var("TEST_TENANT_DB_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port),
        user: env_or("TEST_TENANT_DB_USER", defaults.user),
        password: env_or("TEST_TENANT_DB_PASSWORD", defaults.password),
    };
    Some((PgProvisioner::new(admin, Duration::from_secs(30)), connection))
}

#[derive(Default)]
pub struct CallLog(Mutex<Vec<String>>);

impl CallLog {
    fn record(&self, call: String) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Which components should fail.
#[derive(Debug, Default, Clone, Copy)]
pub struct Faults {
    /// CREATE DATABASE is sent and rejected.
    pub create: bool,
    /// The server cannot be reached, so CREATE DATABASE is never sent.
    pub unreachable: bool,
    pub drop: bool,
    pub migrate: bool,
    pub account: bool,
    pub registry: bool,
}

pub struct FakeServer {
    log: Arc<CallLog>,
    databases: Mutex<BTreeSet<String>>,
    fail_create: bool,
    unreachable: bool,
    fail_drop: bool,
}

impl FakeServer {
    /// Adds a database as if an earlier attempt had created it.
    pub fn seed(&self, db_name: &str) {
        self.databases.lock().unwrap().insert(db_name.to_string());
    }

    pub fn contains(&self, db_name: &str) -> bool {
        self.databases.lock().unwrap().contains(db_name)
    }

    pub fn databases(&self) -> Vec<String> {
        self.databases.lock().unwrap().iter().cloned().collect()
    }
}

#[async_trait]
impl DatabaseProvisioner for FakeServer {
    async fn create_database(&self, db_name: &str) -> Result<CreateStatus, ProvisionError> {
        self.log.record(format!("create:{db_name}"));
        if self.unreachable {
            return Err(ProvisionError::Rejected("connection refused".into()).not_issued());
        }
        if self.fail_create {
            return Err(ProvisionError::Rejected(
                "permission denied to create database".into(),
            ));
        }
        if self.databases.lock().unwrap().insert(db_name.to_string()) {
            Ok(CreateStatus::Created)
        } else {
            Ok(CreateStatus::AlreadyExists)
        }
    }

    async fn drop_database(&self, db_name: &str) -> Result<(), ProvisionError> {
        self.log.record(format!("drop:{db_name}"));
        if self.fail_drop {
            return Err(ProvisionError::Rejected("connection reset".into()));
        }
        self.databases.lock().unwrap().remove(db_name);
        Ok(())
    }

    async fn database_exists(&self, db_name: &str) -> Result<bool, ProvisionError> {
        Ok(self.contains(db_name))
    }
}

pub struct FakeMigrator {
    log: Arc<CallLog>,
    versions: Mutex<HashMap<String, i64>>,
    fail: bool,
}

impl FakeMigrator {
    pub fn version_of(&self, db_name: &str) -> Option<i64> {
        self.versions.lock().unwrap().get(db_name).copied()
    }
}

#[async_trait]
impl SchemaMigrator for FakeMigrator {
    async fn migrate(&self, target: &DatabaseConfig) -> Result<(), MigrationError> {
        self.log.record(format!("migrate:{}", target.name));
        if self.fail {
            return Err(MigrationError::Rejected(
                "relation \"auth_user\" already exists".into(),
            ));
        }
        if let Some(version) = latest_version() {
            self.versions
                .lock()
                .unwrap()
                .insert(target.name.clone(), version);
        }
        Ok(())
    }
}

pub struct FakeAccounts {
    log: Arc<CallLog>,
    rows: Mutex<HashMap<(String, String), NewAccount>>,
    writes: AtomicUsize,
    fail: bool,
}

impl FakeAccounts {
    pub fn account(&self, db_name: &str, username: &str) -> Option<NewAccount> {
        self.rows
            .lock()
            .unwrap()
            .get(&(db_name.to_string(), username.to_string()))
            .cloned()
    }

    pub fn count(&self, db_name: &str) -> usize {
        self.rows
            .lock()
            .unwrap()
            .keys()
            .filter(|(db, _)| db == db_name)
            .count()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountInitializer for FakeAccounts {
    async fn ensure_account(
        &self,
        target: &DatabaseConfig,
        client: &ClientSpec,
    ) -> Result<AccountStatus, AccountError> {
        self.log
            .record(format!("account:{}:{}", target.name, client.username));
        if self.fail {
            return Err(AccountError::Rejected("relation \"auth_user\" does not exist".into()));
        }

        let key = (target.name.clone(), client.username.clone());
        if self.rows.lock().unwrap().contains_key(&key) {
            return Ok(AccountStatus::AlreadyExists);
        }
        // Lowest bcrypt cost keeps the suite fast.
        let account = NewAccount::administrator(client, 4)?;
        self.rows.lock().unwrap().insert(key, account);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(AccountStatus::Created)
    }
}

pub struct Harness {
    pub log: Arc<CallLog>,
    pub server: Arc<FakeServer>,
    pub migrator: Arc<FakeMigrator>,
    pub accounts: Arc<FakeAccounts>,
    pub registry: Arc<ConfigRegistry>,
    _dir: TempDir,
}

impl Harness {
    pub fn new(faults: Faults) -> Self {
        let log = Arc::new(CallLog::default());
        let dir = tempfile::tempdir().unwrap();
        // Pointing the registry at a directory makes every write fail.
        let registry_path = if faults.registry {
            dir.path().to_path_buf()
        } else {
            dir.path().join("db.json")
        };

        Self {
            server: Arc::new(FakeServer {
                log: log.clone(),
                databases: Mutex::default(),
                fail_create: faults.create,
                unreachable: faults.unreachable,
                fail_drop: faults.drop,
            }),
            migrator: Arc::new(FakeMigrator {
                log: log.clone(),
                versions: Mutex::default(),
                fail: faults.migrate,
            }),
            accounts: Arc::new(FakeAccounts {
                log: log.clone(),
                rows: Mutex::default(),
                writes: AtomicUsize::new(0),
                fail: faults.account,
            }),
            registry: Arc::new(ConfigRegistry::new(registry_path)),
            log,
            _dir: dir,
        }
    }

    pub fn service(&self) -> ProvisioningService {
        ProvisioningService::new(
            self.server.clone(),
            self.migrator.clone(),
            self.accounts.clone(),
            self.registry.clone(),
            ConnectionDefaults::default(),
        )
    }
}
