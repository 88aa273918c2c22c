use std::sync::Arc;
use std::time::Duration;

use surrealdb::{
    Surreal,
    engine::remote::ws::{Client, Ws},
    opt::auth::Root,
};
use tokio::time::timeout;
use votewatch_domain::ports::BoxFuture;
use votewatch_domain::ports::db::{DbAdapter, DbError};

use crate::config::AppConfig;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Tables, record ids and indexes the repositories rely on. Submissions are
/// keyed by their identity digest; monitor keys are keyed by the key itself
/// so that claiming a taken key fails on the record id.
pub const SCHEMA: &str = "\
DEFINE TABLE IF NOT EXISTS monitor_submission SCHEMALESS;
DEFINE INDEX IF NOT EXISTS monitor_submission_record_key ON monitor_submission FIELDS record_key UNIQUE;
DEFINE INDEX IF NOT EXISTS monitor_submission_client_ids ON monitor_submission FIELDS user_id, client_submission_ids;
DEFINE INDEX IF NOT EXISTS monitor_submission_family ON monitor_submission FIELDS submission_id, submission_type;
DEFINE INDEX IF NOT EXISTS monitor_submission_user ON monitor_submission FIELDS user_id;
DEFINE TABLE IF NOT EXISTS app_user SCHEMALESS;
DEFINE INDEX IF NOT EXISTS app_user_user_id ON app_user FIELDS user_id UNIQUE;
DEFINE TABLE IF NOT EXISTS monitor_key SCHEMALESS;
DEFINE INDEX OVERWRITE monitor_key_user ON monitor_key FIELDS user_id;
";

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DbConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.surreal_endpoint.clone(),
            namespace: config.surreal_ns.clone(),
            database: config.surreal_db.clone(),
            username: config.surreal_user.clone(),
            password: config.surreal_pass.clone(),
        }
    }
}

/// Connects, signs in as root and selects the namespace/database.
pub async fn connect(db_config: &DbConfig) -> anyhow::Result<Arc<Surreal<Client>>> {
    let db = Surreal::<Client>::init();
    db.connect::<Ws>(&db_config.endpoint).await?;
    db.signin(Root {
        username: &db_config.username,
        password: &db_config.password,
    })
    .await?;
    db.use_ns(&db_config.namespace)
        .use_db(&db_config.database)
        .await?;
    Ok(Arc::new(db))
}

pub async fn apply_schema(client: &Surreal<Client>) -> anyhow::Result<()> {
    client.query(SCHEMA).await?.check()?;
    tracing::info!("surreal schema applied");
    Ok(())
}

#[derive(Clone)]
pub struct SurrealAdapter {
    client: Arc<Surreal<Client>>,
    config: DbConfig,
}

impl SurrealAdapter {
    pub fn new(client: Arc<Surreal<Client>>, config: DbConfig) -> Self {
        Self { client, config }
    }
}

impl DbAdapter for SurrealAdapter {
    fn name(&self) -> &'static str {
        "surrealdb"
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), DbError>> {
        let client = self.client.clone();
        let namespace = self.config.namespace.clone();
        let database = self.config.database.clone();
        Box::pin(async move {
            timeout(HEALTH_TIMEOUT, client.health())
                .await
                .map_err(|_| DbError::Unavailable("surreal health check timed out".to_string()))?
                .map_err(|err| DbError::Unavailable(format!("surreal health check failed: {err}")))?;
            tracing::debug!(%namespace, %database, "surreal health check succeeded");
            Ok(())
        })
    }
}

/// Always-healthy adapter for the in-memory backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryAdapter;

impl DbAdapter for MemoryAdapter {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async { Ok(()) })
    }
}
