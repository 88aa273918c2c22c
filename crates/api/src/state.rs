use std::sync::Arc;

use votewatch_domain::credentials::{CredentialService, KeyGenerator, RandomKeyGenerator};
use votewatch_domain::ports::db::DbAdapter;
use votewatch_domain::ports::principals::PrincipalRepository;
use votewatch_domain::ports::submissions::SubmissionRepository;
use votewatch_domain::submissions::SubmissionService;
use votewatch_domain::sync::SyncService;
use votewatch_infra::config::{AppConfig, DataBackend};
use votewatch_infra::db::{self, DbConfig, MemoryAdapter, SurrealAdapter};
use votewatch_infra::repositories::{
    InMemoryPrincipalRepository, InMemorySubmissionRepository, SurrealPrincipalRepository,
    SurrealSubmissionRepository,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub principal_repo: Arc<dyn PrincipalRepository>,
    pub submission_repo: Arc<dyn SubmissionRepository>,
    pub key_generator: Arc<dyn KeyGenerator>,
    pub db: Arc<dyn DbAdapter>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        match config.data_backend()? {
            DataBackend::Memory => {
                tracing::warn!("using in-memory storage; data is lost on restart");
                Ok(Self::with_repositories(
                    config,
                    Arc::new(InMemoryPrincipalRepository::new()),
                    Arc::new(InMemorySubmissionRepository::new()),
                ))
            }
            DataBackend::Surreal => {
                let db_config = DbConfig::from_app_config(&config);
                let client = db::connect(&db_config).await?;
                db::apply_schema(&client).await?;
                tracing::info!(
                    endpoint = %db_config.endpoint,
                    namespace = %db_config.namespace,
                    database = %db_config.database,
                    "connected to surrealdb"
                );
                Ok(Self {
                    principal_repo: Arc::new(SurrealPrincipalRepository::with_client(
                        client.clone(),
                    )),
                    submission_repo: Arc::new(SurrealSubmissionRepository::with_client(
                        client.clone(),
                    )),
                    key_generator: Arc::new(RandomKeyGenerator),
                    db: Arc::new(SurrealAdapter::new(client, db_config)),
                    config,
                })
            }
        }
    }

    pub fn with_repositories(
        config: AppConfig,
        principal_repo: Arc<dyn PrincipalRepository>,
        submission_repo: Arc<dyn SubmissionRepository>,
    ) -> Self {
        Self {
            config,
            principal_repo,
            submission_repo,
            key_generator: Arc::new(RandomKeyGenerator),
            db: Arc::new(MemoryAdapter),
        }
    }

    #[cfg(test)]
    pub fn with_key_generator(mut self, key_generator: Arc<dyn KeyGenerator>) -> Self {
        self.key_generator = key_generator;
        self
    }

    pub fn credential_service(&self) -> CredentialService {
        CredentialService::new(self.principal_repo.clone(), self.key_generator.clone())
    }

    pub fn submission_service(&self) -> SubmissionService {
        SubmissionService::new(self.principal_repo.clone(), self.submission_repo.clone())
    }

    pub fn sync_service(&self) -> SyncService {
        SyncService::new(self.principal_repo.clone(), self.submission_repo.clone())
    }
}
