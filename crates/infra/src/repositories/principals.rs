use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, to_value};
use surrealdb::{Surreal, engine::remote::ws::Client};
use tokio::sync::RwLock;
use votewatch_domain::DomainResult;
use votewatch_domain::credentials::MonitorCredential;
use votewatch_domain::error::DomainError;
use votewatch_domain::identity::Principal;
use votewatch_domain::ports::BoxFuture;
use votewatch_domain::ports::principals::{CredentialAssignment, PrincipalRepository};
use votewatch_domain::scope::{Designation, RawLocation};

use super::{classify_surreal_message, invalid_result, map_surreal_error};

const USER_NOT_FOUND: &str = "monitor_user_not_found";
const CREDENTIAL_ACTIVE: &str = "monitor_credential_active";

fn is_credential_candidate(principal: &Principal) -> bool {
    principal
        .designation
        .as_deref()
        .and_then(Designation::parse)
        .is_some()
        && !principal.location.is_empty()
        && principal.active_credential().is_none()
}

#[derive(Default)]
pub struct InMemoryPrincipalRepository {
    users: Arc<RwLock<HashMap<String, Principal>>>,
    /// Claimed monitor key -> owning user.
    keys: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryPrincipalRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds or replaces a profile, registering any credential key it holds.
    pub async fn insert(&self, principal: Principal) {
        let mut users = self.users.write().await;
        let mut keys = self.keys.write().await;
        if let Some(credential) = &principal.monitor_credential {
            keys.insert(credential.key.clone(), principal.user_id.clone());
        }
        users.insert(principal.user_id.clone(), principal);
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

impl PrincipalRepository for InMemoryPrincipalRepository {
    fn get(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<Principal>>> {
        let user_id = user_id.to_string();
        let users = self.users.clone();
        Box::pin(async move { Ok(users.read().await.get(&user_id).cloned()) })
    }

    fn monitor_key_exists(&self, key: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let key = key.to_string();
        let keys = self.keys.clone();
        Box::pin(async move { Ok(keys.read().await.contains_key(&key)) })
    }

    fn assign_credential(
        &self,
        user_id: &str,
        credential: &MonitorCredential,
    ) -> BoxFuture<'_, DomainResult<CredentialAssignment>> {
        let user_id = user_id.to_string();
        let credential = credential.clone();
        let users = self.users.clone();
        let keys = self.keys.clone();
        Box::pin(async move {
            let mut users = users.write().await;
            let mut keys = keys.write().await;
            let principal = users.get_mut(&user_id).ok_or(DomainError::NotFound)?;
            if let Some(active) = principal.active_credential() {
                return Ok(CredentialAssignment::AlreadyActive(active.clone()));
            }
            if keys.contains_key(&credential.key) {
                return Ok(CredentialAssignment::KeyTaken);
            }
            keys.insert(credential.key.clone(), user_id);
            principal.monitor_credential = Some(credential.clone());
            Ok(CredentialAssignment::Assigned(credential))
        })
    }

    fn list_credential_candidates(
        &self,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<Principal>>> {
        let users = self.users.clone();
        Box::pin(async move {
            let users = users.read().await;
            let mut candidates = users
                .values()
                .filter(|principal| is_credential_candidate(principal))
                .cloned()
                .collect::<Vec<_>>();
            candidates.sort_by(|left, right| left.user_id.cmp(&right.user_id));
            candidates.truncate(limit);
            Ok(candidates)
        })
    }
}

#[derive(Clone)]
pub struct SurrealPrincipalRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealPrincipalRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    fn decode_rows(rows: Vec<Value>) -> DomainResult<Vec<Principal>> {
        rows.into_iter()
            .map(|row| {
                serde_json::from_value::<SurrealPrincipalRow>(row)
                    .map_err(|err| DomainError::Storage(format!("invalid app_user row: {err}")))
                    .and_then(SurrealPrincipalRow::into_principal)
            })
            .collect()
    }

    async fn fetch(&self, user_id: &str) -> DomainResult<Option<Principal>> {
        let mut response = self
            .client
            .query("SELECT * FROM type::record('app_user', $user_id)")
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(map_surreal_error)?;
        let rows: Vec<Value> = response.take(0).map_err(invalid_result)?;
        Ok(Self::decode_rows(rows)?.pop())
    }
}

#[derive(Debug, Deserialize)]
struct SurrealPrincipalRow {
    user_id: String,
    #[serde(default)]
    designation: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    lga: Option<String>,
    #[serde(default)]
    ward: Option<String>,
    #[serde(default)]
    polling_unit: Option<String>,
    #[serde(default)]
    polling_unit_code: Option<String>,
    #[serde(default)]
    monitor_credential: Option<Value>,
}

impl SurrealPrincipalRow {
    fn into_principal(self) -> DomainResult<Principal> {
        let monitor_credential = match self.monitor_credential {
            None | Some(Value::Null) => None,
            Some(value) => Some(serde_json::from_value::<MonitorCredential>(value).map_err(
                |err| DomainError::Storage(format!("invalid monitor_credential: {err}")),
            )?),
        };
        Ok(Principal {
            user_id: self.user_id,
            designation: self.designation,
            location: RawLocation {
                state: self.state,
                lga: self.lga,
                ward: self.ward,
                polling_unit: self.polling_unit,
                polling_unit_code: self.polling_unit_code,
            },
            monitor_credential,
        })
    }
}

impl PrincipalRepository for SurrealPrincipalRepository {
    fn get(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<Principal>>> {
        let user_id = user_id.to_string();
        Box::pin(async move { self.fetch(&user_id).await })
    }

    fn monitor_key_exists(&self, key: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let key = key.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT key FROM type::record('monitor_key', $key)")
                .bind(("key", key))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(invalid_result)?;
            Ok(!rows.is_empty())
        })
    }

    fn assign_credential(
        &self,
        user_id: &str,
        credential: &MonitorCredential,
    ) -> BoxFuture<'_, DomainResult<CredentialAssignment>> {
        let user_id = user_id.to_string();
        let key = credential.key.clone();
        let payload = to_value(credential);
        Box::pin(async move {
            let payload = payload
                .map_err(|err| DomainError::Validation(format!("invalid credential: {err}")))?;
            // The key record id is the uniqueness guard: a second CREATE on the
            // same key fails and rolls the user update back with it.
            let mut response = self
                .client
                .query(
                    "BEGIN TRANSACTION; \
                     LET $user = (SELECT * FROM ONLY type::record('app_user', $user_id)); \
                     IF $user = NONE { THROW $user_not_found; }; \
                     IF $user.monitor_credential.status = 'active' { THROW $credential_active; }; \
                     CREATE type::record('monitor_key', $key) SET \
                        key = $key, \
                        user_id = $user_id, \
                        created_at = time::now(); \
                     UPDATE type::record('app_user', $user_id) SET monitor_credential = $credential; \
                     COMMIT TRANSACTION;",
                )
                .bind(("user_id", user_id.clone()))
                .bind(("key", key))
                .bind(("credential", payload.clone()))
                .bind(("user_not_found", USER_NOT_FOUND))
                .bind(("credential_active", CREDENTIAL_ACTIVE))
                .await
                .map_err(map_surreal_error)?;

            let errors = response.take_errors();
            if errors.is_empty() {
                let credential = serde_json::from_value::<MonitorCredential>(payload)
                    .map_err(|err| DomainError::Storage(format!("invalid credential: {err}")))?;
                return Ok(CredentialAssignment::Assigned(credential));
            }

            let message = errors
                .values()
                .map(|err| err.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            if message.contains(USER_NOT_FOUND) {
                return Err(DomainError::NotFound);
            }
            if message.contains(CREDENTIAL_ACTIVE) {
                let active = self
                    .fetch(&user_id)
                    .await?
                    .and_then(|principal| principal.monitor_credential)
                    .ok_or_else(|| {
                        DomainError::Storage("active credential vanished".to_string())
                    })?;
                return Ok(CredentialAssignment::AlreadyActive(active));
            }
            match classify_surreal_message(&message) {
                DomainError::Conflict => Ok(CredentialAssignment::KeyTaken),
                other => Err(other),
            }
        })
    }

    fn list_credential_candidates(
        &self,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<Principal>>> {
        let designations = Designation::ALL
            .iter()
            .map(|designation| designation.label().to_lowercase())
            .collect::<Vec<_>>();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT * FROM app_user \
                     WHERE string::lowercase(designation ?? '') IN $designations \
                       AND (monitor_credential = NONE OR monitor_credential.status != 'active') \
                     ORDER BY user_id ASC \
                     LIMIT $limit",
                )
                .bind(("designations", designations))
                .bind(("limit", limit as i64))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(invalid_result)?;
            Ok(Self::decode_rows(rows)?
                .into_iter()
                .filter(is_credential_candidate)
                .collect())
        })
    }
}
