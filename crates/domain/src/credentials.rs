use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;
use crate::identity::Principal;
use crate::ports::principals::{CredentialAssignment, PrincipalRepository};
use crate::scope::{Designation, MonitoringScope, resolve_scope};
use crate::util::now_ms;

/// 32 symbols: no `0`/`O` and no `1`/`I`.
pub const MONITOR_KEY_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const MONITOR_KEY_LENGTH: usize = 6;
pub const MAX_KEY_ATTEMPTS: u32 = 10;
pub const DEFAULT_BACKFILL_LIMIT: usize = 100;
pub const MAX_BACKFILL_LIMIT: usize = 500;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    Revoked,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Active => "active",
            CredentialStatus::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(CredentialStatus::Active),
            "revoked" => Some(CredentialStatus::Revoked),
            _ => None,
        }
    }
}

/// Monitor key bound to a frozen scope snapshot. `assigned_by == None` means
/// the key was issued automatically.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MonitorCredential {
    pub key: String,
    pub status: CredentialStatus,
    pub assigned_by: Option<String>,
    pub assigned_at_ms: i64,
    pub scope: MonitoringScope,
}

pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> String;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RandomKeyGenerator;

impl KeyGenerator for RandomKeyGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..MONITOR_KEY_LENGTH)
            .map(|_| MONITOR_KEY_ALPHABET[rng.gen_range(0..MONITOR_KEY_ALPHABET.len())] as char)
            .collect()
    }
}

pub fn is_well_formed_key(key: &str) -> bool {
    key.len() == MONITOR_KEY_LENGTH && key.bytes().all(|byte| MONITOR_KEY_ALPHABET.contains(&byte))
}

/// Keys are typed by hand: tolerate case, spaces and hyphens.
pub fn normalize_key(raw: &str) -> String {
    raw.chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '-')
        .collect::<String>()
        .to_ascii_uppercase()
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct IssuedCredential {
    pub credential: MonitorCredential,
    pub already_assigned: bool,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackfillOutcome {
    Skipped,
    Failed,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct BackfillIssue {
    pub user_id: String,
    pub outcome: BackfillOutcome,
    pub code: &'static str,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct BackfillReport {
    pub scanned: usize,
    pub assigned: usize,
    pub skipped: usize,
    pub failed: usize,
    pub issues: Vec<BackfillIssue>,
}

#[derive(Clone)]
pub struct CredentialService {
    principals: Arc<dyn PrincipalRepository>,
    keys: Arc<dyn KeyGenerator>,
}

impl CredentialService {
    pub fn new(principals: Arc<dyn PrincipalRepository>, keys: Arc<dyn KeyGenerator>) -> Self {
        Self { principals, keys }
    }

    pub async fn issue(
        &self,
        user_id: &str,
        issued_by: Option<String>,
    ) -> DomainResult<IssuedCredential> {
        let principal = self
            .principals
            .get(user_id)
            .await?
            .ok_or(DomainError::NotFound)?;

        if let Some(active) = principal.active_credential() {
            return Ok(IssuedCredential {
                credential: active.clone(),
                already_assigned: true,
            });
        }

        ensure_profile_complete(&principal)?;
        let scope = resolve_scope(principal.designation.as_deref(), &principal.location)?;

        for _ in 0..MAX_KEY_ATTEMPTS {
            let key = self.keys.generate();
            if !is_well_formed_key(&key) || self.principals.monitor_key_exists(&key).await? {
                continue;
            }

            let credential = MonitorCredential {
                key,
                status: CredentialStatus::Active,
                assigned_by: issued_by.clone(),
                assigned_at_ms: now_ms(),
                scope: scope.clone(),
            };
            match self
                .principals
                .assign_credential(user_id, &credential)
                .await?
            {
                CredentialAssignment::Assigned(credential) => {
                    return Ok(IssuedCredential {
                        credential,
                        already_assigned: false,
                    });
                }
                CredentialAssignment::AlreadyActive(credential) => {
                    return Ok(IssuedCredential {
                        credential,
                        already_assigned: true,
                    });
                }
                CredentialAssignment::KeyTaken => continue,
            }
        }

        Err(DomainError::KeyGenerationExhausted {
            attempts: MAX_KEY_ATTEMPTS,
        })
    }

    /// Issues credentials for up to `limit` eligible users. One user's failure
    /// is recorded and the sweep moves on.
    pub async fn backfill(
        &self,
        limit: usize,
        issued_by: Option<String>,
    ) -> DomainResult<BackfillReport> {
        let limit = limit.clamp(1, MAX_BACKFILL_LIMIT);
        let candidates = self.principals.list_credential_candidates(limit).await?;

        let mut report = BackfillReport {
            scanned: candidates.len(),
            ..BackfillReport::default()
        };
        for principal in candidates {
            match self.issue(&principal.user_id, issued_by.clone()).await {
                Ok(issued) if issued.already_assigned => report.skipped += 1,
                Ok(_) => report.assigned += 1,
                Err(err) => {
                    let outcome = if is_profile_gap(&err) {
                        report.skipped += 1;
                        BackfillOutcome::Skipped
                    } else {
                        report.failed += 1;
                        BackfillOutcome::Failed
                    };
                    report.issues.push(BackfillIssue {
                        user_id: principal.user_id,
                        outcome,
                        code: err.code(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    pub async fn get_for_user(&self, user_id: &str) -> DomainResult<MonitorCredential> {
        self.principals
            .get(user_id)
            .await?
            .and_then(|principal| principal.monitor_credential)
            .ok_or(DomainError::NotFound)
    }

    /// The caller's active credential when `key` matches it.
    pub async fn verify(
        &self,
        user_id: &str,
        key: &str,
    ) -> DomainResult<Option<MonitorCredential>> {
        let principal = self
            .principals
            .get(user_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        let wanted = normalize_key(key);
        Ok(principal
            .active_credential()
            .filter(|credential| credential.key == wanted)
            .cloned())
    }
}

/// User-facing completeness check run before scope resolution. Designations
/// outside the monitoring set are left for the resolver to reject.
pub fn ensure_profile_complete(principal: &Principal) -> DomainResult<()> {
    let Some(designation) = principal.designation.as_deref().and_then(Designation::parse) else {
        return Ok(());
    };
    let missing = principal.location.missing_for(designation.level());
    if missing.is_empty() {
        return Ok(());
    }
    let fields = missing
        .iter()
        .map(|field| field.label())
        .collect::<Vec<_>>()
        .join(", ");
    Err(DomainError::IncompleteProfile {
        message: format!(
            "Complete your profile before requesting a monitor key. A {} must provide: {fields}",
            designation.label()
        ),
        missing,
    })
}

fn is_profile_gap(err: &DomainError) -> bool {
    matches!(
        err,
        DomainError::IncompleteProfile { .. }
            | DomainError::MissingScopeData { .. }
            | DomainError::IneligibleDesignation { .. }
    )
}
