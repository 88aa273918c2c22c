use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use votewatch_domain::DomainResult;
use votewatch_domain::credentials::{
    CredentialService, CredentialStatus, KeyGenerator, MAX_KEY_ATTEMPTS, RandomKeyGenerator, is_well_formed_key,
};
use votewatch_domain::error::DomainError;
use votewatch_domain::identity::Principal;
use votewatch_domain::ports::BoxFuture;
use votewatch_domain::ports::principals::PrincipalRepository;
use votewatch_domain::ports::submissions::{SubmissionListQuery, SubmissionRepository};
use votewatch_domain::reports::{
    IncidentReport, OfficerArrival, PollingUnitInfo, ResultTracking, SubmissionPayload,
};
use votewatch_domain::scope::RawLocation;
use votewatch_domain::submissions::{
    RequestMeta, Submission, SubmissionDraft, SubmissionService, SubmissionType,
};
use votewatch_domain::sync::{ClaimedTimestamp, SyncEnvelope, SyncService, SyncSummary};
use votewatch_infra::repositories::{InMemoryPrincipalRepository, InMemorySubmissionRepository};

fn location(polling_unit_code: &str) -> RawLocation {
    RawLocation {
        state: Some("Lagos".into()),
        lga: Some("Ikeja".into()),
        ward: Some("Ward 03".into()),
        polling_unit: Some("Ikeja Primary School".into()),
        polling_unit_code: Some(polling_unit_code.into()),
    }
}

fn agent(user_id: &str, polling_unit_code: &str) -> Principal {
    Principal {
        designation: Some("Polling Unit Agent".into()),
        location: location(polling_unit_code),
        ..Principal::new(user_id)
    }
}

fn pui_draft(polling_unit_code: &str) -> SubmissionDraft {
    SubmissionDraft::new(SubmissionPayload::PollingUnitInfo(PollingUnitInfo {
        location: RawLocation {
            polling_unit_code: Some(polling_unit_code.into()),
            ..RawLocation::default()
        },
        gps: None,
        location_type: None,
        location_type_other: None,
        notes: None,
    }))
}

fn arrival_draft(submission_id: &str) -> SubmissionDraft {
    SubmissionDraft {
        linked_submission_id: Some(submission_id.into()),
        ..SubmissionDraft::new(SubmissionPayload::OfficerArrival(OfficerArrival::default()))
    }
}

fn result_draft(submission_id: &str) -> SubmissionDraft {
    SubmissionDraft {
        linked_submission_id: Some(submission_id.into()),
        ..SubmissionDraft::new(SubmissionPayload::ResultTracking(ResultTracking::default()))
    }
}

fn pui_envelope(client_id: &str, created_at_ms: i64) -> SyncEnvelope {
    SyncEnvelope {
        submission_type: "polling_unit_info".into(),
        client_submission_id: Some(client_id.into()),
        submission_data: json!({ "location": { "polling_unit_code": "PU-014" } }),
        attachments: Vec::new(),
        created_at: Some(ClaimedTimestamp::Millis(created_at_ms)),
        election_id: None,
    }
}

fn incident_draft(narrative: &str, location: Option<RawLocation>) -> SubmissionDraft {
    SubmissionDraft::new(SubmissionPayload::IncidentReport(IncidentReport {
        narrative: narrative.into(),
        location,
        ..IncidentReport::default()
    }))
}

fn incident_envelope(client_id: &str, created_at: Option<ClaimedTimestamp>) -> SyncEnvelope {
    SyncEnvelope {
        submission_type: "incident_report".into(),
        client_submission_id: Some(client_id.into()),
        submission_data: json!({ "narrative": format!("queued {client_id}") }),
        attachments: Vec::new(),
        created_at,
        election_id: Some("gov-2027".into()),
    }
}

struct Harness {
    principals: Arc<InMemoryPrincipalRepository>,
    submissions: Arc<InMemorySubmissionRepository>,
}

impl Harness {
    async fn with(principals: Vec<Principal>) -> Self {
        let repo = Arc::new(InMemoryPrincipalRepository::new());
        for principal in principals {
            repo.insert(principal).await;
        }
        Self {
            principals: repo,
            submissions: Arc::new(InMemorySubmissionRepository::new()),
        }
    }

    fn submission_service(&self) -> SubmissionService {
        SubmissionService::new(self.principals.clone(), self.submissions.clone())
    }

    fn sync_service(&self) -> SyncService {
        SyncService::new(self.principals.clone(), self.submissions.clone())
    }

    fn credential_service(&self, keys: Arc<dyn KeyGenerator>) -> CredentialService {
        CredentialService::new(self.principals.clone(), keys)
    }
}

#[tokio::test]
async fn resubmission_updates_in_place() {
    let harness = Harness::with(vec![agent("agent-1", "PU-014")]).await;
    let service = harness.submission_service();

    let first = service
        .submit("agent-1", pui_draft("PU-014"))
        .await
        .expect("first submit");
    let mut edited = pui_draft(" pu-014 ");
    if let SubmissionPayload::PollingUnitInfo(info) = &mut edited.payload {
        info.notes = Some("queue forming at gate".into());
    }
    let second = service
        .submit("agent-1", edited)
        .await
        .expect("second submit");

    assert!(!second.duplicate);
    assert_eq!(first.submission.submission_id, second.submission.submission_id);
    assert_eq!(first.submission.record_key, second.submission.record_key);
    assert_eq!(first.submission.created_at_ms, second.submission.created_at_ms);
    assert_eq!(harness.submissions.len().await, 1);

    let stored = harness
        .submissions
        .get_by_record_key(&first.submission.record_key)
        .await
        .expect("read")
        .expect("row");
    assert!(matches!(
        stored.payload,
        SubmissionPayload::PollingUnitInfo(ref info) if info.notes.as_deref() == Some("queue forming at gate")
    ));

    let arrival = service
        .submit("agent-1", arrival_draft(&first.submission.submission_id))
        .await
        .expect("arrival");
    let again = service
        .submit("agent-1", arrival_draft(&first.submission.submission_id))
        .await
        .expect("arrival again");
    assert_eq!(arrival.submission.record_key, again.submission.record_key);
    assert_eq!(harness.submissions.len().await, 2);
}

#[tokio::test]
async fn client_token_replay_is_a_duplicate() {
    let harness = Harness::with(vec![agent("agent-1", "PU-014")]).await;
    let service = harness.submission_service();
    let draft = SubmissionDraft {
        client_submission_id: Some("q-7".into()),
        ..incident_draft("thugs at the gate", None)
    };

    let first = service
        .submit("agent-1", draft.clone())
        .await
        .expect("first");
    let replay = service.submit("agent-1", draft).await.expect("replay");

    assert!(!first.duplicate);
    assert!(replay.duplicate);
    assert_eq!(first.submission.submission_id, replay.submission.submission_id);
    assert!(first.submission.submission_id.starts_with("INC-"));
    assert_eq!(first.submission.polling_unit_code, "PU-014");
    assert_eq!(harness.submissions.len().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_writes_converge_on_one_row() {
    let harness = Harness::with(vec![agent("agent-1", "PU-014")]).await;
    let service = harness.submission_service();

    let handles = (0..16)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.submit("agent-1", pui_draft("PU-014")).await })
        })
        .collect::<Vec<_>>();
    let mut ids = HashSet::new();
    for handle in handles {
        let outcome = handle.await.expect("join").expect("submit");
        ids.insert(outcome.submission.submission_id);
    }

    assert_eq!(harness.submissions.len().await, 1);
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn every_type_is_checked_against_the_live_scope() {
    let harness = Harness::with(vec![agent("agent-1", "PU-014")]).await;
    let service = harness.submission_service();

    let err = service
        .submit("agent-1", pui_draft("PU-099"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DomainError::ScopeMismatch {
            submitted: "PU-099".into(),
            assigned: "PU-014".into(),
        }
    );

    let err = service
        .submit(
            "agent-1",
            incident_draft("elsewhere", Some(location("PU-099"))),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "scope_mismatch");

    let pui = service
        .submit("agent-1", pui_draft("PU-014"))
        .await
        .expect("in scope");
    let submission_id = pui.submission.submission_id;
    service
        .submit("agent-1", arrival_draft(&submission_id))
        .await
        .expect("arrival in scope");
    service
        .submit("agent-1", result_draft(&submission_id))
        .await
        .expect("result in scope");
    assert_eq!(harness.submissions.len().await, 3);

    // Reassignment takes effect on the next request, including updates to
    // records that already exist.
    harness.principals.insert(agent("agent-1", "PU-015")).await;
    let moved = DomainError::ScopeMismatch {
        submitted: "PU-014".into(),
        assigned: "PU-015".into(),
    };
    assert_eq!(
        service
            .submit("agent-1", arrival_draft(&submission_id))
            .await
            .unwrap_err(),
        moved
    );
    assert_eq!(
        service
            .submit("agent-1", result_draft(&submission_id))
            .await
            .unwrap_err(),
        moved
    );
    assert_eq!(
        service
            .submit("agent-1", pui_draft("PU-014"))
            .await
            .unwrap_err(),
        moved
    );
    assert_eq!(harness.submissions.len().await, 3);

    let family = service
        .family("agent-1", &submission_id)
        .await
        .expect("family");
    assert!(family.iter().all(|row| row.updated_at_ms == row.created_at_ms));
}

#[tokio::test]
async fn result_tracking_outside_scope_is_refused() {
    let harness = Harness::with(vec![agent("agent-1", "PU-014")]).await;
    let service = harness.submission_service();
    let pui = service
        .submit("agent-1", pui_draft("PU-014"))
        .await
        .expect("pui");

    harness.principals.insert(agent("agent-1", "PU-099")).await;
    let err = service
        .submit("agent-1", result_draft(&pui.submission.submission_id))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DomainError::ScopeMismatch {
            submitted: "PU-014".into(),
            assigned: "PU-099".into(),
        }
    );
    assert_eq!(harness.submissions.len().await, 1);
}

#[tokio::test]
async fn scopes_above_polling_unit_never_match() {
    let coordinator = Principal {
        designation: Some("Ward Coordinator".into()),
        location: location("PU-014"),
        ..Principal::new("coord-1")
    };
    let harness = Harness::with(vec![coordinator]).await;

    let err = harness
        .submission_service()
        .submit("coord-1", pui_draft("PU-014"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DomainError::ScopeMismatch {
            submitted: "PU-014".into(),
            assigned: "unassigned".into(),
        }
    );

    let err = harness
        .submission_service()
        .submit("coord-1", incident_draft("no unit on payload", None))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));
}

#[tokio::test]
async fn linked_reports_only_reach_the_callers_records() {
    let harness =
        Harness::with(vec![agent("agent-1", "PU-014"), agent("agent-2", "PU-014")]).await;
    let service = harness.submission_service();
    let pui = service
        .submit("agent-1", pui_draft("PU-014"))
        .await
        .expect("pui");

    let err = service
        .submit("agent-2", arrival_draft(&pui.submission.submission_id))
        .await
        .unwrap_err();
    assert_eq!(err, DomainError::NotFoundOrForbidden);

    let err = service
        .submit("agent-2", arrival_draft("PUI-missing"))
        .await
        .unwrap_err();
    assert_eq!(err, DomainError::NotFoundOrForbidden);

    let err = service
        .family("agent-2", &pui.submission.submission_id)
        .await
        .unwrap_err();
    assert_eq!(err, DomainError::NotFoundOrForbidden);

    let err = service
        .submit(
            "agent-1",
            SubmissionDraft::new(SubmissionPayload::OfficerArrival(OfficerArrival::default())),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));
}

#[tokio::test]
async fn sync_processes_items_in_claimed_order() {
    let harness = Harness::with(vec![agent("agent-1", "PU-014")]).await;
    let report = harness
        .sync_service()
        .sync(
            "agent-1",
            vec![
                incident_envelope("t3", Some(ClaimedTimestamp::Millis(3_000))),
                incident_envelope("t1", Some(ClaimedTimestamp::Millis(1_000))),
                incident_envelope("t2", Some(ClaimedTimestamp::Text("1970-01-01T00:00:02Z".into()))),
            ],
            RequestMeta::default(),
        )
        .await
        .expect("sync");

    let order = report
        .results
        .iter()
        .map(|result| result.client_submission_id.as_deref().unwrap_or_default())
        .collect::<Vec<_>>();
    assert_eq!(order, vec!["t1", "t2", "t3"]);
    assert_eq!(report.summary.synced, 3);
    assert!(report.results.iter().all(|result| result.success));
    assert_eq!(harness.submissions.len().await, 3);

    let listed = harness
        .submissions
        .list_by_user(&SubmissionListQuery {
            user_id: "agent-1".into(),
            submission_type: Some(SubmissionType::IncidentReport),
            limit: 10,
        })
        .await
        .expect("list");
    assert!(listed.iter().all(|row| row.election_id.as_deref() == Some("gov-2027")));
}

#[tokio::test]
async fn sync_replay_reports_every_item_as_duplicate() {
    let harness = Harness::with(vec![agent("agent-1", "PU-014")]).await;
    let service = harness.sync_service();
    let batch = vec![
        incident_envelope("q-1", None),
        incident_envelope("q-2", None),
        SyncEnvelope {
            submission_type: "polling_unit_info".into(),
            client_submission_id: Some("q-3".into()),
            submission_data: json!({ "location": { "polling_unit_code": "PU-014" } }),
            attachments: vec!["https://cdn.example/pu.jpg".into()],
            created_at: None,
            election_id: None,
        },
    ];

    let first = service
        .sync("agent-1", batch.clone(), RequestMeta::default())
        .await
        .expect("first");
    assert_eq!(first.summary.synced, 3);
    let stored = harness.submissions.len().await;

    let replay = service
        .sync("agent-1", batch, RequestMeta::default())
        .await
        .expect("replay");
    assert_eq!(replay.summary.duplicates, replay.summary.total);
    assert_eq!(replay.summary.synced, 0);
    assert_eq!(harness.submissions.len().await, stored);
    for (before, after) in first.results.iter().zip(&replay.results) {
        assert_eq!(before.submission_id, after.submission_id);
    }
}

#[tokio::test]
async fn sync_links_to_records_staged_in_the_same_batch() {
    let harness = Harness::with(vec![agent("agent-1", "PU-014")]).await;
    let pui = harness
        .submission_service()
        .submit("agent-1", pui_draft("PU-014"))
        .await
        .expect("pui");
    let submission_id = pui.submission.submission_id;

    let report = harness
        .sync_service()
        .sync(
            "agent-1",
            vec![
                SyncEnvelope {
                    submission_type: "polling_unit_info".into(),
                    client_submission_id: Some("edit-1".into()),
                    submission_data: json!({
                        "location": { "polling_unit_code": "PU-014" },
                        "notes": "moved inside"
                    }),
                    attachments: Vec::new(),
                    created_at: Some(ClaimedTimestamp::Millis(1)),
                    election_id: None,
                },
                SyncEnvelope {
                    submission_type: "officer_arrival".into(),
                    client_submission_id: Some("arr-1".into()),
                    submission_data: json!({ "submissionId": submission_id }),
                    attachments: Vec::new(),
                    created_at: Some(ClaimedTimestamp::Millis(2)),
                    election_id: None,
                },
                SyncEnvelope {
                    submission_type: "officer_arrival".into(),
                    client_submission_id: Some("arr-2".into()),
                    submission_data: json!({ "submissionId": "PUI-unknown" }),
                    attachments: Vec::new(),
                    created_at: Some(ClaimedTimestamp::Millis(3)),
                    election_id: None,
                },
            ],
            RequestMeta::default(),
        )
        .await
        .expect("sync");

    assert_eq!(report.summary.synced, 2);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.results[0].submission_id.as_deref(), Some(submission_id.as_str()));
    assert_eq!(report.results[1].submission_id.as_deref(), Some(submission_id.as_str()));
    assert_eq!(report.results[2].error, Some("not_found_or_forbidden"));

    let family = harness
        .submission_service()
        .family("agent-1", &submission_id)
        .await
        .expect("family");
    assert_eq!(family.len(), 2);
}

#[tokio::test]
async fn oversized_batch_is_rejected_before_any_work() {
    let harness = Harness::with(vec![agent("agent-1", "PU-014")]).await;
    let batch = (0..101)
        .map(|index| incident_envelope(&format!("q-{index}"), None))
        .collect::<Vec<_>>();
    let err = harness
        .sync_service()
        .sync("agent-1", batch, RequestMeta::default())
        .await
        .unwrap_err();
    assert_eq!(err, DomainError::BatchTooLarge { size: 101, max: 100 });
    assert!(harness.submissions.is_empty().await);
}

#[derive(Clone, Copy)]
enum CommitScript {
    /// Every batch commit fails.
    Fail,
    /// Another writer stores the first staged row under its own identifier
    /// just before the batch commits.
    RivalWinsFirstRow,
}

/// Delegates to the in-memory repository, except for batch commits.
struct ScriptedCommits {
    inner: InMemorySubmissionRepository,
    script: CommitScript,
}

impl ScriptedCommits {
    fn new(script: CommitScript) -> Self {
        Self {
            inner: InMemorySubmissionRepository::new(),
            script,
        }
    }
}

impl SubmissionRepository for ScriptedCommits {
    fn get_by_record_key(
        &self,
        record_key: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        self.inner.get_by_record_key(record_key)
    }

    fn find_polling_unit_info(
        &self,
        submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        self.inner.find_polling_unit_info(submission_id)
    }

    fn find_by_client_id(
        &self,
        user_id: &str,
        submission_type: Option<SubmissionType>,
        client_submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Submission>>> {
        self.inner
            .find_by_client_id(user_id, submission_type, client_submission_id)
    }

    fn upsert(&self, submission: &Submission) -> BoxFuture<'_, DomainResult<Submission>> {
        self.inner.upsert(submission)
    }

    fn upsert_batch(
        &self,
        submissions: &[Submission],
    ) -> BoxFuture<'_, DomainResult<Vec<Submission>>> {
        let submissions = submissions.to_vec();
        Box::pin(async move {
            match self.script {
                CommitScript::Fail => Err(DomainError::Storage("connection reset".into())),
                CommitScript::RivalWinsFirstRow => {
                    if let Some(first) = submissions.first() {
                        let rival = Submission {
                            submission_id: "PUI-rival".into(),
                            client_submission_id: None,
                            client_submission_ids: Vec::new(),
                            ..first.clone()
                        };
                        self.inner.upsert(&rival).await?;
                    }
                    self.inner.upsert_batch(&submissions).await
                }
            }
        })
    }

    fn list_by_user(
        &self,
        query: &SubmissionListQuery,
    ) -> BoxFuture<'_, DomainResult<Vec<Submission>>> {
        self.inner.list_by_user(query)
    }

    fn list_family(
        &self,
        user_id: &str,
        submission_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<Submission>>> {
        self.inner.list_family(user_id, submission_id)
    }
}

#[tokio::test]
async fn storage_failure_aborts_the_whole_batch() {
    let principals = Arc::new(InMemoryPrincipalRepository::new());
    principals.insert(agent("agent-1", "PU-014")).await;
    let repo = Arc::new(ScriptedCommits::new(CommitScript::Fail));
    let service = SyncService::new(principals, repo.clone());

    let err = service
        .sync(
            "agent-1",
            vec![incident_envelope("q-1", None), incident_envelope("q-2", None)],
            RequestMeta::default(),
        )
        .await
        .unwrap_err();
    assert!(err.is_storage());
    assert!(repo.inner.is_empty().await);
}

#[tokio::test]
async fn duplicates_of_staged_rows_echo_the_committed_identifier() {
    let principals = Arc::new(InMemoryPrincipalRepository::new());
    principals.insert(agent("agent-1", "PU-014")).await;
    let repo = Arc::new(ScriptedCommits::new(CommitScript::RivalWinsFirstRow));
    let service = SyncService::new(principals, repo.clone());

    let report = service
        .sync(
            "agent-1",
            vec![pui_envelope("pui-a", 1_000), pui_envelope("pui-a", 2_000)],
            RequestMeta::default(),
        )
        .await
        .expect("sync");

    assert_eq!(report.summary.synced, 1);
    assert_eq!(report.summary.duplicates, 1);
    for result in &report.results {
        assert_eq!(result.submission_id.as_deref(), Some("PUI-rival"));
    }
    assert_eq!(repo.inner.len().await, 1);
}

struct FixedKeys(&'static str);

impl KeyGenerator for FixedKeys {
    fn generate(&self) -> String {
        self.0.to_string()
    }
}

#[tokio::test]
async fn keys_stay_unique_across_ten_thousand_users() {
    let principals = (0..10_000)
        .map(|index| agent(&format!("agent-{index:05}"), &format!("PU-{index:05}")))
        .collect::<Vec<_>>();
    let harness = Harness::with(principals).await;
    let service = harness.credential_service(Arc::new(RandomKeyGenerator));

    let mut keys = HashSet::new();
    for index in 0..10_000 {
        let issued = service
            .issue(&format!("agent-{index:05}"), None)
            .await
            .expect("issue");
        assert!(is_well_formed_key(&issued.credential.key));
        keys.insert(issued.credential.key);
    }
    assert_eq!(keys.len(), 10_000);
}

#[tokio::test]
async fn exhausted_key_space_fails_without_assigning() {
    let harness =
        Harness::with(vec![agent("agent-1", "PU-014"), agent("agent-2", "PU-015")]).await;
    let service = harness.credential_service(Arc::new(FixedKeys("K7P4ZQ")));

    service.issue("agent-1", None).await.expect("first key");
    let err = service.issue("agent-2", None).await.unwrap_err();
    assert_eq!(
        err,
        DomainError::KeyGenerationExhausted {
            attempts: MAX_KEY_ATTEMPTS
        }
    );
    assert_eq!(
        service.get_for_user("agent-2").await.unwrap_err(),
        DomainError::NotFound
    );
}

#[tokio::test]
async fn revoked_credential_is_replaced_by_a_fresh_key() {
    let harness = Harness::with(vec![agent("agent-1", "PU-014")]).await;
    let service = harness.credential_service(Arc::new(RandomKeyGenerator));
    let first = service.issue("agent-1", None).await.expect("first key");

    let mut principal = harness
        .principals
        .get("agent-1")
        .await
        .expect("read")
        .expect("principal");
    if let Some(credential) = principal.monitor_credential.as_mut() {
        credential.status = CredentialStatus::Revoked;
    }
    harness.principals.insert(principal).await;

    let second = service
        .issue("agent-1", Some("admin-1".into()))
        .await
        .expect("reissue");
    assert!(!second.already_assigned);
    assert_ne!(second.credential.key, first.credential.key);
    assert_eq!(second.credential.status, CredentialStatus::Active);
}

#[tokio::test]
async fn backfill_counts_assigned_skipped_and_failed() {
    let incomplete = Principal {
        designation: Some("Polling Unit Agent".into()),
        location: RawLocation {
            state: Some("Lagos".into()),
            ..RawLocation::default()
        },
        ..Principal::new("agent-3")
    };
    let observer = Principal {
        designation: Some("Observer".into()),
        location: location("PU-020"),
        ..Principal::new("observer-1")
    };
    let harness = Harness::with(vec![
        agent("agent-1", "PU-014"),
        agent("agent-2", "PU-015"),
        incomplete,
        observer,
    ])
    .await;

    let report = harness
        .credential_service(Arc::new(RandomKeyGenerator))
        .backfill(100, Some("admin-1".into()))
        .await
        .expect("backfill");
    assert_eq!(report.scanned, 3);
    assert_eq!(report.assigned, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].user_id, "agent-3");
    assert_eq!(report.issues[0].code, "incomplete_profile");

    let again = harness
        .credential_service(Arc::new(RandomKeyGenerator))
        .backfill(100, None)
        .await
        .expect("second sweep");
    assert_eq!(again.assigned, 0);
    assert_eq!(again.scanned, 1);

    let harness =
        Harness::with(vec![agent("agent-1", "PU-014"), agent("agent-2", "PU-015")]).await;
    let report = harness
        .credential_service(Arc::new(FixedKeys("K7P4ZQ")))
        .backfill(100, None)
        .await
        .expect("backfill");
    assert_eq!(report.assigned, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.issues[0].code, "key_generation_exhausted");
}

#[tokio::test]
async fn offline_reports_link_by_the_queued_token() {
    let harness = Harness::with(vec![agent("agent-1", "PU-014")]).await;
    let report = harness
        .sync_service()
        .sync(
            "agent-1",
            vec![
                SyncEnvelope {
                    submission_type: "officer_arrival".into(),
                    client_submission_id: Some("arrival-1".into()),
                    submission_data: json!({ "submissionId": "pui-q" }),
                    attachments: Vec::new(),
                    created_at: Some(ClaimedTimestamp::Millis(2_000)),
                    election_id: None,
                },
                pui_envelope("pui-q", 1_000),
            ],
            RequestMeta::default(),
        )
        .await
        .expect("sync");

    assert_eq!(report.summary.synced, 2);
    let pui_id = report.results[0].submission_id.clone().expect("pui id");
    assert!(pui_id.starts_with("PUI-"));
    assert_eq!(report.results[1].submission_id.as_deref(), Some(pui_id.as_str()));
}

#[tokio::test]
async fn replay_after_in_place_updates_is_all_duplicates() {
    let harness = Harness::with(vec![agent("agent-1", "PU-014")]).await;
    let service = harness.sync_service();
    let batch = vec![pui_envelope("pui-a", 1_000), pui_envelope("pui-b", 2_000)];

    let first = service
        .sync("agent-1", batch.clone(), RequestMeta::default())
        .await
        .expect("first");
    assert_eq!(first.summary.synced, 2);
    assert_eq!(harness.submissions.len().await, 1);

    let replay = service
        .sync("agent-1", batch, RequestMeta::default())
        .await
        .expect("replay");
    assert_eq!(
        replay.summary,
        SyncSummary {
            total: 2,
            synced: 0,
            duplicates: 2,
            failed: 0,
        }
    );
    assert_eq!(harness.submissions.len().await, 1);
    assert_eq!(first.results[0].submission_id, replay.results[1].submission_id);
}

#[tokio::test]
async fn malformed_items_fail_without_rejecting_the_batch() {
    let harness = Harness::with(vec![agent("agent-1", "PU-014")]).await;
    let report = harness
        .sync_service()
        .sync(
            "agent-1",
            vec![
                json!({
                    "submissionType": "incident_report",
                    "clientSubmissionId": "ok-1",
                    "submissionData": { "narrative": "ballot box snatched" },
                    "createdAt": 1.5e3
                }),
                json!({ "clientSubmissionId": "bad-1", "submissionType": null }),
                json!({ "clientSubmissionId": "bad-2", "submissionType": 5, "createdAt": 500 }),
                json!({
                    "submissionType": "incident_report",
                    "clientSubmissionId": "ok-2",
                    "submissionData": { "narrative": "voters turned away" },
                    "createdAt": 1_000
                }),
            ],
            RequestMeta::default(),
        )
        .await
        .expect("sync");

    assert_eq!(report.summary.total, 4);
    assert_eq!(report.summary.synced, 2);
    assert_eq!(report.summary.failed, 2);
    let order = report
        .results
        .iter()
        .map(|result| (result.client_submission_id.as_deref(), result.error))
        .collect::<Vec<_>>();
    assert_eq!(
        order,
        vec![
            (Some("bad-2"), Some("invalid_type")),
            (Some("ok-2"), None),
            (Some("ok-1"), None),
            (Some("bad-1"), Some("validation_error")),
        ]
    );
    assert_eq!(harness.submissions.len().await, 2);
}

#[tokio::test]
async fn proposed_identifier_cannot_take_another_agents_record() {
    let harness =
        Harness::with(vec![agent("agent-1", "PU-014"), agent("agent-2", "PU-014")]).await;
    let service = harness.sync_service();
    let proposing = |client_id: &str| SyncEnvelope {
        submission_data: json!({
            "submissionId": "pui-shared",
            "location": { "polling_unit_code": "PU-014" }
        }),
        ..pui_envelope(client_id, 1_000)
    };

    let first = service
        .sync("agent-1", vec![proposing("a-1")], RequestMeta::default())
        .await
        .expect("first agent");
    assert_eq!(first.results[0].submission_id.as_deref(), Some("pui-shared"));

    let second = service
        .sync("agent-2", vec![proposing("b-1")], RequestMeta::default())
        .await
        .expect("second agent");
    assert_eq!(second.summary.failed, 1);
    assert_eq!(second.results[0].error, Some("conflict"));
    assert_eq!(harness.submissions.len().await, 1);
}

#[tokio::test]
async fn field_day_from_scope_to_offline_replay() {
    let mut principal = agent("agent-1", "PU-014");
    principal.location.ward = Some("Ward 3".into());
    let harness = Harness::with(vec![principal]).await;
    let submissions = harness.submission_service();

    let scope = submissions.caller_scope("agent-1").await.expect("scope");
    assert_eq!(scope.level.as_str(), "polling_unit");
    assert_eq!(scope.state.as_ref().map(|c| c.label.as_str()), Some("Lagos"));
    assert_eq!(scope.lga.as_ref().map(|c| c.label.as_str()), Some("Ikeja"));
    assert_eq!(scope.ward.as_ref().map(|c| c.label.as_str()), Some("Ward 3"));
    assert_eq!(scope.polling_unit_code(), Some("PU-014"));

    assert_eq!(
        submissions
            .submit("agent-1", pui_draft("PU-015"))
            .await
            .unwrap_err()
            .code(),
        "scope_mismatch"
    );
    assert!(harness.submissions.is_empty().await);

    // The device was offline all morning: nothing is stored yet and the
    // arrival refers to the identifier the device chose for its record.
    let report = harness
        .sync_service()
        .sync(
            "agent-1",
            vec![
                SyncEnvelope {
                    submission_type: "officer_arrival".into(),
                    client_submission_id: Some("arrival-1".into()),
                    submission_data: json!({
                        "submissionId": "pui-1",
                        "on_time_status": "late"
                    }),
                    attachments: Vec::new(),
                    created_at: Some(ClaimedTimestamp::Text("2027-02-18T08:45:00Z".into())),
                    election_id: None,
                },
                SyncEnvelope {
                    submission_type: "polling_unit_info".into(),
                    client_submission_id: Some("pui-1".into()),
                    submission_data: json!({
                        "submissionId": "pui-1",
                        "location": { "polling_unit_code": "PU-014" }
                    }),
                    attachments: Vec::new(),
                    created_at: Some(ClaimedTimestamp::Text("2027-02-18T07:30:00Z".into())),
                    election_id: None,
                },
            ],
            RequestMeta::default(),
        )
        .await
        .expect("sync");

    assert_eq!(
        report.summary,
        SyncSummary {
            total: 2,
            synced: 2,
            duplicates: 0,
            failed: 0,
        }
    );
    assert_eq!(report.results[0].submission_type, "polling_unit_info");
    assert_eq!(report.results[1].submission_type, "officer_arrival");
    assert!(
        report
            .results
            .iter()
            .all(|result| result.submission_id.as_deref() == Some("pui-1"))
    );
    assert_eq!(
        submissions
            .family("agent-1", "pui-1")
            .await
            .expect("family")
            .len(),
        2
    );

    let live = submissions
        .submit("agent-1", pui_draft("PU-014"))
        .await
        .expect("in scope");
    assert_eq!(live.submission.submission_id, "pui-1");
    assert_eq!(harness.submissions.len().await, 2);
}
