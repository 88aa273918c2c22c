use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use votewatch_domain::submissions::SubmissionType;
use votewatch_domain::sync::SyncSummary;

const HTTP_REQUESTS_TOTAL: &str = "votewatch_api_http_requests_total";
const HTTP_REQUEST_DURATION_SECONDS: &str = "votewatch_api_http_request_duration_seconds";
const HTTP_REQUEST_ERRORS_TOTAL: &str = "votewatch_api_http_errors_total";
const SUBMISSIONS_TOTAL: &str = "votewatch_submissions_total";
const SYNC_ITEMS_TOTAL: &str = "votewatch_sync_items_total";
const SYNC_BATCHES_TOTAL: &str = "votewatch_sync_batches_total";
const CREDENTIAL_ISSUANCE_TOTAL: &str = "votewatch_credential_issuance_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// Route is the matched template, so label cardinality stays bounded.
pub fn register_http_request(method: &str, route: &str, status: StatusCode, elapsed: Duration) {
    let status_class = match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    };
    let labels = [
        ("method", method.to_string()),
        ("route", route.to_string()),
        ("status", status_class.to_string()),
    ];
    counter!(HTTP_REQUESTS_TOTAL, &labels[..]).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, &labels[..]).record(elapsed.as_secs_f64());
    if status.is_server_error() {
        counter!(HTTP_REQUEST_ERRORS_TOTAL, &labels[..2]).increment(1);
    }
}

/// `outcome` is `stored`, `duplicate` or the domain error code.
pub fn register_submission(submission_type: SubmissionType, outcome: &str) {
    counter!(
        SUBMISSIONS_TOTAL,
        "submission_type" => submission_type.as_str(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn register_sync_batch(summary: &SyncSummary) {
    counter!(SYNC_BATCHES_TOTAL).increment(1);
    for (outcome, count) in [
        ("synced", summary.synced),
        ("duplicate", summary.duplicates),
        ("failed", summary.failed),
    ] {
        if count > 0 {
            counter!(SYNC_ITEMS_TOTAL, "outcome" => outcome).increment(count as u64);
        }
    }
}

/// `outcome` is `assigned`, `already_assigned` or the domain error code.
pub fn register_credential_issuance(outcome: &str) {
    counter!(
        CREDENTIAL_ISSUANCE_TOTAL,
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
