//! Per-type report payloads. Only data capture differs between types; the
//! authorization rules live in `submissions`.

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;
use crate::scope::{RawLocation, ScopeComponent};
use crate::submissions::SubmissionType;
use crate::util::parse_rfc3339_ms;

pub const MAX_REFERENCE_LENGTH: usize = 2_048;
pub const MAX_MEDIA_PER_FIELD: usize = 20;
pub const MAX_OFFICER_NAMES: usize = 20;
pub const MAX_PARTY_ROWS: usize = 50;
pub const MAX_PEOPLE_PER_LIST: usize = 50;
pub const MAX_IRREGULARITIES: usize = 50;
pub const MAX_NARRATIVE_LENGTH: usize = 5_000;
pub const MAX_NOTE_LENGTH: usize = 2_000;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "submission_type", content = "data", rename_all = "snake_case")]
pub enum SubmissionPayload {
    PollingUnitInfo(PollingUnitInfo),
    OfficerArrival(OfficerArrival),
    ResultTracking(ResultTracking),
    IncidentReport(IncidentReport),
}

impl SubmissionPayload {
    /// Decodes an untyped document into the variant for `submission_type`.
    pub fn from_document(
        submission_type: SubmissionType,
        document: serde_json::Value,
    ) -> DomainResult<Self> {
        fn decode<T: serde::de::DeserializeOwned>(
            submission_type: SubmissionType,
            document: serde_json::Value,
        ) -> DomainResult<T> {
            serde_json::from_value(document).map_err(|err| {
                DomainError::Validation(format!(
                    "invalid {} payload: {err}",
                    submission_type.as_str()
                ))
            })
        }

        Ok(match submission_type {
            SubmissionType::PollingUnitInfo => {
                SubmissionPayload::PollingUnitInfo(decode(submission_type, document)?)
            }
            SubmissionType::OfficerArrival => {
                SubmissionPayload::OfficerArrival(decode(submission_type, document)?)
            }
            SubmissionType::ResultTracking => {
                SubmissionPayload::ResultTracking(decode(submission_type, document)?)
            }
            SubmissionType::IncidentReport => {
                SubmissionPayload::IncidentReport(decode(submission_type, document)?)
            }
        })
    }

    /// The variant's fields as a self-describing document, the inverse of
    /// `from_document`.
    pub fn to_document(&self) -> DomainResult<serde_json::Value> {
        let document = match self {
            SubmissionPayload::PollingUnitInfo(info) => serde_json::to_value(info),
            SubmissionPayload::OfficerArrival(arrival) => serde_json::to_value(arrival),
            SubmissionPayload::ResultTracking(result) => serde_json::to_value(result),
            SubmissionPayload::IncidentReport(report) => serde_json::to_value(report),
        };
        document.map_err(|err| DomainError::Validation(format!("unencodable payload: {err}")))
    }

    pub fn submission_type(&self) -> SubmissionType {
        match self {
            SubmissionPayload::PollingUnitInfo(_) => SubmissionType::PollingUnitInfo,
            SubmissionPayload::OfficerArrival(_) => SubmissionType::OfficerArrival,
            SubmissionPayload::ResultTracking(_) => SubmissionType::ResultTracking,
            SubmissionPayload::IncidentReport(_) => SubmissionType::IncidentReport,
        }
    }

    /// Explicit location fields carried by the payload, if any.
    pub fn location(&self) -> Option<&RawLocation> {
        match self {
            SubmissionPayload::PollingUnitInfo(info) => Some(&info.location),
            SubmissionPayload::IncidentReport(report) => report.location.as_ref(),
            SubmissionPayload::OfficerArrival(_) | SubmissionPayload::ResultTracking(_) => None,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        match self {
            SubmissionPayload::PollingUnitInfo(info) => info.validate(),
            SubmissionPayload::OfficerArrival(arrival) => arrival.validate(),
            SubmissionPayload::ResultTracking(result) => result.validate(),
            SubmissionPayload::IncidentReport(report) => report.validate(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GpsCoordinates {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    School,
    ReligiousCentre,
    Market,
    HealthCentre,
    GovernmentBuilding,
    OpenSpace,
    PrivateResidence,
    Other,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PollingUnitInfo {
    pub location: RawLocation,
    #[serde(default)]
    pub gps: Option<GpsCoordinates>,
    #[serde(default)]
    pub location_type: Option<LocationType>,
    #[serde(default)]
    pub location_type_other: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl PollingUnitInfo {
    pub fn polling_unit(&self) -> Option<ScopeComponent> {
        ScopeComponent::polling_unit(
            self.location.polling_unit_code.as_deref(),
            self.location.polling_unit.as_deref(),
        )
    }

    fn validate(&self) -> DomainResult<()> {
        if self.polling_unit().is_none() {
            return Err(DomainError::Validation(
                "location.polling_unit_code is required".into(),
            ));
        }
        if let Some(gps) = &self.gps {
            if !(-90.0..=90.0).contains(&gps.latitude) {
                return Err(DomainError::Validation(
                    "gps.latitude must be between -90 and 90".into(),
                ));
            }
            if !(-180.0..=180.0).contains(&gps.longitude) {
                return Err(DomainError::Validation(
                    "gps.longitude must be between -180 and 180".into(),
                ));
            }
            if gps.accuracy_m.is_some_and(|accuracy| accuracy < 0.0) {
                return Err(DomainError::Validation(
                    "gps.accuracy_m cannot be negative".into(),
                ));
            }
        }
        validate_text("location_type_other", self.location_type_other.as_deref(), MAX_NOTE_LENGTH)?;
        validate_text("notes", self.notes.as_deref(), MAX_NOTE_LENGTH)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalStatus {
    Early,
    OnTime,
    Late,
    NotArrived,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct OfficerArrival {
    #[serde(default)]
    pub arrival_time: Option<String>,
    #[serde(default)]
    pub expected_arrival_time: Option<String>,
    #[serde(default)]
    pub on_time_status: Option<ArrivalStatus>,
    #[serde(default)]
    pub officer_names: Vec<String>,
    #[serde(default)]
    pub officers_in_uniform: Option<bool>,
    #[serde(default)]
    pub impersonators_suspected: Option<bool>,
    #[serde(default)]
    pub impersonator_details: Option<String>,
    #[serde(default)]
    pub proof_media: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl OfficerArrival {
    fn validate(&self) -> DomainResult<()> {
        if self.officer_names.len() > MAX_OFFICER_NAMES {
            return Err(DomainError::Validation(format!(
                "officer_names exceeds max of {MAX_OFFICER_NAMES}"
            )));
        }
        if self.officer_names.iter().any(|name| name.trim().is_empty()) {
            return Err(DomainError::Validation(
                "officer_names cannot contain empty names".into(),
            ));
        }
        validate_references("proof_media", &self.proof_media)?;
        validate_text(
            "impersonator_details",
            self.impersonator_details.as_deref(),
            MAX_NOTE_LENGTH,
        )?;
        validate_text("notes", self.notes.as_deref(), MAX_NOTE_LENGTH)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartyVotes {
    pub party: String,
    pub votes: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteStatistics {
    #[serde(default)]
    pub registered_voters: Option<u64>,
    #[serde(default)]
    pub accredited_voters: Option<u64>,
    #[serde(default)]
    pub valid_votes: Option<u64>,
    #[serde(default)]
    pub rejected_votes: Option<u64>,
    #[serde(default)]
    pub total_votes_cast: Option<u64>,
    #[serde(default)]
    pub party_votes: Vec<PartyVotes>,
}

/// Four named evidence slots plus any extra media.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultEvidence {
    #[serde(default)]
    pub result_sheet: Option<String>,
    #[serde(default)]
    pub result_sheet_closeup: Option<String>,
    #[serde(default)]
    pub announcement_video: Option<String>,
    #[serde(default)]
    pub posted_result: Option<String>,
    #[serde(default)]
    pub extras: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultTracking {
    #[serde(default)]
    pub vote_statistics: VoteStatistics,
    #[serde(default)]
    pub discrepancies: Option<String>,
    #[serde(default)]
    pub evidence: ResultEvidence,
}

impl ResultTracking {
    fn validate(&self) -> DomainResult<()> {
        let rows = &self.vote_statistics.party_votes;
        if rows.len() > MAX_PARTY_ROWS {
            return Err(DomainError::Validation(format!(
                "vote_statistics.party_votes exceeds max of {MAX_PARTY_ROWS}"
            )));
        }
        if rows.iter().any(|row| row.party.trim().is_empty()) {
            return Err(DomainError::Validation(
                "vote_statistics.party_votes requires a party name".into(),
            ));
        }
        let slots = [
            &self.evidence.result_sheet,
            &self.evidence.result_sheet_closeup,
            &self.evidence.announcement_video,
            &self.evidence.posted_result,
        ];
        let named = slots
            .into_iter()
            .filter_map(|slot| slot.clone())
            .collect::<Vec<_>>();
        validate_references("evidence", &named)?;
        validate_references("evidence.extras", &self.evidence.extras)?;
        validate_text(
            "discrepancies",
            self.discrepancies.as_deref(),
            MAX_NARRATIVE_LENGTH,
        )
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonInvolved {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Escalation {
    #[serde(default)]
    pub reported_to: Vec<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub resolved: Option<bool>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncidentReport {
    /// Required when the report is not linked to a polling-unit-info record.
    #[serde(default)]
    pub location: Option<RawLocation>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub ended_at: Option<String>,
    #[serde(default)]
    pub irregularities: Vec<String>,
    pub narrative: String,
    #[serde(default)]
    pub perpetrators: Vec<PersonInvolved>,
    #[serde(default)]
    pub victims: Vec<PersonInvolved>,
    #[serde(default)]
    pub witnesses: Vec<PersonInvolved>,
    #[serde(default)]
    pub escalation: Option<Escalation>,
}

impl IncidentReport {
    fn validate(&self) -> DomainResult<()> {
        let narrative = self.narrative.trim();
        if narrative.is_empty() {
            return Err(DomainError::Validation("narrative is required".into()));
        }
        validate_text("narrative", Some(narrative), MAX_NARRATIVE_LENGTH)?;
        if self.irregularities.len() > MAX_IRREGULARITIES {
            return Err(DomainError::Validation(format!(
                "irregularities exceeds max of {MAX_IRREGULARITIES}"
            )));
        }
        for (field, people) in [
            ("perpetrators", &self.perpetrators),
            ("victims", &self.victims),
            ("witnesses", &self.witnesses),
        ] {
            if people.len() > MAX_PEOPLE_PER_LIST {
                return Err(DomainError::Validation(format!(
                    "{field} exceeds max of {MAX_PEOPLE_PER_LIST}"
                )));
            }
        }

        let started = self.started_at.as_deref().map(parse_window_bound).transpose()?;
        let ended = self.ended_at.as_deref().map(parse_window_bound).transpose()?;
        if let (Some(started), Some(ended)) = (started, ended) {
            if ended < started {
                return Err(DomainError::Validation(
                    "ended_at cannot be before started_at".into(),
                ));
            }
        }
        Ok(())
    }
}

fn parse_window_bound(value: &str) -> DomainResult<i64> {
    parse_rfc3339_ms(value).ok_or_else(|| {
        DomainError::Validation(format!("incident time '{value}' must be RFC3339"))
    })
}

/// Evidence and attachment references are opaque; only their shape is checked.
pub fn validate_references(field: &str, references: &[String]) -> DomainResult<()> {
    if references.len() > MAX_MEDIA_PER_FIELD {
        return Err(DomainError::Validation(format!(
            "{field} exceeds max of {MAX_MEDIA_PER_FIELD} references"
        )));
    }
    for reference in references {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(DomainError::Validation(format!(
                "{field} cannot contain empty references"
            )));
        }
        if reference.len() > MAX_REFERENCE_LENGTH {
            return Err(DomainError::Validation(format!(
                "{field} reference exceeds max length of {MAX_REFERENCE_LENGTH}"
            )));
        }
    }
    Ok(())
}

fn validate_text(field: &str, value: Option<&str>, max: usize) -> DomainResult<()> {
    if value.is_some_and(|value| value.chars().count() > max) {
        return Err(DomainError::Validation(format!(
            "{field} exceeds max length of {max}"
        )));
    }
    Ok(())
}
