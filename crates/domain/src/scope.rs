//! Monitoring scope resolution.
//!
//! A scope is the geographic jurisdiction a field agent may report on. It is
//! derived from the agent's designation (which fixes the level) and the raw
//! location labels on their profile. Resolution is a pure function: callers
//! re-resolve on every request instead of trusting a scope sent by a client.

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLevel {
    National,
    State,
    Lga,
    Ward,
    PollingUnit,
}

impl ScopeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeLevel::National => "national",
            ScopeLevel::State => "state",
            ScopeLevel::Lga => "lga",
            ScopeLevel::Ward => "ward",
            ScopeLevel::PollingUnit => "polling_unit",
        }
    }

    /// Fields required at this level, cumulative down the hierarchy.
    pub fn required_fields(&self) -> &'static [ScopeField] {
        match self {
            ScopeLevel::National => &[],
            ScopeLevel::State => &[ScopeField::State],
            ScopeLevel::Lga => &[ScopeField::State, ScopeField::Lga],
            ScopeLevel::Ward => &[ScopeField::State, ScopeField::Lga, ScopeField::Ward],
            ScopeLevel::PollingUnit => &[
                ScopeField::State,
                ScopeField::Lga,
                ScopeField::Ward,
                ScopeField::PollingUnit,
            ],
        }
    }

    fn includes(&self, field: ScopeField) -> bool {
        self.required_fields().contains(&field)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScopeField {
    State,
    Lga,
    Ward,
    PollingUnit,
}

impl ScopeField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeField::State => "state",
            ScopeField::Lga => "lga",
            ScopeField::Ward => "ward",
            ScopeField::PollingUnit => "polling_unit",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScopeField::State => "State",
            ScopeField::Lga => "LGA",
            ScopeField::Ward => "Ward",
            ScopeField::PollingUnit => "Polling Unit",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Designation {
    NationalCoordinator,
    StateCoordinator,
    LgaCoordinator,
    WardCoordinator,
    PollingUnitAgent,
    VoteDefender,
}

impl Designation {
    pub const ALL: [Designation; 6] = [
        Designation::NationalCoordinator,
        Designation::StateCoordinator,
        Designation::LgaCoordinator,
        Designation::WardCoordinator,
        Designation::PollingUnitAgent,
        Designation::VoteDefender,
    ];

    /// Matches the profile label, ignoring case and surrounding/repeated whitespace.
    pub fn parse(value: &str) -> Option<Self> {
        let wanted = collapse_whitespace(value);
        Self::ALL
            .into_iter()
            .find(|designation| designation.label().eq_ignore_ascii_case(&wanted))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Designation::NationalCoordinator => "National Coordinator",
            Designation::StateCoordinator => "State Coordinator",
            Designation::LgaCoordinator => "LGA Coordinator",
            Designation::WardCoordinator => "Ward Coordinator",
            Designation::PollingUnitAgent => "Polling Unit Agent",
            Designation::VoteDefender => "Vote Defender",
        }
    }

    pub fn level(&self) -> ScopeLevel {
        match self {
            Designation::NationalCoordinator => ScopeLevel::National,
            Designation::StateCoordinator => ScopeLevel::State,
            Designation::LgaCoordinator => ScopeLevel::Lga,
            Designation::WardCoordinator => ScopeLevel::Ward,
            Designation::PollingUnitAgent | Designation::VoteDefender => ScopeLevel::PollingUnit,
        }
    }
}

/// One level of the hierarchy: `code` is what authorization compares,
/// `label` keeps the casing the profile or payload used.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeComponent {
    pub code: String,
    pub label: String,
}

impl ScopeComponent {
    pub fn from_label(raw: &str) -> Option<Self> {
        let label = clean(raw)?;
        Some(Self {
            code: normalize_code(&label),
            label,
        })
    }

    /// Polling units carry a separate code; either side may be missing and is
    /// derived from the other, with the explicit code preferred.
    pub fn polling_unit(code: Option<&str>, label: Option<&str>) -> Option<Self> {
        let code = code.and_then(clean);
        let label = label.and_then(clean);
        match (code, label) {
            (Some(code), label) => Some(Self {
                code: normalize_code(&code),
                label: label.unwrap_or(code),
            }),
            (None, Some(label)) => Some(Self {
                code: normalize_code(&label),
                label,
            }),
            (None, None) => None,
        }
    }
}

/// Location attributes exactly as a profile or a payload carries them.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawLocation {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub lga: Option<String>,
    #[serde(default)]
    pub ward: Option<String>,
    #[serde(default)]
    pub polling_unit: Option<String>,
    #[serde(default)]
    pub polling_unit_code: Option<String>,
}

impl RawLocation {
    pub fn component(&self, field: ScopeField) -> Option<ScopeComponent> {
        match field {
            ScopeField::State => self.state.as_deref().and_then(ScopeComponent::from_label),
            ScopeField::Lga => self.lga.as_deref().and_then(ScopeComponent::from_label),
            ScopeField::Ward => self.ward.as_deref().and_then(ScopeComponent::from_label),
            ScopeField::PollingUnit => ScopeComponent::polling_unit(
                self.polling_unit_code.as_deref(),
                self.polling_unit.as_deref(),
            ),
        }
    }

    /// Fields the given level requires that this location does not carry,
    /// in hierarchy order.
    pub fn missing_for(&self, level: ScopeLevel) -> Vec<ScopeField> {
        level
            .required_fields()
            .iter()
            .copied()
            .filter(|field| self.component(*field).is_none())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        [
            ScopeField::State,
            ScopeField::Lga,
            ScopeField::Ward,
            ScopeField::PollingUnit,
        ]
        .into_iter()
        .all(|field| self.component(field).is_none())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitoringScope {
    pub level: ScopeLevel,
    pub designation: Designation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ScopeComponent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lga: Option<ScopeComponent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ward: Option<ScopeComponent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling_unit: Option<ScopeComponent>,
}

impl MonitoringScope {
    pub fn component(&self, field: ScopeField) -> Option<&ScopeComponent> {
        match field {
            ScopeField::State => self.state.as_ref(),
            ScopeField::Lga => self.lga.as_ref(),
            ScopeField::Ward => self.ward.as_ref(),
            ScopeField::PollingUnit => self.polling_unit.as_ref(),
        }
    }

    pub fn polling_unit_code(&self) -> Option<&str> {
        self.polling_unit.as_ref().map(|pu| pu.code.as_str())
    }

    /// Normalized comparison against the assigned polling unit. Scopes above
    /// polling-unit level have no unit and never match.
    pub fn covers_polling_unit(&self, code: &str) -> bool {
        self.polling_unit
            .as_ref()
            .is_some_and(|pu| pu.code == normalize_code(code))
    }

    /// Equality for authorization purposes: same level and same codes.
    pub fn same_jurisdiction(&self, other: &MonitoringScope) -> bool {
        fn codes(scope: &MonitoringScope) -> [Option<&str>; 4] {
            [
                scope.state.as_ref().map(|c| c.code.as_str()),
                scope.lga.as_ref().map(|c| c.code.as_str()),
                scope.ward.as_ref().map(|c| c.code.as_str()),
                scope.polling_unit.as_ref().map(|c| c.code.as_str()),
            ]
        }
        self.level == other.level && codes(self) == codes(other)
    }

    /// Snapshot for a stored submission: explicit payload location fields win,
    /// everything else falls back to this scope.
    pub fn overlay(&self, location: &RawLocation) -> MonitoringScope {
        let mut snapshot = self.clone();
        if let Some(state) = location.component(ScopeField::State) {
            snapshot.state = Some(state);
        }
        if let Some(lga) = location.component(ScopeField::Lga) {
            snapshot.lga = Some(lga);
        }
        if let Some(ward) = location.component(ScopeField::Ward) {
            snapshot.ward = Some(ward);
        }
        if let Some(polling_unit) = location.component(ScopeField::PollingUnit) {
            snapshot.polling_unit = Some(polling_unit);
        }
        snapshot
    }

    /// Level/field consistency: every field at or above the level is set,
    /// every field below it is absent.
    pub fn is_consistent(&self) -> bool {
        [
            ScopeField::State,
            ScopeField::Lga,
            ScopeField::Ward,
            ScopeField::PollingUnit,
        ]
        .into_iter()
        .all(|field| self.level.includes(field) == self.component(field).is_some())
            && self.designation.level() == self.level
    }
}

/// Resolves the scope for a designation and raw profile location.
pub fn resolve_scope(
    designation: Option<&str>,
    location: &RawLocation,
) -> DomainResult<MonitoringScope> {
    let raw = designation.unwrap_or_default();
    let designation =
        Designation::parse(raw).ok_or_else(|| DomainError::IneligibleDesignation {
            designation: collapse_whitespace(raw),
        })?;
    let level = designation.level();

    let mut scope = MonitoringScope {
        level,
        designation,
        state: None,
        lga: None,
        ward: None,
        polling_unit: None,
    };
    if level == ScopeLevel::National {
        return Ok(scope);
    }

    let missing = location.missing_for(level);
    if !missing.is_empty() {
        return Err(DomainError::MissingScopeData { level, missing });
    }

    let pick = |field: ScopeField| {
        if level.includes(field) {
            location.component(field)
        } else {
            None
        }
    };
    scope.state = pick(ScopeField::State);
    scope.lga = pick(ScopeField::Lga);
    scope.ward = pick(ScopeField::Ward);
    scope.polling_unit = pick(ScopeField::PollingUnit);
    Ok(scope)
}

/// Matching code: whitespace collapsed, trimmed, uppercased.
pub fn normalize_code(raw: &str) -> String {
    collapse_whitespace(raw).to_uppercase()
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean(raw: &str) -> Option<String> {
    let value = collapse_whitespace(raw);
    if value.is_empty() { None } else { Some(value) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lagos_agent_location() -> RawLocation {
        RawLocation {
            state: Some("Lagos".into()),
            lga: Some("Ikeja".into()),
            ward: Some("Ward 3".into()),
            polling_unit: Some("Ikeja Grammar School".into()),
            polling_unit_code: Some("PU-014".into()),
        }
    }

    #[test]
    fn polling_unit_agent_resolves_all_four_fields() {
        let scope = resolve_scope(Some("Polling Unit Agent"), &lagos_agent_location())
            .expect("scope");
        assert_eq!(scope.level, ScopeLevel::PollingUnit);
        assert_eq!(scope.state.as_ref().map(|c| c.code.as_str()), Some("LAGOS"));
        assert_eq!(scope.lga.as_ref().map(|c| c.label.as_str()), Some("Ikeja"));
        assert_eq!(scope.ward.as_ref().map(|c| c.code.as_str()), Some("WARD 3"));
        let pu = scope.polling_unit.as_ref().expect("polling unit");
        assert_eq!(pu.code, "PU-014");
        assert_eq!(pu.label, "Ikeja Grammar School");
        assert!(scope.is_consistent());
    }

    #[test]
    fn state_coordinator_drops_lower_fields() {
        let scope = resolve_scope(Some("State Coordinator"), &lagos_agent_location())
            .expect("scope");
        assert_eq!(scope.level, ScopeLevel::State);
        assert!(scope.state.is_some());
        assert!(scope.lga.is_none());
        assert!(scope.ward.is_none());
        assert!(scope.polling_unit.is_none());
        assert!(scope.is_consistent());
    }

    #[test]
    fn national_coordinator_skips_location_checks() {
        let scope = resolve_scope(Some("National Coordinator"), &RawLocation::default())
            .expect("scope");
        assert_eq!(scope.level, ScopeLevel::National);
        assert!(scope.is_consistent());
    }

    #[test]
    fn unknown_designation_is_ineligible() {
        let err = resolve_scope(Some("Volunteer"), &lagos_agent_location()).unwrap_err();
        assert_eq!(
            err,
            DomainError::IneligibleDesignation {
                designation: "Volunteer".into()
            }
        );
        let err = resolve_scope(None, &lagos_agent_location()).unwrap_err();
        assert!(matches!(err, DomainError::IneligibleDesignation { .. }));
    }

    #[test]
    fn missing_fields_are_all_reported() {
        let location = RawLocation {
            state: Some("Lagos".into()),
            lga: Some("   ".into()),
            ..RawLocation::default()
        };
        let err = resolve_scope(Some("Vote Defender"), &location).unwrap_err();
        assert_eq!(
            err,
            DomainError::MissingScopeData {
                level: ScopeLevel::PollingUnit,
                missing: vec![ScopeField::Lga, ScopeField::Ward, ScopeField::PollingUnit],
            }
        );
    }

    #[test]
    fn polling_unit_code_is_derived_from_label_when_absent() {
        let component = ScopeComponent::polling_unit(None, Some(" pu-014 ")).expect("component");
        assert_eq!(component.code, "PU-014");
        assert_eq!(component.label, "pu-014");

        let component = ScopeComponent::polling_unit(Some("pu 15"), None).expect("component");
        assert_eq!(component.code, "PU 15");
        assert_eq!(component.label, "pu 15");
    }

    #[test]
    fn designation_parse_ignores_case_and_spacing() {
        assert_eq!(
            Designation::parse("  lga   coordinator "),
            Some(Designation::LgaCoordinator)
        );
        assert_eq!(Designation::parse("Observer"), None);
    }

    #[test]
    fn overlay_prefers_payload_fields() {
        let scope = resolve_scope(Some("Polling Unit Agent"), &lagos_agent_location())
            .expect("scope");
        let snapshot = scope.overlay(&RawLocation {
            ward: Some("Ward Three".into()),
            ..RawLocation::default()
        });
        assert_eq!(snapshot.ward.as_ref().map(|c| c.label.as_str()), Some("Ward Three"));
        assert_eq!(snapshot.lga, scope.lga);
        assert_eq!(snapshot.polling_unit, scope.polling_unit);
    }

    #[test]
    fn covers_polling_unit_uses_normalized_codes() {
        let scope = resolve_scope(Some("Polling Unit Agent"), &lagos_agent_location())
            .expect("scope");
        assert!(scope.covers_polling_unit(" pu-014"));
        assert!(!scope.covers_polling_unit("PU-015"));

        let ward = resolve_scope(Some("Ward Coordinator"), &lagos_agent_location())
            .expect("scope");
        assert!(!ward.covers_polling_unit("PU-014"));
    }

    proptest! {
        #[test]
        fn normalize_code_is_idempotent(raw in "[ a-zA-Z0-9-]{0,24}") {
            let once = normalize_code(&raw);
            prop_assert_eq!(normalize_code(&once), once.clone());
            prop_assert!(!once.starts_with(' ') && !once.ends_with(' '));
            prop_assert!(!once.contains("  "));
        }

        #[test]
        fn case_and_spacing_do_not_change_the_code(raw in "[a-z0-9]{1,8}( [a-z0-9]{1,8}){0,2}") {
            let shouted = format!("  {}  ", raw.to_uppercase().replace(' ', "   "));
            prop_assert_eq!(normalize_code(&raw), normalize_code(&shouted));
        }
    }
}
