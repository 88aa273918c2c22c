use serde::{Deserialize, Serialize};

use crate::credentials::{CredentialStatus, MonitorCredential};
use crate::scope::RawLocation;

/// The authenticated caller of a request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub user_id: String,
}

impl ActorIdentity {
    pub fn with_user_id(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// A user as the profile service stores them. Absent attributes are `None`;
/// nothing here is validated until scope resolution.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Principal {
    pub user_id: String,
    #[serde(default)]
    pub designation: Option<String>,
    #[serde(default)]
    pub location: RawLocation,
    #[serde(default)]
    pub monitor_credential: Option<MonitorCredential>,
}

impl Principal {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn active_credential(&self) -> Option<&MonitorCredential> {
        self.monitor_credential
            .as_ref()
            .filter(|credential| credential.status == CredentialStatus::Active)
    }
}
