use serde::{Deserialize, Serialize};

/// Role claim carried by the caller's token. Designations (field tiers) are a
/// separate concept held on the profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Anonymous,
    User,
    Moderator,
    Admin,
    System,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anonymous" | "guest" => Some(Role::Anonymous),
            "user" | "member" | "agent" => Some(Role::User),
            "moderator" => Some(Role::Moderator),
            "admin" | "super_admin" => Some(Role::Admin),
            "system" => Some(Role::System),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Anonymous => "anonymous",
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
            Role::System => "system",
        }
    }

    /// Issuing a credential on behalf of another user and running the
    /// backfill sweep are admin actions.
    pub fn can_manage_credentials(&self) -> bool {
        matches!(self, Role::Admin | Role::System)
    }
}
