use serde::{Deserialize, Serialize};

/// Display snapshot of a user as supplied by the identity provider.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    #[serde(default, rename = "avatar_url", skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

impl UserProfile {
    pub fn new(id: &str, display_name: &str, avatar_ref: Option<&str>) -> Self {
        UserProfile {
            id: id.to_string(),
            display_name: display_name.to_string(),
            avatar_ref: avatar_ref.map(str::to_string),
        }
    }

    /// Snapshot used when the identity provider has no record for the user.
    pub fn fallback(user_id: &str) -> Self {
        UserProfile::new(user_id, user_id, None)
    }
}
