use serde::Deserialize;

/// Custom wrapper for a GitHub account reference.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct User {
    pub login: String,
    /// `"User"`, `"Organization"` or `"Bot"`.
    #[serde(rename = "type", default)]
    pub user_type: String,
}
