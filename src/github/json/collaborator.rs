use serde::Deserialize;

/// Custom wrapper for one entry of `GET repos/{owner}/{repo}/collaborators`.
#[derive(Debug, Clone, Deserialize)]
pub struct Collaborator {
    pub login: String,
    #[serde(rename = "type", default)]
    pub user_type: String,
    #[serde(default)]
    pub permissions: Permissions,
}

/// Permission flags as reported per collaborator. `push` is the "write access" bit; admins carry
/// it too, so filtering on `push` keeps admin and write collaborators uniformly.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub pull: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub admin: bool,
}
