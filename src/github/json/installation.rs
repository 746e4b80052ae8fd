use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Custom wrapper for one entry of `GET app/installations`.
#[derive(Debug, Clone, Deserialize)]
pub struct InstallationJson {
    pub id: u64,
    pub account: Account,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub login: String,
    #[serde(rename = "type", default)]
    pub account_type: String,
}

/// Custom wrapper for the response of `POST app/installations/{id}/access_tokens`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessTokenJson {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}
