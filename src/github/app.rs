//! GitHub-App authentication: the short-lived RS256 app JWT, installation discovery, and the
//! per-organization installation-token vault.
//!
//! Installation tokens live for one hour; the vault hands out a cached token until five minutes
//! before its expiry, after which the next caller mints a fresh one. The single-shot CLI can run
//! on a plain personal access token instead, which skips all of this.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use log::{debug, info, trace};
use serde::Serialize;

use crate::error::AssignError;
use crate::github::json::installation::{AccessTokenJson, InstallationJson};
use crate::model::Installation;
use crate::nested;

const API_BASE: &str = "https://api.github.com";

/// App JWTs may live up to ten minutes; nine keeps a margin against clock skew on our side,
/// and backdating `iat` one minute guards against skew on GitHub's side.
const JWT_LIFETIME_MINUTES: i64 = 9;
const JWT_BACKDATE_MINUTES: i64 = 1;

/// Tokens still valid for less than this are treated as expired and re-minted.
const TOKEN_EXPIRY_BUFFER_MINUTES: i64 = 5;

#[derive(Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

struct MintedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Where the process gets its GitHub credentials from.
pub enum TokenSource {
    /// A GitHub App installation (service mode).
    App(AppAuthenticator),
    /// A personal access token (single-shot mode).
    Personal(String),
}

impl TokenSource {
    /// An API credential valid for operations under `org`.
    pub async fn token_for(&self, org: &str) -> Result<String, AssignError> {
        match self {
            TokenSource::App(authenticator) => authenticator.token_for(org).await,
            TokenSource::Personal(token) => Ok(token.clone()),
        }
    }

    /// Every organization the App is installed into. Empty under a personal token, which has no
    /// installation concept.
    pub async fn installations(&self) -> Result<Vec<Installation>, AssignError> {
        match self {
            TokenSource::App(authenticator) => authenticator.installations().await,
            TokenSource::Personal(_) => Ok(Vec::new()),
        }
    }
}

/// Holder of the App's signing key and the per-organization token vault.
pub struct AppAuthenticator {
    app_id: u64,
    encoding_key: EncodingKey,
    http: reqwest::Client,
    tokens: RwLock<HashMap<String, MintedToken>>,
}

impl AppAuthenticator {
    /// Builds an authenticator from the App id and its RS256 private key in PEM form.
    pub fn new(
        app_id: u64, private_key_pem: &[u8], http: reqwest::Client,
    ) -> Result<Self, AssignError> {
        let encoding_key =
            EncodingKey::from_rsa_pem(private_key_pem).map_err(|e| AssignError::AuthError {
                msg: format!("Could not load the App's private key for app id [{}].", app_id),
                nested: nested!(e),
            })?;

        Ok(AppAuthenticator {
            app_id,
            encoding_key,
            http,
            tokens: RwLock::new(HashMap::new()),
        })
    }

    /// Mints the short-lived app JWT used against the `/app/*` endpoints.
    fn app_jwt(&self) -> Result<String, AssignError> {
        let now = Utc::now();
        let claims = AppClaims {
            iat: (now - Duration::minutes(JWT_BACKDATE_MINUTES)).timestamp(),
            exp: (now + Duration::minutes(JWT_LIFETIME_MINUTES)).timestamp(),
            iss: self.app_id.to_string(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| AssignError::AuthError {
                msg: format!("Could not sign the app JWT for app id [{}].", self.app_id),
                nested: nested!(e),
            })
    }

    /// Lists every installation of the App, page by page.
    pub async fn installations(&self) -> Result<Vec<Installation>, AssignError> {
        let jwt = self.app_jwt()?;
        let mut installations: Vec<Installation> = Vec::new();

        for page in 1u32.. {
            let url = format!("{}/app/installations?per_page=100&page={}", API_BASE, page);
            let batch: Vec<InstallationJson> = self.get_as_app(&url, &jwt).await?;
            let batch_len = batch.len();

            installations.extend(batch.into_iter().map(|installation| Installation {
                id: installation.id,
                org: installation.account.login,
            }));

            if batch_len < 100 {
                break;
            }
        }

        debug!("Found [{}] installations for app id [{}].", installations.len(), self.app_id);
        Ok(installations)
    }

    /// A valid installation token for `org`, re-minted once the cached one nears expiry.
    pub async fn token_for(&self, org: &str) -> Result<String, AssignError> {
        {
            let tokens = self.tokens.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(minted) = tokens.get(org) {
                let remaining = minted.expires_at - Utc::now();
                if remaining > Duration::minutes(TOKEN_EXPIRY_BUFFER_MINUTES) {
                    trace!(
                        "Reusing installation token for [{}] ({}s left).",
                        org,
                        remaining.num_seconds()
                    );
                    return Ok(minted.token.clone());
                }
            }
        }

        let installation_id = self
            .installations()
            .await?
            .into_iter()
            .find(|installation| installation.org.eq_ignore_ascii_case(org))
            .map(|installation| installation.id)
            .ok_or_else(|| AssignError::InstallationNotFound(org.to_string()))?;

        let jwt = self.app_jwt()?;
        let url = format!("{}/app/installations/{}/access_tokens", API_BASE, installation_id);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&jwt)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| AssignError::AuthError {
                msg: format!("Error minting installation token for [{}] in [{}].", org, url),
                nested: nested!(e),
            })?;

        if !response.status().is_success() {
            return Err(AssignError::AuthError {
                msg: format!("Token mint for [{}] rejected in [{}].", org, url),
                nested: anyhow::anyhow!("HTTP status {}", response.status()),
            });
        }

        let minted: AccessTokenJson = response.json().await.map_err(|e| {
            AssignError::JsonParseError {
                msg: format!("Error mapping installation-token JSON for [{}].", org),
                nested: nested!(e),
            }
        })?;

        info!(
            "Minted installation token for [{}] (expires at [{}]).",
            org, minted.expires_at
        );

        let token = minted.token.clone();
        self.tokens
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                org.to_string(),
                MintedToken {
                    token: minted.token,
                    expires_at: minted.expires_at,
                },
            );

        Ok(token)
    }

    async fn get_as_app<T: serde::de::DeserializeOwned>(
        &self, url: &str, jwt: &str,
    ) -> Result<T, AssignError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(jwt)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| AssignError::GitHubAPIError {
                msg: format!("Error calling app endpoint [{}].", url),
                nested: nested!(e),
            })?;

        if !response.status().is_success() {
            return Err(AssignError::AuthError {
                msg: format!("App endpoint [{}] rejected the app JWT.", url),
                nested: anyhow::anyhow!("HTTP status {}", response.status()),
            });
        }

        let raw_response_text =
            response.text().await.map_err(|e| AssignError::GitHubAPIResponseBodyError {
                msg: format!("Error retrieving body from app endpoint [{}].", url),
                nested: nested!(e),
            })?;

        serde_json::from_str(&raw_response_text).map_err(|e| {
            trace!("Raw response = {}", raw_response_text);
            AssignError::JsonParseError {
                msg: format!("Error mapping JSON from app endpoint [{}].", url),
                nested: nested!(e),
            }
        })
    }
}
