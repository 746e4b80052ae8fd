use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Custom wrapper for `GET repos/{owner}/{repo}/commits/{sha}`, trimmed to the commit dates the
/// eligibility gate needs.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitJson {
    pub commit: CommitDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitDetail {
    #[serde(default)]
    pub author: Option<GitActor>,
    #[serde(default)]
    pub committer: Option<GitActor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitActor {
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

impl CommitJson {
    /// The commit timestamp, preferring the committer's clock over the author's.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.commit
            .committer
            .as_ref()
            .and_then(|actor| actor.date)
            .or_else(|| self.commit.author.as_ref().and_then(|actor| actor.date))
    }
}
