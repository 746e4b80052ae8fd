use serde::Deserialize;

use crate::model::{ChangedFile, FileStatus};

/// Custom wrapper for one entry of `GET repos/{owner}/{repo}/pulls/{n}/files`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangedFileJson {
    pub filename: String,
    #[serde(default)]
    pub additions: u32,
    #[serde(default)]
    pub deletions: u32,
    #[serde(default)]
    pub status: String,
    /// Absent for binary files and for patches the host deems too large to inline.
    #[serde(default)]
    pub patch: Option<String>,
}

impl ChangedFileJson {
    pub fn into_model(self) -> ChangedFile {
        ChangedFile {
            status: FileStatus::parse(&self.status),
            filename: self.filename,
            additions: self.additions,
            deletions: self.deletions,
            patch: self.patch.unwrap_or_default(),
        }
    }
}
