use serde::Deserialize;

/// Custom wrapper for GitHub's issue-search response (`GET search/issues`), which is also the
/// listing surface for open pull requests across an organization.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResults {
    pub total_count: u64,
    #[serde(default)]
    pub incomplete_results: bool,
    #[serde(default)]
    pub items: Vec<SearchIssue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchIssue {
    pub number: u64,
    /// Shaped like `https://api.github.com/repos/{owner}/{repo}`.
    pub repository_url: String,
}

impl SearchIssue {
    /// Extracts `(owner, repo)` from the `repository_url` field.
    pub fn owner_and_repo(&self) -> Option<(String, String)> {
        let mut segments = self.repository_url.rsplit('/');
        let repo = segments.next()?.to_string();
        let owner = segments.next()?.to_string();

        if owner.is_empty() || repo.is_empty() {
            return None;
        }
        Some((owner, repo))
    }
}
