//! A universal, project-wide error wrapper that is also able to retain the nested cause of an [`Error`](std::error::Error).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssignError {
    // :# prints causes as well using anyhow's default formatting of causes
    #[error("Authentication error: {msg}; nested = {nested:#?}")]
    AuthError {
        msg: String,
        #[source]
        nested: anyhow::Error,
    },
    #[error("Configuration error = {0}")]
    ConfigError(String),
    #[error("Event stream error for [{org}]: {msg}")]
    EventStreamError {
        org: String,
        msg: String,
    },
    #[error("GitHub API error: {msg}; nested = {nested:#?}")]
    GitHubAPIError {
        msg: String,
        #[source]
        nested: anyhow::Error,
    },
    #[error("GitHub API response body error: {msg}; nested = {nested:#?}")]
    GitHubAPIResponseBodyError {
        msg: String,
        #[source]
        nested: anyhow::Error,
    },
    #[error("GraphQL error: {0}")]
    GraphQLError(String),
    #[error("No installation found for organization [{0}]")]
    InstallationNotFound(String),
    #[error("JSON parse error: {msg}; nested = {nested:#?}")]
    JsonParseError {
        msg: String,
        #[source]
        nested: anyhow::Error,
    },
    #[error("Unrecognized pull-request reference [{0}]")]
    LocatorParseError(String),
    #[error(
        "Could not retrieve PR#[{pr_number}] for repository [{repo_name}]; nested = {nested:#?}"
    )]
    PullRequestNotFound {
        repo_name: String,
        pr_number: u64,
        #[source]
        nested: anyhow::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[macro_export]
/// Wraps a dynamic error type into an [`anyhow::Error`]. Useful in a plethora of cases for constructing
/// [`AssignError`]s.
macro_rules! nested {
    ($source:expr) => {
        anyhow::Error::new($source)
    };
}
