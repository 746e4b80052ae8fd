//! GraphQL documents for the historical signals (file history, blame, recent merges, directory
//! history) and the pure parsers turning their responses into [`model`](crate::model) records.
//!
//! Parsing is deliberately tolerant: the blame/history graphs routinely contain deleted users,
//! commits with no associated PR, and PRs with no recorded merger; every absent field degrades
//! to an empty attribution instead of an error.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::model::HistoricalPullRequest;
use crate::selection::patch::LineRange;

/// Most-recent pull requests that touched one path on the default branch.
pub const FILE_HISTORY_QUERY: &str = r#"
query FileHistory($owner: String!, $name: String!, $path: String!, $limit: Int!) {
  repository(owner: $owner, name: $name) {
    defaultBranchRef {
      target {
        ... on Commit {
          history(first: $limit, path: $path) {
            nodes {
              author { user { login } }
              associatedPullRequests(first: 1) {
                nodes {
                  number
                  mergedAt
                  author { login }
                  mergedBy { login }
                  reviews(first: 10, states: APPROVED) { nodes { author { login } } }
                }
              }
            }
          }
        }
      }
    }
  }
}"#;

/// Per-line attribution of one path on the default branch.
pub const BLAME_QUERY: &str = r#"
query FileBlame($owner: String!, $name: String!, $path: String!) {
  repository(owner: $owner, name: $name) {
    defaultBranchRef {
      target {
        ... on Commit {
          blame(path: $path) {
            ranges {
              startingLine
              endingLine
              commit {
                author { user { login } }
                associatedPullRequests(first: 1) {
                  nodes {
                    number
                    mergedAt
                    author { login }
                    mergedBy { login }
                    reviews(first: 10, states: APPROVED) { nodes { author { login } } }
                  }
                }
              }
            }
          }
        }
      }
    }
  }
}"#;

/// One page of the repository's most recently created merged pull requests.
pub const RECENT_MERGED_QUERY: &str = r#"
query RecentMerged($owner: String!, $name: String!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    pullRequests(states: MERGED, first: 100, after: $cursor,
                 orderBy: {field: CREATED_AT, direction: DESC}) {
      pageInfo { hasNextPage endCursor }
      nodes {
        number
        mergedAt
        author { login }
        mergedBy { login }
        reviews(first: 10, states: APPROVED) { nodes { author { login } } }
      }
    }
  }
}"#;

/// A blame range plus whatever attribution the host could associate with it.
#[derive(Debug, Clone)]
pub struct BlameRange {
    pub range: LineRange,
    pub pull: Option<HistoricalPullRequest>,
    /// Fallback attribution for ranges whose commit has no associated PR.
    pub commit_author: String,
}

/// An entry of a path's commit history: the associated PR when one exists, otherwise just the
/// commit author.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub pull: Option<HistoricalPullRequest>,
    pub commit_author: String,
}

fn login_at(node: &Value, pointer: &str) -> String {
    node.pointer(pointer).and_then(|value| value.as_str()).unwrap_or_default().to_string()
}

/// Maps one GraphQL pull-request node into a [`HistoricalPullRequest`].
fn pull_from_node(node: &Value) -> Option<HistoricalPullRequest> {
    let number = node.get("number")?.as_u64()?;

    let merged_at: Option<DateTime<Utc>> = node
        .get("mergedAt")
        .and_then(|value| value.as_str())
        .and_then(|raw| raw.parse().ok());

    let approvers = node
        .pointer("/reviews/nodes")
        .and_then(|nodes| nodes.as_array())
        .map(|nodes| {
            nodes
                .iter()
                .map(|review| login_at(review, "/author/login"))
                .filter(|login| !login.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Some(HistoricalPullRequest {
        number,
        author: login_at(node, "/author/login"),
        merger: login_at(node, "/mergedBy/login"),
        approvers,
        merged_at,
        attributed_lines: 0,
    })
}

/// The first associated PR of a commit node, if any.
fn pull_from_commit(commit: &Value) -> Option<HistoricalPullRequest> {
    commit
        .pointer("/associatedPullRequests/nodes")
        .and_then(|nodes| nodes.as_array())
        .and_then(|nodes| nodes.first())
        .and_then(pull_from_node)
}

/// Parses a [`FILE_HISTORY_QUERY`] response. Commits mapping to the same PR collapse into one
/// entry; commits without a PR keep their commit author as the attribution.
pub fn parse_file_history(data: &Value) -> Vec<HistoryEntry> {
    let nodes = match data
        .pointer("/repository/defaultBranchRef/target/history/nodes")
        .and_then(|nodes| nodes.as_array())
    {
        Some(nodes) => nodes,
        None => return Vec::new(),
    };

    let mut seen_pulls: Vec<u64> = Vec::new();
    let mut entries: Vec<HistoryEntry> = Vec::new();

    for node in nodes {
        let commit_author = login_at(node, "/author/user/login");
        let pull = pull_from_commit(node);

        if let Some(pull) = &pull {
            if seen_pulls.contains(&pull.number) {
                continue;
            }
            seen_pulls.push(pull.number);
        }

        entries.push(HistoryEntry {
            pull,
            commit_author,
        });
    }

    entries
}

/// Parses a [`BLAME_QUERY`] response into attribution ranges.
pub fn parse_blame(data: &Value) -> Vec<BlameRange> {
    let ranges = match data
        .pointer("/repository/defaultBranchRef/target/blame/ranges")
        .and_then(|ranges| ranges.as_array())
    {
        Some(ranges) => ranges,
        None => return Vec::new(),
    };

    ranges
        .iter()
        .filter_map(|range| {
            let start = range.get("startingLine")?.as_u64()? as u32;
            let end = range.get("endingLine")?.as_u64()? as u32;
            let commit = range.get("commit")?;

            Some(BlameRange {
                range: LineRange::new(start, end),
                pull: pull_from_commit(commit),
                commit_author: login_at(commit, "/author/user/login"),
            })
        })
        .collect()
}

/// Parses one [`RECENT_MERGED_QUERY`] page into its pull requests and the cursor for the next
/// page, if the host reports one.
pub fn parse_recent_merged(data: &Value) -> (Vec<HistoricalPullRequest>, Option<String>) {
    let connection = match data.pointer("/repository/pullRequests") {
        Some(connection) => connection,
        None => return (Vec::new(), None),
    };

    let pulls = connection
        .pointer("/nodes")
        .and_then(|nodes| nodes.as_array())
        .map(|nodes| nodes.iter().filter_map(pull_from_node).collect())
        .unwrap_or_default();

    let has_next = connection
        .pointer("/pageInfo/hasNextPage")
        .and_then(|value| value.as_bool())
        .unwrap_or(false);

    let cursor = if has_next {
        connection
            .pointer("/pageInfo/endCursor")
            .and_then(|value| value.as_str())
            .map(|cursor| cursor.to_string())
    } else {
        None
    };

    (pulls, cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pull_node(number: u64, author: &str, merger: &str, approvers: &[&str]) -> Value {
        json!({
            "number": number,
            "mergedAt": "2021-05-01T10:00:00Z",
            "author": { "login": author },
            "mergedBy": { "login": merger },
            "reviews": { "nodes": approvers
                .iter()
                .map(|approver| json!({ "author": { "login": approver } }))
                .collect::<Vec<Value>>() }
        })
    }

    #[test]
    fn file_history_collapses_commits_of_the_same_pull() {
        let data = json!({
            "repository": { "defaultBranchRef": { "target": { "history": { "nodes": [
                {
                    "author": { "user": { "login": "wile" } },
                    "associatedPullRequests": { "nodes": [pull_node(7, "wile", "road", &["tweety"])] }
                },
                {
                    "author": { "user": { "login": "wile" } },
                    "associatedPullRequests": { "nodes": [pull_node(7, "wile", "road", &["tweety"])] }
                },
                {
                    "author": { "user": { "login": "granny" } },
                    "associatedPullRequests": { "nodes": [] }
                }
            ] } } } }
        });

        let entries = parse_file_history(&data);
        assert_eq!(entries.len(), 2);

        let pull = entries[0].pull.as_ref().unwrap();
        assert_eq!(pull.number, 7);
        assert_eq!(pull.author, "wile");
        assert_eq!(pull.merger, "road");
        assert_eq!(pull.approvers, vec!["tweety".to_string()]);

        assert!(entries[1].pull.is_none());
        assert_eq!(entries[1].commit_author, "granny");
    }

    #[test]
    fn blame_ranges_parse_with_and_without_pulls() {
        let data = json!({
            "repository": { "defaultBranchRef": { "target": { "blame": { "ranges": [
                {
                    "startingLine": 10,
                    "endingLine": 17,
                    "commit": {
                        "author": { "user": { "login": "wile" } },
                        "associatedPullRequests": { "nodes": [pull_node(7, "wile", "road", &[])] }
                    }
                },
                {
                    "startingLine": 30,
                    "endingLine": 31,
                    "commit": {
                        "author": { "user": { "login": "granny" } },
                        "associatedPullRequests": { "nodes": [] }
                    }
                }
            ] } } } }
        });

        let ranges = parse_blame(&data);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].range, LineRange::new(10, 17));
        assert_eq!(ranges[0].pull.as_ref().unwrap().number, 7);
        assert!(ranges[1].pull.is_none());
        assert_eq!(ranges[1].commit_author, "granny");
    }

    #[test]
    fn recent_merged_reports_the_next_cursor_only_when_paging_continues() {
        let data = json!({
            "repository": { "pullRequests": {
                "pageInfo": { "hasNextPage": true, "endCursor": "abc" },
                "nodes": [pull_node(1, "wile", "road", &[]), pull_node(2, "road", "wile", &[])]
            } }
        });

        let (pulls, cursor) = parse_recent_merged(&data);
        assert_eq!(pulls.len(), 2);
        assert_eq!(cursor, Some("abc".to_string()));

        let done = json!({
            "repository": { "pullRequests": {
                "pageInfo": { "hasNextPage": false, "endCursor": "abc" },
                "nodes": []
            } }
        });
        let (pulls, cursor) = parse_recent_merged(&done);
        assert!(pulls.is_empty());
        assert!(cursor.is_none());
    }

    #[test]
    fn deleted_users_degrade_to_empty_attributions() {
        let data = json!({
            "repository": { "defaultBranchRef": { "target": { "history": { "nodes": [
                {
                    "author": { "user": null },
                    "associatedPullRequests": { "nodes": [ {
                        "number": 9,
                        "mergedAt": null,
                        "author": null,
                        "mergedBy": null,
                        "reviews": { "nodes": [] }
                    } ] }
                }
            ] } } } }
        });

        let entries = parse_file_history(&data);
        assert_eq!(entries.len(), 1);
        let pull = entries[0].pull.as_ref().unwrap();
        assert_eq!(pull.author, "");
        assert_eq!(pull.merger, "");
        assert!(pull.merged_at.is_none());
    }
}
