//! Candidate reviewers and the per-source score bookkeeping behind their ranking.

use std::collections::{BTreeMap, HashMap};

use itertools::Itertools;
use strum_macros::{Display, EnumIter};

/// Enumeration of every signal that can contribute weight to a candidate. The serialized names
/// surface verbatim in logs and in the single-shot CLI's "selection method" column.
#[derive(Display, EnumIter, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignalSource {
    #[strum(serialize = "assignee")]
    Assignee,
    #[strum(serialize = "file-author")]
    FileAuthor,
    #[strum(serialize = "file-merger")]
    FileMerger,
    #[strum(serialize = "file-reviewer")]
    FileReviewer,
    #[strum(serialize = "line-author")]
    LineAuthor,
    #[strum(serialize = "line-reviewer")]
    LineReviewer,
    #[strum(serialize = "line-merger")]
    LineMerger,
    #[strum(serialize = "recent-merger")]
    RecentMerger,
    #[strum(serialize = "recent-reviewer")]
    RecentReviewer,
    #[strum(serialize = "dir-author")]
    DirAuthor,
    #[strum(serialize = "dir-reviewer")]
    DirReviewer,
    #[strum(serialize = "small-team")]
    SmallTeam,
}

/// One candidate reviewer with their accumulated evidence.
///
/// Weight is always the sum of the per-source contributions; the workload penalty is capped at
/// half the weight, so the final score can never go negative.
#[derive(Debug, Clone)]
pub struct Candidate {
    username: String,
    scores: BTreeMap<SignalSource, u32>,
    penalty: u32,
}

impl Candidate {
    pub fn new(username: &str) -> Self {
        Candidate {
            username: username.to_string(),
            scores: BTreeMap::new(),
            penalty: 0,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Adds `amount` under `source`. Zero contributions are not recorded.
    pub fn credit(&mut self, source: SignalSource, amount: u32) {
        if amount == 0 {
            return;
        }
        *self.scores.entry(source).or_insert(0) += amount;
    }

    /// Total accumulated weight across all sources.
    pub fn weight(&self) -> u32 {
        self.scores.values().sum()
    }

    pub fn penalty(&self) -> u32 {
        self.penalty
    }

    /// Applies the workload penalty for `open_prs` currently-open authored PRs: 10 points each,
    /// clamped so the penalty never exceeds half the accumulated weight.
    pub fn apply_workload_penalty(&mut self, open_prs: u32) {
        let raw_penalty = open_prs.saturating_mul(10);
        self.penalty = raw_penalty.min(self.weight() / 2);
    }

    pub fn final_score(&self) -> u32 {
        self.weight() - self.penalty
    }

    pub fn breakdown(&self) -> &BTreeMap<SignalSource, u32> {
        &self.scores
    }

    /// Human-readable account of how this candidate was selected, eg.
    /// `file-merger:+20, line-author:+5, workload:-10`.
    pub fn selection_method(&self) -> String {
        let mut parts: Vec<String> =
            self.scores.iter().map(|(source, amount)| format!("{}:+{}", source, amount)).collect();

        if self.penalty > 0 {
            parts.push(format!("workload:-{}", self.penalty));
        }

        parts.iter().join(", ")
    }
}

/// Accumulator mapping usernames to candidates, with the PR author permanently excluded.
pub struct CandidateSet {
    excluded_author: String,
    candidates: HashMap<String, Candidate>,
}

impl CandidateSet {
    pub fn new(author: &str) -> Self {
        CandidateSet {
            excluded_author: author.to_string(),
            candidates: HashMap::new(),
        }
    }

    /// Credits `username` with `amount` under `source`; silently drops the PR author and
    /// nameless attributions.
    pub fn credit(&mut self, username: &str, source: SignalSource, amount: u32) {
        if username.is_empty() || username == self.excluded_author || amount == 0 {
            return;
        }

        self.candidates
            .entry(username.to_string())
            .or_insert_with(|| Candidate::new(username))
            .credit(source, amount);
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn into_candidates(self) -> Vec<Candidate> {
        self.candidates.into_iter().map(|(_, candidate)| candidate).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn weight_is_the_sum_of_all_sources() {
        let mut candidate = Candidate::new("wile");
        candidate.credit(SignalSource::FileAuthor, 12);
        candidate.credit(SignalSource::FileAuthor, 3);
        candidate.credit(SignalSource::RecentMerger, 50);

        assert_eq!(candidate.weight(), 65);
        assert_eq!(candidate.breakdown().values().sum::<u32>(), candidate.weight());
    }

    #[test]
    fn penalty_is_clamped_to_half_the_weight() {
        let mut candidate = Candidate::new("wile");
        candidate.credit(SignalSource::Assignee, 200);

        candidate.apply_workload_penalty(3);
        assert_eq!(candidate.penalty(), 30);
        assert_eq!(candidate.final_score(), 170);

        candidate.apply_workload_penalty(50); // raw penalty 500, clamped to 100
        assert_eq!(candidate.penalty(), 100);
        assert_eq!(candidate.final_score(), 100);
    }

    #[test]
    fn zero_open_prs_pay_no_penalty() {
        let mut candidate = Candidate::new("wile");
        candidate.credit(SignalSource::LineAuthor, 8);
        candidate.apply_workload_penalty(0);

        assert_eq!(candidate.penalty(), 0);
        assert_eq!(candidate.final_score(), 8);
    }

    #[test]
    fn selection_method_lists_sources_and_penalty() {
        let mut candidate = Candidate::new("wile");
        candidate.credit(SignalSource::FileMerger, 20);
        candidate.credit(SignalSource::LineAuthor, 5);
        candidate.apply_workload_penalty(1);

        assert_eq!(candidate.selection_method(), "file-merger:+20, line-author:+5, workload:-10");
    }

    #[test]
    fn the_author_never_enters_the_set() {
        let mut set = CandidateSet::new("wile");
        set.credit("wile", SignalSource::Assignee, 200);
        set.credit("wile", SignalSource::FileAuthor, 10);
        set.credit("road", SignalSource::FileAuthor, 10);
        set.credit("", SignalSource::FileAuthor, 10);

        let candidates = set.into_candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].username(), "road");
    }

    #[test]
    fn every_source_has_a_wire_name() {
        for source in SignalSource::iter() {
            assert!(!source.to_string().is_empty());
        }
    }
}
