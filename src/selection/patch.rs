//! Unified-diff arithmetic: added-line counts and target-side line ranges, straight off the
//! `@@ -a,b +c,d @@` hunk markers.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref HUNK_MARKER: Regex =
        Regex::new(r"(?m)^@@ -[0-9]+(?:,[0-9]+)? \+([0-9]+)(?:,([0-9]+))? @@").unwrap();
}

/// An inclusive range of line numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    pub fn new(start: u32, end: u32) -> Self {
        LineRange { start, end }
    }

    pub fn len(&self) -> u32 {
        if self.end < self.start {
            return 0;
        }
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many lines this range shares with `other`.
    pub fn overlap(&self, other: &LineRange) -> u32 {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);

        if end < start {
            return 0;
        }
        end - start + 1
    }
}

/// The number of added lines in a unified-diff patch: lines beginning with `+` but not `+++`.
pub fn added_line_count(patch: &str) -> u32 {
    patch
        .lines()
        .filter(|line| line.starts_with('+') && !line.starts_with("+++"))
        .count() as u32
}

/// The target-side line ranges a patch touches, one per hunk. A hunk marker `@@ -a,b +c,d @@`
/// covers target lines `c..=c+d-1`; a missing `,d` means a single line, and `d = 0` (pure
/// deletion) yields no range.
pub fn changed_ranges(patch: &str) -> Vec<LineRange> {
    HUNK_MARKER
        .captures_iter(patch)
        .filter_map(|captures| {
            let start: u32 = captures[1].parse().ok()?;
            let length: u32 = match captures.get(2) {
                Some(raw) => raw.as_str().parse().ok()?,
                None => 1,
            };

            if length == 0 {
                return None;
            }
            Some(LineRange::new(start, start + length - 1))
        })
        .collect()
}

/// Total overlap between one range and a set of (disjoint) hunk ranges.
pub fn total_overlap(range: &LineRange, hunks: &[LineRange]) -> u32 {
    hunks.iter().map(|hunk| range.overlap(hunk)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATCH: &str = "@@ -10,4 +10,8 @@ fn ignite()\n \
                         context\n\
                         -old line\n\
                         +new line one\n\
                         +new line two\n\
                         +new line three\n\
                         +++ not a real addition marker inside content\n \
                         trailing context\n\
                         @@ -40 +44 @@\n\
                         -gone\n\
                         +replacement\n";

    #[test]
    fn added_lines_exclude_file_headers() {
        let patch = "--- a/engine.rs\n+++ b/engine.rs\n@@ -1,2 +1,3 @@\n+one\n+two\n-three\n";
        assert_eq!(added_line_count(patch), 2);
    }

    #[test]
    fn added_lines_count_across_hunks() {
        assert_eq!(added_line_count(PATCH), 4);
    }

    #[test]
    fn ranges_come_from_hunk_markers() {
        let ranges = changed_ranges(PATCH);
        assert_eq!(ranges, vec![LineRange::new(10, 17), LineRange::new(44, 44)]);
    }

    #[test]
    fn pure_deletion_hunks_yield_no_range() {
        let patch = "@@ -5,3 +4,0 @@\n-a\n-b\n-c\n";
        assert!(changed_ranges(patch).is_empty());
    }

    #[test]
    fn empty_patches_yield_nothing() {
        assert_eq!(added_line_count(""), 0);
        assert!(changed_ranges("").is_empty());
    }

    #[test]
    fn overlap_arithmetic() {
        let range = LineRange::new(10, 17);
        assert_eq!(range.overlap(&LineRange::new(1, 9)), 0);
        assert_eq!(range.overlap(&LineRange::new(1, 10)), 1);
        assert_eq!(range.overlap(&LineRange::new(12, 14)), 3);
        assert_eq!(range.overlap(&LineRange::new(16, 40)), 2);
        assert_eq!(range.len(), 8);

        let hunks = vec![LineRange::new(1, 10), LineRange::new(16, 40)];
        assert_eq!(total_overlap(&range, &hunks), 3);
    }
}
