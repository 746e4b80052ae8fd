//! Parsing of pull-request references, in either their full-URL or `owner/repo#number` shorthand
//! forms.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::AssignError;

lazy_static! {
    static ref FULL_URL_PATTERN: Regex =
        Regex::new(r"^(?:https?://)?github\.com/([^/\s#]+)/([^/\s#]+)/pull/([0-9]+)/?$").unwrap();
    static ref SHORTHAND_PATTERN: Regex =
        Regex::new(r"^([^/\s#]+)/([^/\s#]+)#([0-9]+)$").unwrap();
}

/// The identity of a pull request: owner, repository and number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrLocator {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PrLocator {
    pub fn new(owner: &str, repo: &str, number: u64) -> Self {
        PrLocator {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number,
        }
    }
}

impl FromStr for PrLocator {
    type Err = AssignError;

    fn from_str(reference: &str) -> Result<Self, Self::Err> {
        let captures = FULL_URL_PATTERN
            .captures(reference.trim())
            .or_else(|| SHORTHAND_PATTERN.captures(reference.trim()))
            .ok_or_else(|| AssignError::LocatorParseError(reference.to_string()))?;

        // the number group is all-digits by construction, but may still overflow a u64
        let number: u64 = captures[3]
            .parse()
            .map_err(|_| AssignError::LocatorParseError(reference.to_string()))?;

        Ok(PrLocator {
            owner: captures[1].to_string(),
            repo: captures[2].to_string(),
            number,
        })
    }
}

impl Display for PrLocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}
