//! The reviewer-selection engine: candidate accumulation, unified-diff arithmetic, historical
//! GraphQL queries, and the weighted ranking algorithm tying them together.

pub mod candidate;

pub mod history;

pub mod patch;

pub mod selector;
