//! `prefect` watches every GitHub organization it is installed into and automatically requests
//! reviews on open pull requests from the collaborators most familiar with the changed code.
//!
//! The crate splits into the reviewer-selection engine ([`selection`], fed by [`gate`] and
//! memoized through [`cache`]), the per-organization event engine ([`service`]), and the GitHub
//! integration behind the [`github::gateway::GitHubGateway`] trait. The binary in `main.rs` wires
//! these together for either the long-lived service or a single-shot recommendation run.

pub mod cache;

pub mod config;

pub mod error;

pub mod gate;

pub mod github;

pub mod locator;

pub mod metadata;

pub mod model;

pub mod selection;

pub mod service;
