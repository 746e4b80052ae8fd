//! GitHub's wrappers & miscellaneous utilities. Everything ranging from the [`GitHubGateway`](gateway::GitHubGateway)
//! capability trait consumed by the selection and scheduling engines, to its *opinionated* live
//! implementation ([`GitHubClient`](client::GitHubClient)) with GitHub-App installation
//! authentication and a push-event subscription client, is found in this module.

pub mod app;

pub mod client;

pub mod events;

pub mod gateway;

pub mod json;
