//! Core of a reverse proxy and load balancer: the upstream pool, the three
//! balancing policies, passive health checking, and path-check matching.
//!
//! This crate has no HTTP server or admin wire protocol of its own — those
//! live in the binary crate that embeds it. What's here is meant to be
//! usable on its own: construct a [`ServerGroup`], populate it with
//! [`Server`]s, and call [`ServerGroup::select`] on the request path.

pub mod balancer;
pub mod error;
mod health;
pub mod path_match;
pub mod server;
pub mod server_group;

pub use balancer::{BalancerKind, LoadBalancer};
pub use error::{ProxyError, Result};
pub use path_match::PathMatcher;
pub use server::Server;
pub use server_group::{ServerGroup, ServerSnapshot};
