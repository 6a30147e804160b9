//! Template variable store and macro expander.
//!
//! Template tags call into a shared [`Stash`] engine with a per-request
//! [`RequestContext`]. Values live in request memory and, for `user` and
//! `site` scope, in a persistent gateway behind [`VariablesRepo`].

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;

pub use application::Stash;
pub use application::host::{ParseHook, TemplateHost};
pub use application::repos::VariablesRepo;
pub use application::request::{RequestContext, RequestInfo};
