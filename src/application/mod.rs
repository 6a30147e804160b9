//! Application layer: request state, the variable store, expansion and the
//! verb dispatch behind [`Stash`].

pub mod engine;
pub mod error;
pub mod expander;
pub mod host;
mod lists;
pub mod repos;
pub mod request;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod tag;
pub mod verb;
mod verbs;

pub use engine::Stash;
