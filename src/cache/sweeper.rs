//! Background expiry sweep.
//!
//! Complements the per-request probabilistic gate: when an interval is
//! configured, a task prunes expired keys on a fixed cadence. Expiry stays
//! eventual either way.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::application::repos::{RepoError, VariablesRepo};

const SOURCE: &str = "stash::cache::sweeper";

#[derive(Clone)]
pub struct Sweeper {
    repo: Arc<dyn VariablesRepo>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(repo: Arc<dyn VariablesRepo>, interval: Duration) -> Self {
        Self { repo, interval }
    }

    /// Prune once, returning the number of removed keys.
    pub async fn sweep_once(&self) -> Result<u64, RepoError> {
        let removed = self.repo.prune_expired(OffsetDateTime::now_utc()).await?;
        counter!("stash_prune_total", "source" => "sweeper").increment(1);
        debug!(target = SOURCE, removed, "expired keys pruned");
        Ok(removed)
    }

    /// Run [`Self::sweep_once`] every interval until the handle is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.tick().await; // Skip the first immediate tick
            loop {
                interval.tick().await;
                if let Err(err) = self.sweep_once().await {
                    warn!(target = SOURCE, error = %err, "expiry sweep failed");
                }
            }
        })
    }
}
