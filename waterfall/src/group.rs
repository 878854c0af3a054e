//! Join-all barrier for the concurrent units of one transfer.

use std::future::Future;

use tokio::task::JoinSet;
use tracing::debug;

use crate::{Error, Result};

/// Runs a fixed set of units concurrently and reports the first failure.
///
/// [`wait`](Self::wait) returns only after every unit has terminated, even
/// when one failed early. Failures are ranked by completion order; later
/// ones are logged and dropped.
///
/// Dropping a group without waiting aborts its async units. Blocking units
/// cannot be aborted and run to completion on their own thread, so every
/// blocking unit must own a pipe end whose peer is owned by another unit.
#[derive(Debug, Default)]
pub struct TaskGroup {
    /// Launched units.
    units: JoinSet<Result<()>>,
}

impl TaskGroup {
    /// Creates an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Launches an async unit.
    pub fn spawn<F>(&mut self, unit: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.units.spawn(unit);
    }

    /// Launches a unit on the blocking thread pool.
    pub fn spawn_blocking<F>(&mut self, unit: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.units.spawn_blocking(unit);
    }

    /// Waits for every unit and returns the first failure, if any.
    pub async fn wait(mut self) -> Result<()> {
        let mut first: Option<Error> = None;
        let mut dropped = 0usize;

        while let Some(joined) = self.units.join_next().await {
            let outcome = joined.map_err(Error::from).and_then(|r| r);
            if let Err(e) = outcome {
                if first.is_none() {
                    first = Some(e);
                } else {
                    dropped += 1;
                    debug!(error = %e, "dropping secondary transfer error");
                }
            }
        }

        match first {
            Some(e) => {
                if dropped > 0 {
                    debug!(dropped, "reported first of several transfer errors");
                }
                Err(e)
            }
            None => Ok(()),
        }
    }
}
