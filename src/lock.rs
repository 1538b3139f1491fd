//! Run Lock Manager - token-based mutual exclusion on runs
//!
//! A client locks a run, receives a fresh random token and must present it
//! on every write. The lock is advisory for reads and mandatory at the write
//! boundary.
//!
//! These functions mutate a `&mut Run`; callers hold the experiment's write
//! guard for the whole check-and-set, which makes each operation atomic.

use tracing::{info, warn};
use uuid::Uuid;

use crate::experiment::Run;
use crate::{Error, Result};

/// Token issuer and checker for runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunLockManager {
    unprotected: bool,
}

impl RunLockManager {
    /// Create a lock manager. `unprotected` lets `lock` replace existing tokens.
    #[must_use]
    pub const fn new(unprotected: bool) -> Self {
        Self { unprotected }
    }

    /// Whether the manager runs in unprotected (development) mode.
    #[must_use]
    pub const fn is_unprotected(&self) -> bool {
        self.unprotected
    }

    /// Lock `run` and return the new token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RunAlreadyLocked`] if the run holds a token, unless
    /// the manager is unprotected.
    pub fn lock(&self, experiment_id: &str, run: &mut Run) -> Result<String> {
        if run.is_locked() {
            if !self.unprotected {
                return Err(Error::RunAlreadyLocked {
                    experiment: experiment_id.to_string(),
                    run: run.id().to_string(),
                });
            }
            warn!(
                experiment = experiment_id,
                run = run.id(),
                "unprotected runs: replacing existing lock token"
            );
        }
        let token = Uuid::new_v4().to_string();
        run.replace_token(Some(token.clone()));
        info!(experiment = experiment_id, run = run.id(), "run locked");
        Ok(token)
    }

    /// Release the lock on `run`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RunNotLocked`] or [`Error::WrongToken`]; the token is
    /// left untouched on failure.
    pub fn unlock(&self, experiment_id: &str, run: &mut Run, token: &str) -> Result<()> {
        self.check_write(experiment_id, run, token)?;
        run.replace_token(None);
        info!(experiment = experiment_id, run = run.id(), "run unlocked");
        Ok(())
    }

    /// Verify that `token` grants write access to `run`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RunNotLocked`] if the run has no token and
    /// [`Error::WrongToken`] if `token` differs from it.
    pub fn check_write(&self, experiment_id: &str, run: &Run, token: &str) -> Result<()> {
        match run.token() {
            None => Err(Error::RunNotLocked {
                experiment: experiment_id.to_string(),
                run: run.id().to_string(),
            }),
            Some(current) if current != token => Err(Error::WrongToken {
                run: run.id().to_string(),
                token: token.to_string(),
            }),
            Some(_) => Ok(()),
        }
    }

    /// Clear the token without checking it. Administrative only.
    pub fn force_unlock(&self, experiment_id: &str, run: &mut Run) -> Option<String> {
        let previous = run.replace_token(None);
        if previous.is_some() {
            warn!(experiment = experiment_id, run = run.id(), "run force-unlocked");
        }
        previous
    }
}
