//! The reconciliation engine.
//!
//! A [`RepoReconciler`] tick observes the remote's refs, pairs each review
//! branch with its tracker and hands every pair to a [`BranchReconciler`],
//! which moves it one step through its lifecycle:
//!
//! ```text
//!   review pushed ──create──▶ ok ──accepted──▶ landed (branch + tracker deleted)
//!        │                    │ ▲
//!        ▼                    ▼ │ new commits
//!   bad_prereview        bad_inreview / bad_land
//! ```
//!
//! Nothing is kept between ticks; every decision is re-derived from refs and
//! the review service.

mod branch;
mod repo;

#[cfg(test)]
mod testing;

pub use branch::BranchReconciler;
pub use repo::{RepoReconciler, TickReport};

use std::fmt;

use crate::naming::TrackerStatus;
use crate::review::RevisionId;

/// Lines of context in diffs uploaded for review.
pub const DIFF_CONTEXT_LINES: u32 = 1000;

/// What processing a branch pair did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created(RevisionId),
    Updated(RevisionId),
    Landed(RevisionId),
    Abandoned,
    MarkedBad(TrackerStatus),
    Unchanged,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Created(id) => write!(f, "created D{id}"),
            Outcome::Updated(id) => write!(f, "updated D{id}"),
            Outcome::Landed(id) => write!(f, "landed D{id}"),
            Outcome::Abandoned => f.write_str("abandoned"),
            Outcome::MarkedBad(status) => write!(f, "marked {status}"),
            Outcome::Unchanged => f.write_str("unchanged"),
        }
    }
}
