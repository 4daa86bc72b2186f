// One tick over one repository.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::{BranchReconciler, Outcome};
use crate::daemon::CancelToken;
use crate::naming::{NamingChain, NamingScheme, RefKind, ReviewBranch, WorkingBranch};
use crate::notify::Notifier;
use crate::pair::BranchPair;
use crate::repo::Repo;
use crate::review::ReviewService;

/// What a tick saw and did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Review branch name and what happened to it, in processing order.
    pub outcomes: Vec<(String, Outcome)>,
    /// Names under a review or tracker prefix that didn't parse.
    pub bad_names: Vec<String>,
    /// Duplicate trackers deleted this tick.
    pub duplicates_removed: Vec<String>,
    /// The tick stopped early because shutdown was requested.
    pub cancelled: bool,
}

impl TickReport {
    pub fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

type Tracked<'n, T> = (&'n dyn NamingScheme, T);

pub struct RepoReconciler<'a, S: ReviewService> {
    repo: &'a dyn Repo,
    service: &'a S,
    notifier: &'a dyn Notifier,
    naming: &'a NamingChain,
    cancel: Option<&'a CancelToken>,
}

impl<'a, S: ReviewService> RepoReconciler<'a, S> {
    pub fn new(
        repo: &'a dyn Repo,
        service: &'a S,
        notifier: &'a dyn Notifier,
        naming: &'a NamingChain,
    ) -> Self {
        Self {
            repo,
            service,
            notifier,
            naming,
            cancel: None,
        }
    }

    /// Stop before the next branch once `cancel` fires.
    pub fn with_cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(CancelToken::is_cancelled)
    }

    pub fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        self.repo
            .fetch_prune()
            .context("Failed to fetch from remote")?;
        let names = self
            .repo
            .list_remote_refs()
            .context("Failed to list remote branches")?;

        let mut reviews: BTreeMap<String, Tracked<'a, ReviewBranch>> = BTreeMap::new();
        let mut trackers: BTreeMap<String, Tracked<'a, WorkingBranch>> = BTreeMap::new();

        for name in names {
            match self.naming.classify(&name) {
                RefKind::Other => {}
                RefKind::Review => match self.naming.parse_review(&name) {
                    Some((scheme, review)) => {
                        reviews.insert(name, (scheme, review));
                    }
                    None => {
                        warn!(branch = %name, "ignoring badly named review branch");
                        report.bad_names.push(name);
                    }
                },
                RefKind::Working => match self.naming.parse_working(&name) {
                    Some((scheme, working)) => {
                        let key = scheme.review_name_for(&working);
                        if let Some(removed) = self.add_tracker(&mut trackers, key, scheme, working)? {
                            report.duplicates_removed.push(removed);
                        }
                    }
                    None => {
                        warn!(branch = %name, "ignoring badly named tracker");
                        report.bad_names.push(name);
                    }
                },
            }
        }

        debug!(
            reviews = reviews.len(),
            trackers = trackers.len(),
            "partitioned remote branches"
        );

        // orphans first, their review branches are gone
        let orphans: Vec<String> = trackers
            .keys()
            .filter(|key| !reviews.contains_key(*key))
            .cloned()
            .collect();

        for key in orphans {
            if self.cancelled() {
                report.cancelled = true;
                return Ok(report);
            }
            if let Some((scheme, working)) = trackers.remove(&key) {
                let mut pair = BranchPair::new(scheme, self.repo.remote(), None, Some(working));
                let outcome = self.process(&mut pair)?;
                report.outcomes.push((key, outcome));
            }
        }

        for (name, (scheme, review)) in reviews {
            if self.cancelled() {
                report.cancelled = true;
                return Ok(report);
            }
            let working = trackers.remove(&name).map(|(_, working)| working);
            let mut pair = BranchPair::new(scheme, self.repo.remote(), Some(review), working);
            let outcome = self.process(&mut pair)?;
            report.outcomes.push((name, outcome));
        }

        Ok(report)
    }

    fn process(&self, pair: &mut BranchPair<'_>) -> Result<Outcome> {
        let reconciler = BranchReconciler::new(self.repo, self.service, self.notifier);
        let outcome = reconciler
            .process(pair)
            .with_context(|| format!("Failed to process {}", pair.review_name()))?;

        if outcome != Outcome::Unchanged {
            info!(branch = %pair.review_name(), %outcome, "processed branch");
        }
        Ok(outcome)
    }

    /// Keep one tracker per review branch. Prefers one that names a revision,
    /// otherwise the first seen; the loser is deleted from the remote and its
    /// name returned.
    fn add_tracker(
        &self,
        trackers: &mut BTreeMap<String, Tracked<'a, WorkingBranch>>,
        key: String,
        scheme: &'a dyn NamingScheme,
        working: WorkingBranch,
    ) -> Result<Option<String>> {
        let Some((_, existing)) = trackers.get(&key) else {
            trackers.insert(key, (scheme, working));
            return Ok(None);
        };

        let loser = if existing.revision.is_none() && working.revision.is_some() {
            let loser = existing.name.clone();
            trackers.insert(key.clone(), (scheme, working));
            loser
        } else {
            working.name
        };

        warn!(branch = %key, tracker = %loser, "deleting duplicate tracker");
        self.repo
            .delete_remote(&loser)
            .with_context(|| format!("Failed to delete duplicate tracker {loser}"))?;
        Ok(Some(loser))
    }
}
