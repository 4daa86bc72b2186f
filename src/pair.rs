//! A review branch and its tracker, as observed in one tick.

use std::fmt;

use crate::naming::{NamingScheme, ReviewBranch, TrackerStatus, WorkingBranch};
use crate::review::RevisionId;

/// Where a pair is in its lifecycle, judged from names alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    /// Review branch with no tracker yet.
    New,
    /// Tracker whose review branch is gone.
    Abandoned,
    Tracked(TrackerStatus),
}

impl fmt::Display for PairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairState::New => f.write_str("new"),
            PairState::Abandoned => f.write_str("abandoned"),
            PairState::Tracked(status) => write!(f, "{status}"),
        }
    }
}

pub struct BranchPair<'s> {
    scheme: &'s dyn NamingScheme,
    remote: String,
    review: Option<ReviewBranch>,
    working: Option<WorkingBranch>,
}

impl<'s> BranchPair<'s> {
    /// At least one of `review` and `working` is expected to be present.
    pub fn new(
        scheme: &'s dyn NamingScheme,
        remote: &str,
        review: Option<ReviewBranch>,
        working: Option<WorkingBranch>,
    ) -> Self {
        Self {
            scheme,
            remote: remote.to_string(),
            review,
            working,
        }
    }

    pub fn review(&self) -> Option<&ReviewBranch> {
        self.review.as_ref()
    }

    pub fn working(&self) -> Option<&WorkingBranch> {
        self.working.as_ref()
    }

    pub fn state(&self) -> PairState {
        match (&self.review, &self.working) {
            (Some(_), Some(working)) => PairState::Tracked(working.status),
            (None, Some(_)) => PairState::Abandoned,
            _ => PairState::New,
        }
    }

    pub fn revision(&self) -> Option<RevisionId> {
        self.working.as_ref().and_then(|w| w.revision)
    }

    pub fn description(&self) -> &str {
        match (&self.review, &self.working) {
            (Some(review), _) => &review.description,
            (None, Some(working)) => &working.description,
            (None, None) => "",
        }
    }

    pub fn base(&self) -> &str {
        match (&self.review, &self.working) {
            (Some(review), _) => &review.base,
            (None, Some(working)) => &working.base,
            (None, None) => "",
        }
    }

    /// The review branch name, whether or not the branch still exists.
    pub fn review_name(&self) -> String {
        match (&self.review, &self.working) {
            (Some(review), _) => review.name.clone(),
            (None, Some(working)) => self.scheme.review_name_for(working),
            (None, None) => String::new(),
        }
    }

    /// Tracker name this pair would have with `status` and `revision`.
    pub fn working_name(&self, status: TrackerStatus, revision: Option<RevisionId>) -> String {
        self.scheme
            .make_working(status, self.description(), self.base(), revision)
    }

    fn remote_ref(&self, branch: &str) -> String {
        format!("refs/remotes/{}/{}", self.remote, branch)
    }

    pub fn review_ref(&self) -> String {
        self.remote_ref(&self.review_name())
    }

    pub fn base_ref(&self) -> String {
        self.remote_ref(self.base())
    }

    pub fn working_ref(&self) -> Option<String> {
        self.working.as_ref().map(|w| self.remote_ref(&w.name))
    }

    /// Record the tracker as it now is on the remote.
    pub fn set_working(&mut self, status: TrackerStatus, revision: Option<RevisionId>) {
        let working = WorkingBranch {
            name: self.working_name(status, revision),
            description: self.description().to_string(),
            base: self.base().to_string(),
            status,
            revision,
        };
        self.working = Some(working);
    }

    pub fn clear_working(&mut self) {
        self.working = None;
    }

    pub fn clear_review(&mut self) {
        self.review = None;
    }
}

impl fmt::Display for BranchPair<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.review_name(), self.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::{ClassicNaming, RBranchNaming};

    fn review(scheme: &dyn NamingScheme) -> ReviewBranch {
        scheme.parse_review(&scheme.make_review("change", "release/1.0")).unwrap()
    }

    #[test]
    fn test_state() {
        let scheme = ClassicNaming::phab();
        let tracker = scheme
            .parse_working("dev/phab/bad_land/change/release/1.0/4")
            .unwrap();

        let new = BranchPair::new(&scheme, "origin", Some(review(&scheme)), None);
        assert_eq!(new.state(), PairState::New);

        let orphan = BranchPair::new(&scheme, "origin", None, Some(tracker.clone()));
        assert_eq!(orphan.state(), PairState::Abandoned);
        assert_eq!(orphan.revision(), Some(RevisionId(4)));

        let tracked = BranchPair::new(&scheme, "origin", Some(review(&scheme)), Some(tracker));
        assert_eq!(tracked.state(), PairState::Tracked(TrackerStatus::BadLand));
    }

    #[test]
    fn test_refs() {
        let scheme = ClassicNaming::phab();
        let pair = BranchPair::new(&scheme, "upstream", Some(review(&scheme)), None);

        assert_eq!(
            pair.review_ref(),
            "refs/remotes/upstream/ph-review/change/release/1.0"
        );
        assert_eq!(pair.base_ref(), "refs/remotes/upstream/release/1.0");
        assert_eq!(pair.working_ref(), None);
    }

    #[test]
    fn test_orphan_knows_its_review_name() {
        let scheme = RBranchNaming::new();
        let tracker = scheme
            .parse_working(&scheme.make_working(
                TrackerStatus::Ok,
                "change",
                "master",
                Some(RevisionId(2)),
            ))
            .unwrap();

        let pair = BranchPair::new(&scheme, "origin", None, Some(tracker));
        assert_eq!(pair.review_name(), "r/master/change");
        assert_eq!(pair.review_ref(), "refs/remotes/origin/r/master/change");
    }

    #[test]
    fn test_set_working_renames() {
        let scheme = ClassicNaming::phab();
        let mut pair = BranchPair::new(&scheme, "origin", Some(review(&scheme)), None);

        pair.set_working(TrackerStatus::BadPrereview, None);
        assert_eq!(
            pair.working().map(|w| w.name.as_str()),
            Some("dev/phab/bad_prereview/change/release/1.0/none")
        );

        pair.set_working(TrackerStatus::Ok, Some(RevisionId(9)));
        assert_eq!(pair.state(), PairState::Tracked(TrackerStatus::Ok));
        assert_eq!(
            pair.working_ref().as_deref(),
            Some("refs/remotes/origin/dev/phab/ok/change/release/1.0/9")
        );
    }
}
