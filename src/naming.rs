//! Branch naming schemes.
//!
//! Ref names are the only state arcyd owns, so every scheme here is a pure
//! mapping between names and the pieces they encode. A scheme recognises two
//! kinds of branch:
//!
//! - review branches, pushed by developers: `<review_prefix><description>/<base>`
//! - working branches (trackers), pushed by arcyd:
//!   `<working_prefix><status>/<description>/<base>/<revision_id>`
//!
//! Schemes are chained in a [`NamingChain`]; the first scheme that parses a
//! name wins.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::review::RevisionId;

/// Literal used in tracker names when no revision has been created.
pub const NO_REVISION: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Review,
    Working,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackerStatus {
    Ok,
    BadPrereview,
    BadInreview,
    BadLand,
}

impl TrackerStatus {
    pub const ALL: [TrackerStatus; 4] = [
        TrackerStatus::Ok,
        TrackerStatus::BadPrereview,
        TrackerStatus::BadInreview,
        TrackerStatus::BadLand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerStatus::Ok => "ok",
            TrackerStatus::BadPrereview => "bad_prereview",
            TrackerStatus::BadInreview => "bad_inreview",
            TrackerStatus::BadLand => "bad_land",
        }
    }
}

impl fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackerStatus {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrackerStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| NameError::UnknownStatus(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("'{0}' does not have this scheme's prefix")]
    WrongPrefix(String),

    #[error("'{0}' has too few path segments")]
    TooFewSegments(String),

    #[error("'{0}' has an empty path segment")]
    EmptySegment(String),

    #[error("unknown tracker status '{0}'")]
    UnknownStatus(String),

    #[error("invalid revision id '{0}'")]
    InvalidRevision(String),

    #[error("status '{status}' does not agree with revision '{revision}'")]
    StatusRevisionMismatch { status: TrackerStatus, revision: String },
}

/// A developer-owned branch asking for review of `description` against `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewBranch {
    pub name: String,
    pub description: String,
    pub base: String,
}

/// An arcyd-owned branch recording the review state of a [`ReviewBranch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingBranch {
    pub name: String,
    pub description: String,
    pub base: String,
    pub status: TrackerStatus,
    pub revision: Option<RevisionId>,
}

pub trait NamingScheme: Send + Sync {
    /// Short identifier used in config and logs.
    fn id(&self) -> &str;

    fn classify(&self, name: &str) -> RefKind;

    fn parse_review(&self, name: &str) -> Result<ReviewBranch, NameError>;

    fn parse_working(&self, name: &str) -> Result<WorkingBranch, NameError>;

    fn make_review(&self, description: &str, base: &str) -> String;

    fn make_working(
        &self,
        status: TrackerStatus,
        description: &str,
        base: &str,
        revision: Option<RevisionId>,
    ) -> String;

    /// Name of the review branch a tracker belongs to.
    fn review_name_for(&self, working: &WorkingBranch) -> String {
        self.make_review(&working.description, &working.base)
    }
}

/// `<review_prefix><description>/<base>` with trackers
/// `<working_prefix><status>/<description>/<base>/<revision>`.
#[derive(Debug, Clone)]
pub struct ClassicNaming {
    id: String,
    review_prefix: String,
    working_prefix: String,
}

impl ClassicNaming {
    pub fn new(id: &str, review_prefix: &str, working_prefix: &str) -> Self {
        Self {
            id: id.to_string(),
            review_prefix: review_prefix.to_string(),
            working_prefix: working_prefix.to_string(),
        }
    }

    /// `ph-review/` branches tracked under `dev/phab/`.
    pub fn phab() -> Self {
        Self::new("ph-review", "ph-review/", "dev/phab/")
    }

    /// `arcyd-review/` branches tracked under `dev/arcyd/`.
    pub fn arcyd() -> Self {
        Self::new("arcyd-review", "arcyd-review/", "dev/arcyd/")
    }
}

impl NamingScheme for ClassicNaming {
    fn id(&self) -> &str {
        &self.id
    }

    fn classify(&self, name: &str) -> RefKind {
        if name.starts_with(&self.review_prefix) {
            RefKind::Review
        } else if name.starts_with(&self.working_prefix) {
            RefKind::Working
        } else {
            RefKind::Other
        }
    }

    fn parse_review(&self, name: &str) -> Result<ReviewBranch, NameError> {
        let segments = segments_after(name, &self.review_prefix, 2)?;
        let (description, base) = segments.split_first().ok_or_else(|| too_few(name))?;

        Ok(ReviewBranch {
            name: name.to_string(),
            description: description.to_string(),
            base: base.join("/"),
        })
    }

    fn parse_working(&self, name: &str) -> Result<WorkingBranch, NameError> {
        let segments = segments_after(name, &self.working_prefix, 4)?;
        let (status, rest) = segments.split_first().ok_or_else(|| too_few(name))?;
        let (revision, middle) = rest.split_last().ok_or_else(|| too_few(name))?;
        let (description, base) = middle.split_first().ok_or_else(|| too_few(name))?;

        let status: TrackerStatus = status.parse()?;
        let revision = parse_revision(status, revision)?;

        Ok(WorkingBranch {
            name: name.to_string(),
            description: description.to_string(),
            base: base.join("/"),
            status,
            revision,
        })
    }

    fn make_review(&self, description: &str, base: &str) -> String {
        format!("{}{}/{}", self.review_prefix, description, base)
    }

    fn make_working(
        &self,
        status: TrackerStatus,
        description: &str,
        base: &str,
        revision: Option<RevisionId>,
    ) -> String {
        format!(
            "{}{}/{}/{}/{}",
            self.working_prefix,
            status,
            description,
            base,
            revision_text(revision)
        )
    }
}

/// `r/<base>/<description>` with trackers
/// `dev/arcyd/trackers/rbranch/--/-/<status>/<base>/<description>/<revision>`.
#[derive(Debug, Clone)]
pub struct RBranchNaming {
    review_prefix: String,
    working_prefix: String,
}

impl RBranchNaming {
    pub fn new() -> Self {
        Self {
            review_prefix: "r/".to_string(),
            working_prefix: "dev/arcyd/trackers/rbranch/--/-/".to_string(),
        }
    }
}

impl Default for RBranchNaming {
    fn default() -> Self {
        Self::new()
    }
}

impl NamingScheme for RBranchNaming {
    fn id(&self) -> &str {
        "rbranch"
    }

    fn classify(&self, name: &str) -> RefKind {
        if name.starts_with(&self.review_prefix) {
            RefKind::Review
        } else if name.starts_with(&self.working_prefix) {
            RefKind::Working
        } else {
            RefKind::Other
        }
    }

    fn parse_review(&self, name: &str) -> Result<ReviewBranch, NameError> {
        let segments = segments_after(name, &self.review_prefix, 2)?;
        let (description, base) = segments.split_last().ok_or_else(|| too_few(name))?;

        Ok(ReviewBranch {
            name: name.to_string(),
            description: description.to_string(),
            base: base.join("/"),
        })
    }

    fn parse_working(&self, name: &str) -> Result<WorkingBranch, NameError> {
        let segments = segments_after(name, &self.working_prefix, 4)?;
        let (status, rest) = segments.split_first().ok_or_else(|| too_few(name))?;
        let (revision, middle) = rest.split_last().ok_or_else(|| too_few(name))?;
        let (description, base) = middle.split_last().ok_or_else(|| too_few(name))?;

        let status: TrackerStatus = status.parse()?;
        let revision = parse_revision(status, revision)?;

        Ok(WorkingBranch {
            name: name.to_string(),
            description: description.to_string(),
            base: base.join("/"),
            status,
            revision,
        })
    }

    fn make_review(&self, description: &str, base: &str) -> String {
        format!("{}{}/{}", self.review_prefix, base, description)
    }

    fn make_working(
        &self,
        status: TrackerStatus,
        description: &str,
        base: &str,
        revision: Option<RevisionId>,
    ) -> String {
        format!(
            "{}{}/{}/{}/{}",
            self.working_prefix,
            status,
            base,
            description,
            revision_text(revision)
        )
    }
}

/// Scheme identifiers accepted in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemeKind {
    #[serde(rename = "ph-review")]
    PhReview,
    #[serde(rename = "arcyd-review")]
    ArcydReview,
    #[serde(rename = "rbranch")]
    RBranch,
}

impl SchemeKind {
    pub fn build(&self) -> Box<dyn NamingScheme> {
        match self {
            SchemeKind::PhReview => Box::new(ClassicNaming::phab()),
            SchemeKind::ArcydReview => Box::new(ClassicNaming::arcyd()),
            SchemeKind::RBranch => Box::new(RBranchNaming::new()),
        }
    }
}

impl FromStr for SchemeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ph-review" => Ok(SchemeKind::PhReview),
            "arcyd-review" => Ok(SchemeKind::ArcydReview),
            "rbranch" => Ok(SchemeKind::RBranch),
            other => Err(format!("unknown naming scheme '{other}'")),
        }
    }
}

/// Ordered list of schemes; the first one to accept a name owns it.
pub struct NamingChain {
    schemes: Vec<Box<dyn NamingScheme>>,
}

impl NamingChain {
    pub fn new(schemes: Vec<Box<dyn NamingScheme>>) -> Self {
        Self { schemes }
    }

    pub fn from_kinds(kinds: &[SchemeKind]) -> Self {
        Self::new(kinds.iter().map(SchemeKind::build).collect())
    }

    pub fn schemes(&self) -> &[Box<dyn NamingScheme>] {
        &self.schemes
    }

    pub fn classify(&self, name: &str) -> RefKind {
        self.schemes
            .iter()
            .map(|scheme| scheme.classify(name))
            .find(|kind| *kind != RefKind::Other)
            .unwrap_or(RefKind::Other)
    }

    /// The parsed review branch and the scheme that accepted it.
    pub fn parse_review(&self, name: &str) -> Option<(&dyn NamingScheme, ReviewBranch)> {
        self.schemes.iter().find_map(|scheme| {
            scheme
                .parse_review(name)
                .ok()
                .map(|branch| (scheme.as_ref(), branch))
        })
    }

    pub fn parse_working(&self, name: &str) -> Option<(&dyn NamingScheme, WorkingBranch)> {
        self.schemes.iter().find_map(|scheme| {
            scheme
                .parse_working(name)
                .ok()
                .map(|branch| (scheme.as_ref(), branch))
        })
    }
}

impl Default for NamingChain {
    fn default() -> Self {
        Self::from_kinds(&[
            SchemeKind::PhReview,
            SchemeKind::ArcydReview,
            SchemeKind::RBranch,
        ])
    }
}

fn segments_after<'a>(
    name: &'a str,
    prefix: &str,
    min_segments: usize,
) -> Result<Vec<&'a str>, NameError> {
    let rest = name
        .strip_prefix(prefix)
        .ok_or_else(|| NameError::WrongPrefix(name.to_string()))?;

    let segments: Vec<&str> = rest.split('/').collect();
    if segments.len() < min_segments {
        return Err(too_few(name));
    }
    if segments.iter().any(|s| s.is_empty()) {
        return Err(NameError::EmptySegment(name.to_string()));
    }

    Ok(segments)
}

fn too_few(name: &str) -> NameError {
    NameError::TooFewSegments(name.to_string())
}

fn parse_revision(status: TrackerStatus, text: &str) -> Result<Option<RevisionId>, NameError> {
    let revision = if text == NO_REVISION {
        None
    } else {
        let id = text
            .parse::<u64>()
            .map_err(|_| NameError::InvalidRevision(text.to_string()))?;
        Some(RevisionId(id))
    };

    // bad_prereview means nothing was created; every other status tracks one
    let consistent = match status {
        TrackerStatus::BadPrereview => revision.is_none(),
        _ => revision.is_some(),
    };
    if !consistent {
        return Err(NameError::StatusRevisionMismatch {
            status,
            revision: text.to_string(),
        });
    }

    Ok(revision)
}

fn revision_text(revision: Option<RevisionId>) -> String {
    revision
        .map(|id| id.to_string())
        .unwrap_or_else(|| NO_REVISION.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_review_round_trip() {
        let scheme = ClassicNaming::phab();
        let name = scheme.make_review("change", "release/1.0");
        assert_eq!(name, "ph-review/change/release/1.0");

        let branch = scheme.parse_review(&name).unwrap();
        assert_eq!(branch.description, "change");
        assert_eq!(branch.base, "release/1.0");
        assert_eq!(branch.name, name);
    }

    #[test]
    fn test_classic_working_round_trip() {
        let scheme = ClassicNaming::phab();
        for status in TrackerStatus::ALL {
            let revision = match status {
                TrackerStatus::BadPrereview => None,
                _ => Some(RevisionId(99)),
            };
            let name = scheme.make_working(status, "change", "feature/x", revision);
            let branch = scheme.parse_working(&name).unwrap();

            assert_eq!(branch.status, status);
            assert_eq!(branch.description, "change");
            assert_eq!(branch.base, "feature/x");
            assert_eq!(branch.revision, revision);
        }
    }

    #[test]
    fn test_classic_working_wire_format() {
        let scheme = ClassicNaming::phab();
        assert_eq!(
            scheme.make_working(TrackerStatus::Ok, "change", "master", Some(RevisionId(7))),
            "dev/phab/ok/change/master/7"
        );
        assert_eq!(
            scheme.make_working(TrackerStatus::BadPrereview, "change", "nonesuch", None),
            "dev/phab/bad_prereview/change/nonesuch/none"
        );
    }

    #[test]
    fn test_review_name_for_tracker() {
        let scheme = ClassicNaming::phab();
        let review = scheme.parse_review("ph-review/change/master").unwrap();
        let tracker_name =
            scheme.make_working(TrackerStatus::BadLand, &review.description, &review.base, Some(RevisionId(3)));
        let tracker = scheme.parse_working(&tracker_name).unwrap();

        assert_eq!(scheme.review_name_for(&tracker), review.name);
    }

    #[test]
    fn test_classic_rejects_malformed_names() {
        let scheme = ClassicNaming::phab();

        assert!(matches!(
            scheme.parse_review("ph-review/nobase"),
            Err(NameError::TooFewSegments(_))
        ));
        assert!(matches!(
            scheme.parse_review("ph-review//master"),
            Err(NameError::EmptySegment(_))
        ));
        assert!(matches!(
            scheme.parse_review("feature/x/master"),
            Err(NameError::WrongPrefix(_))
        ));
        assert!(matches!(
            scheme.parse_working("dev/phab/ok/change/7"),
            Err(NameError::TooFewSegments(_))
        ));
        assert!(matches!(
            scheme.parse_working("dev/phab/happy/change/master/7"),
            Err(NameError::UnknownStatus(_))
        ));
        assert!(matches!(
            scheme.parse_working("dev/phab/ok/change/master/D7"),
            Err(NameError::InvalidRevision(_))
        ));
    }

    #[test]
    fn test_status_and_revision_must_agree() {
        let scheme = ClassicNaming::phab();
        assert!(matches!(
            scheme.parse_working("dev/phab/ok/change/master/none"),
            Err(NameError::StatusRevisionMismatch { .. })
        ));
        assert!(matches!(
            scheme.parse_working("dev/phab/bad_prereview/change/master/12"),
            Err(NameError::StatusRevisionMismatch { .. })
        ));
    }

    #[test]
    fn test_rbranch_round_trip() {
        let scheme = RBranchNaming::new();
        let name = scheme.make_review("mywork", "release/2");
        assert_eq!(name, "r/release/2/mywork");

        let review = scheme.parse_review(&name).unwrap();
        assert_eq!(review.description, "mywork");
        assert_eq!(review.base, "release/2");

        let tracker_name =
            scheme.make_working(TrackerStatus::Ok, "mywork", "release/2", Some(RevisionId(99)));
        assert_eq!(
            tracker_name,
            "dev/arcyd/trackers/rbranch/--/-/ok/release/2/mywork/99"
        );

        let tracker = scheme.parse_working(&tracker_name).unwrap();
        assert_eq!(tracker.base, "release/2");
        assert_eq!(tracker.description, "mywork");
        assert_eq!(scheme.review_name_for(&tracker), name);
    }

    #[test]
    fn test_classify() {
        let chain = NamingChain::default();
        assert_eq!(chain.classify("ph-review/x/master"), RefKind::Review);
        assert_eq!(chain.classify("arcyd-review/x/master"), RefKind::Review);
        assert_eq!(chain.classify("r/master/x"), RefKind::Review);
        assert_eq!(chain.classify("dev/phab/ok/x/master/1"), RefKind::Working);
        assert_eq!(
            chain.classify("dev/arcyd/trackers/rbranch/--/-/ok/master/x/1"),
            RefKind::Working
        );
        assert_eq!(chain.classify("master"), RefKind::Other);
        assert_eq!(chain.classify("feature/ph-review/x"), RefKind::Other);
    }

    #[test]
    fn test_chain_first_parse_wins() {
        let chain = NamingChain::default();

        let (scheme, branch) = chain.parse_review("arcyd-review/x/master").unwrap();
        assert_eq!(scheme.id(), "arcyd-review");
        assert_eq!(branch.base, "master");

        // the rbranch tracker prefix sits under dev/arcyd/ but must not be
        // mistaken for a classic arcyd tracker
        let (scheme, tracker) = chain
            .parse_working("dev/arcyd/trackers/rbranch/--/-/ok/master/x/1")
            .unwrap();
        assert_eq!(scheme.id(), "rbranch");
        assert_eq!(tracker.description, "x");

        assert!(chain.parse_review("master").is_none());
    }

    #[test]
    fn test_scheme_kind_from_str() {
        assert_eq!("rbranch".parse::<SchemeKind>(), Ok(SchemeKind::RBranch));
        assert!("gerrit".parse::<SchemeKind>().is_err());
    }
}
