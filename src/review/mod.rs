//! The review service arcyd drives: Differential, reached over Conduit.
//!
//! The engine only ever talks to [`ReviewService`]; [`conduit::ConduitReviewService`]
//! is the real implementation and [`mock::MockReviewService`] an in-memory one
//! for tests.

pub mod conduit;
pub mod mock;

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};

use crate::message::MessageFields;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RevisionId(pub u64);

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiffId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionStatus {
    NeedsReview,
    NeedsRevision,
    Accepted,
    Closed,
    Abandoned,
}

impl RevisionStatus {
    /// Differential's numeric status codes.
    pub fn from_code(code: u64) -> Result<Self> {
        Ok(match code {
            0 => RevisionStatus::NeedsReview,
            1 => RevisionStatus::NeedsRevision,
            2 => RevisionStatus::Accepted,
            3 => RevisionStatus::Closed,
            4 => RevisionStatus::Abandoned,
            other => bail!("unknown revision status code {other}"),
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionStatus::NeedsReview => "needs_review",
            RevisionStatus::NeedsRevision => "needs_revision",
            RevisionStatus::Accepted => "accepted",
            RevisionStatus::Closed => "closed",
            RevisionStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for RevisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevisionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "needs_review" => RevisionStatus::NeedsReview,
            "needs_revision" => RevisionStatus::NeedsRevision,
            "accepted" => RevisionStatus::Accepted,
            "closed" => RevisionStatus::Closed,
            "abandoned" => RevisionStatus::Abandoned,
            other => bail!("unknown revision status '{other}'"),
        })
    }
}

/// A revision as the review service reports it; people are usernames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: RevisionId,
    pub status: RevisionStatus,
    pub author: String,
    pub title: String,
    pub summary: String,
    pub test_plan: String,
    pub reviewers: Vec<String>,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRevision {
    pub id: RevisionId,
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    pub fields: MessageFields,
    pub errors: Vec<String>,
}

/// Actions a comment can carry alongside its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentAction {
    /// "Plan changes": the author moves the revision back to needs-revision.
    Rethink,
}

impl CommentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentAction::Rethink => "rethink",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommentOptions {
    pub action: Option<CommentAction>,
    /// Don't send email to reviewers.
    pub silent: bool,
}

impl CommentOptions {
    pub fn silent() -> Self {
        Self {
            action: None,
            silent: true,
        }
    }

    pub fn loud() -> Self {
        Self::default()
    }

    pub fn action(action: CommentAction) -> Self {
        Self {
            action: Some(action),
            silent: false,
        }
    }
}

/// Operations arcyd needs from the review service.
///
/// Calls are made as the bot user unless wrapped in [`ReviewService::act_as_user`].
pub trait ReviewService {
    fn create_raw_diff(&self, diff: &str) -> Result<DiffId>;

    /// `partial` parses only the fields present and reports malformed ones;
    /// otherwise required fields that are missing are errors too.
    fn parse_commit_message(&self, text: &str, partial: bool) -> Result<ParsedMessage>;

    fn create_revision(&self, diff: DiffId, fields: &MessageFields) -> Result<CreatedRevision>;

    fn update_revision(
        &self,
        id: RevisionId,
        diff: DiffId,
        fields: &MessageFields,
        message: &str,
    ) -> Result<()>;

    fn create_comment(&self, id: RevisionId, message: &str, options: CommentOptions) -> Result<()>;

    fn query(&self, ids: &[RevisionId]) -> Result<Vec<Revision>>;

    fn commit_message(&self, id: RevisionId) -> Result<String>;

    fn close(&self, id: RevisionId) -> Result<()>;

    /// Username for each email, `None` where there is no such user.
    fn query_users_from_emails(&self, emails: &[String]) -> Result<Vec<Option<String>>>;

    /// Username for each PHID, `None` where it isn't a user (a project, say).
    fn query_usernames_from_phids(&self, phids: &[String]) -> Result<Vec<Option<String>>>;

    /// A handle whose calls appear to come from `user`.
    fn as_user(&self, user: &str) -> Self
    where
        Self: Sized;

    fn act_as_user<T, F>(&self, user: &str, f: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&Self) -> Result<T>,
    {
        let scoped = self.as_user(user);
        f(&scoped)
    }

    fn revision(&self, id: RevisionId) -> Result<Revision> {
        match self.query(&[id])?.into_iter().find(|r| r.id == id) {
            Some(revision) => Ok(revision),
            None => bail!("revision {id} not found"),
        }
    }

    fn revision_status(&self, id: RevisionId) -> Result<RevisionStatus> {
        Ok(self.revision(id)?.status)
    }
}
