//! Canned Differential comments for each thing arcyd does to a revision.
//!
//! Routine transitions are posted silently so reviewers aren't mailed for
//! them; failures are posted loudly. Bodies are remarkup.

use anyhow::Result;
use tracing::debug;

use crate::error::UserError;
use crate::review::{CommentOptions, ReviewService, RevisionId};

pub struct Commenter<'a, S: ReviewService> {
    service: &'a S,
    revision: RevisionId,
}

impl<'a, S: ReviewService> Commenter<'a, S> {
    pub fn new(service: &'a S, revision: RevisionId) -> Self {
        Self { service, revision }
    }

    fn post(&self, message: &str, options: CommentOptions) -> Result<()> {
        debug!(revision = %self.revision, silent = options.silent, "posting comment");
        self.service.create_comment(self.revision, message, options)
    }

    pub fn created_review(&self, branch: &str, base: &str) -> Result<()> {
        self.post(
            &format!(
                "(arcyd) created this review from branch `{branch}`.\n\n\
                 Once accepted it will be landed onto `{base}`."
            ),
            CommentOptions::silent(),
        )
    }

    pub fn updated_review(&self, branch: &str) -> Result<()> {
        self.post(
            &format!("(arcyd) updated this review from branch `{branch}`."),
            CommentOptions::silent(),
        )
    }

    pub fn landed_review(&self, branch: &str, base: &str, merge_output: &str) -> Result<()> {
        let mut message = format!("(arcyd) landed branch `{branch}` onto `{base}`.");
        if !merge_output.trim().is_empty() {
            message.push_str("\n\n");
            message.push_str(&code_block(merge_output));
        }
        self.post(&message, CommentOptions::silent())
    }

    pub fn abandoned_branch(&self, branch: &str) -> Result<()> {
        self.post(
            &format!(
                "(arcyd) branch `{branch}` was deleted, so this review is no longer \
                 tracked. Abandon the revision if it is no longer needed."
            ),
            CommentOptions::silent(),
        )
    }

    pub fn used_default_test_plan(&self, branch: &str, default_plan: &str) -> Result<()> {
        self.post(
            &format!(
                "(arcyd) none of the commits on `{branch}` had a test plan, so \
                 \"{default_plan}\" was used. Say how this change was tested in a \
                 `Test Plan:` field of a commit message on the branch."
            ),
            CommentOptions::silent(),
        )
    }

    /// Explain `err`; the author is mailed since something needs fixing.
    pub fn exception(&self, err: &UserError) -> Result<()> {
        self.post(&format!("(arcyd) {}", describe(err)), CommentOptions::loud())
    }
}

/// Body for the mail sent when a review couldn't be created, since there is
/// no revision to comment on yet.
pub fn failed_create_review(branch: &str, err: &UserError) -> String {
    format!(
        "arcyd could not create a review from branch `{branch}`.\n\n{}\n\n\
         Push the branch again once this is fixed and arcyd will retry.",
        describe(err)
    )
}

pub fn describe(err: &UserError) -> String {
    match err {
        UserError::MissingBase { base } => format!(
            "The base branch `{base}` does not exist on the remote. Push it, or \
             rename the review branch so it targets a branch that exists."
        ),
        UserError::NoUsersOnBranch { emails } => format!(
            "None of the committers on the branch are registered users:\n\n{}\n\n\
             Commit with an email address registered to your account.",
            bullets(emails)
        ),
        UserError::CommitMessageParse { errors, digest } => format!(
            "The commit message fields on the branch are not valid:\n\n{}\n\n\
             The messages that were read:\n\n{}",
            bullets(errors),
            code_block(digest)
        ),
        UserError::Landing { output } => format!(
            "Landing failed, so this revision now needs changes. Rebase the branch \
             onto its base and push it again.\n\n{}",
            code_block(output)
        ),
        UserError::Generic(message) => message.clone(),
    }
}

fn bullets(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("  - {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn code_block(text: &str) -> String {
    format!("```lang=text\n{}\n```", text.trim_end())
}
