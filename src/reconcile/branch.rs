// Per-branch state machine: create, update, land or collect one pair.

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use super::{Outcome, DIFF_CONTEXT_LINES};
use crate::commenter::{self, Commenter};
use crate::error::{ReconcileError, ReconcileResult, UserError};
use crate::message::{CommitMessage, MessageFields, DEFAULT_TEST_PLAN};
use crate::naming::{ReviewBranch, TrackerStatus, WorkingBranch};
use crate::notify::Notifier;
use crate::pair::BranchPair;
use crate::repo::{Author, Repo, SquashOutcome};
use crate::review::{CommentAction, CommentOptions, ReviewService, RevisionId, RevisionStatus};

/// Fields for a revision, built from the commits on a branch.
struct BranchFields {
    fields: MessageFields,
    used_default_test_plan: bool,
}

pub struct BranchReconciler<'a, S: ReviewService> {
    repo: &'a dyn Repo,
    service: &'a S,
    notifier: &'a dyn Notifier,
}

impl<'a, S: ReviewService> BranchReconciler<'a, S> {
    pub fn new(repo: &'a dyn Repo, service: &'a S, notifier: &'a dyn Notifier) -> Self {
        Self {
            repo,
            service,
            notifier,
        }
    }

    /// Move `pair` one step along its lifecycle.
    ///
    /// User errors are handled here by marking the tracker bad and telling
    /// someone; only system errors are returned.
    pub fn process(&self, pair: &mut BranchPair<'_>) -> Result<Outcome> {
        let (review, working) = match (pair.review().cloned(), pair.working().cloned()) {
            (None, None) => return Ok(Outcome::Unchanged),
            (None, Some(working)) => return self.gc_working(pair, &working),
            (Some(review), None) => return self.create(pair, &review),
            (Some(review), Some(working)) => (review, working),
        };

        let review_tip = self.review_tip(pair)?;
        let working_tip = self.working_tip(pair)?;
        let changed = working_tip.as_deref() != Some(review_tip.as_str());

        if working.status == TrackerStatus::BadPrereview {
            if changed {
                return self.create(pair, &review);
            }
            return Ok(Outcome::Unchanged);
        }

        let revision = working
            .revision
            .ok_or_else(|| anyhow!("tracker {} has no revision", working.name))?;

        if changed {
            return self.update(pair, revision, &review_tip);
        }

        if working.status != TrackerStatus::BadLand
            && self.service.revision_status(revision)? == RevisionStatus::Accepted
        {
            return self.land(pair, &review, &working, revision, &review_tip);
        }

        Ok(Outcome::Unchanged)
    }

    fn review_tip(&self, pair: &BranchPair<'_>) -> Result<String> {
        let review_ref = pair.review_ref();
        self.repo
            .resolve(&review_ref)?
            .ok_or_else(|| anyhow!("{review_ref} does not resolve"))
    }

    fn working_tip(&self, pair: &BranchPair<'_>) -> Result<Option<String>> {
        match pair.working_ref() {
            Some(working_ref) => self.repo.resolve(&working_ref),
            None => Ok(None),
        }
    }

    /// Point the tracker at `tip` with a name carrying `status` and `revision`,
    /// creating, force-pushing or renaming it as needed. `pair` only changes
    /// once the remote has.
    fn write_tracker(
        &self,
        pair: &mut BranchPair<'_>,
        status: TrackerStatus,
        revision: Option<RevisionId>,
        tip: &str,
    ) -> Result<()> {
        let name = pair.working_name(status, revision);

        match pair.working() {
            None => self.repo.push_asymmetrical(tip, &name),
            Some(old) if old.name == name => self.repo.push_asymmetrical_force(tip, &name),
            Some(old) => self.repo.move_asymmetrical(tip, &old.name, &name),
        }
        .with_context(|| format!("Failed to write tracker {name}"))?;

        pair.set_working(status, revision);
        Ok(())
    }

    fn verify_base(&self, pair: &BranchPair<'_>) -> ReconcileResult<()> {
        if self.repo.resolve(&pair.base_ref())?.is_none() {
            return Err(UserError::MissingBase {
                base: pair.base().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Commits on the review branch that aren't on its base, oldest first.
    fn branch_commits(&self, pair: &BranchPair<'_>) -> ReconcileResult<Vec<String>> {
        let hashes = self.repo.log_range(&pair.base_ref(), &pair.review_ref())?;
        if hashes.is_empty() {
            return Err(UserError::no_difference().into());
        }
        Ok(hashes)
    }

    fn branch_diff(&self, pair: &BranchPair<'_>) -> ReconcileResult<String> {
        let diff = self
            .repo
            .raw_diff(&pair.base_ref(), &pair.review_ref(), DIFF_CONTEXT_LINES)?;
        if diff.trim().is_empty() {
            return Err(UserError::no_difference().into());
        }
        Ok(diff)
    }

    /// Committer emails on the branch, in first-seen order. Falls back to the
    /// tip's author when the base is missing and there is no range to log.
    fn committer_emails(&self, pair: &BranchPair<'_>) -> Result<Vec<String>> {
        let hashes = if self.repo.resolve(&pair.base_ref())?.is_some() {
            self.repo.log_range(&pair.base_ref(), &pair.review_ref())?
        } else {
            Vec::new()
        };
        let hashes = if hashes.is_empty() {
            vec![self.review_tip(pair)?]
        } else {
            hashes
        };

        let authors = self.repo.authors_of(&hashes)?;
        Ok(unique_emails(&authors))
    }

    /// First committer, in branch order, who is a known user.
    fn first_known_author(&self, authors: &[Author]) -> ReconcileResult<(Author, String)> {
        let emails = unique_emails(authors);
        let users = self.service.query_users_from_emails(&emails)?;

        for (email, user) in emails.iter().zip(users) {
            if let Some(username) = user {
                if let Some(author) = authors.iter().find(|a| &a.email == email) {
                    return Ok((author.clone(), username));
                }
            }
        }

        Err(UserError::NoUsersOnBranch { emails }.into())
    }

    /// Parse every commit message, merge the fields and check the result is
    /// complete enough to make a revision from.
    fn branch_fields(&self, hashes: &[String]) -> ReconcileResult<BranchFields> {
        let messages = self.repo.messages_of(hashes)?;
        let digest = digest(&messages);

        let mut parsed = Vec::with_capacity(messages.len());
        let mut errors = Vec::new();
        for message in &messages {
            let result = self.service.parse_commit_message(message, true)?;
            errors.extend(result.errors);
            parsed.push(result.fields);
        }
        if !errors.is_empty() {
            return Err(UserError::CommitMessageParse { errors, digest }.into());
        }

        let mut fields = MessageFields::merge_all(&parsed);
        let used_default_test_plan = fields.test_plan.trim().is_empty();
        if used_default_test_plan {
            fields.test_plan = DEFAULT_TEST_PLAN.to_string();
        }

        let names = self
            .service
            .query_usernames_from_phids(&fields.reviewer_ids)?;
        let mut reviewers = Vec::with_capacity(names.len());
        let mut unknown = Vec::new();
        for (phid, name) in fields.reviewer_ids.iter().zip(names) {
            match name {
                Some(name) => reviewers.push(name),
                None => {
                    unknown.push(format!("Reviewer {phid} is not a user; only users can review."))
                }
            }
        }
        if !unknown.is_empty() {
            return Err(UserError::CommitMessageParse {
                errors: unknown,
                digest,
            }
            .into());
        }
        let text = CommitMessage {
            title: fields.title,
            summary: fields.summary,
            test_plan: fields.test_plan,
            reviewers,
            revision_uri: None,
        }
        .render();

        let result = self.service.parse_commit_message(&text, false)?;
        if !result.errors.is_empty() {
            return Err(UserError::CommitMessageParse {
                errors: result.errors,
                digest,
            }
            .into());
        }

        Ok(BranchFields {
            fields: result.fields,
            used_default_test_plan,
        })
    }

    fn create(&self, pair: &mut BranchPair<'_>, review: &ReviewBranch) -> Result<Outcome> {
        let tip = self.review_tip(pair)?;

        match self.try_create(pair, review, &tip) {
            Ok(revision) => Ok(Outcome::Created(revision)),
            Err(ReconcileError::User(err)) => self.create_failed(pair, review, &tip, err),
            Err(ReconcileError::System(err)) => Err(err),
        }
    }

    fn try_create(
        &self,
        pair: &mut BranchPair<'_>,
        review: &ReviewBranch,
        tip: &str,
    ) -> ReconcileResult<RevisionId> {
        self.verify_base(pair)?;
        let hashes = self.branch_commits(pair)?;
        let authors = self.repo.authors_of(&hashes)?;
        let (_, username) = self.first_known_author(&authors)?;
        let built = self.branch_fields(&hashes)?;
        let diff = self.branch_diff(pair)?;

        let created = self.service.act_as_user(&username, |service| {
            let diff = service.create_raw_diff(&diff)?;
            service.create_revision(diff, &built.fields)
        })?;

        info!(
            branch = %review.name,
            revision = %created.id,
            author = %username,
            "created review"
        );

        self.write_tracker(pair, TrackerStatus::Ok, Some(created.id), tip)?;

        let commenter = Commenter::new(self.service, created.id);
        commenter.created_review(&review.name, &review.base)?;
        if built.used_default_test_plan {
            commenter.used_default_test_plan(&review.name, DEFAULT_TEST_PLAN)?;
        }

        Ok(created.id)
    }

    fn create_failed(
        &self,
        pair: &mut BranchPair<'_>,
        review: &ReviewBranch,
        tip: &str,
        err: UserError,
    ) -> Result<Outcome> {
        warn!(branch = %review.name, kind = err.kind(), "could not create review: {err}");

        self.write_tracker(pair, TrackerStatus::BadPrereview, None, tip)?;

        match &err {
            UserError::NoUsersOnBranch { emails } => {
                self.notifier
                    .no_users_on_branch(&review.name, &review.base, emails)?;
            }
            other => {
                let emails = self.committer_emails(pair)?;
                let body = commenter::failed_create_review(&review.name, other);
                self.notifier
                    .user_exception(&review.name, &review.base, &emails, &body)?;
            }
        }

        Ok(Outcome::MarkedBad(TrackerStatus::BadPrereview))
    }

    fn update(&self, pair: &mut BranchPair<'_>, revision: RevisionId, tip: &str) -> Result<Outcome> {
        let branch = pair.review_name();

        match self.try_update(pair, revision) {
            Ok(()) => {
                info!(branch = %branch, revision = %revision, "updated review");
                self.write_tracker(pair, TrackerStatus::Ok, Some(revision), tip)?;
                Commenter::new(self.service, revision).updated_review(&branch)?;
                Ok(Outcome::Updated(revision))
            }
            Err(ReconcileError::User(err)) => {
                warn!(branch = %branch, revision = %revision, kind = err.kind(), "could not update review: {err}");
                self.write_tracker(pair, TrackerStatus::BadInreview, Some(revision), tip)?;
                Commenter::new(self.service, revision).exception(&err)?;
                Ok(Outcome::MarkedBad(TrackerStatus::BadInreview))
            }
            Err(ReconcileError::System(err)) => Err(err),
        }
    }

    fn try_update(&self, pair: &BranchPair<'_>, id: RevisionId) -> ReconcileResult<()> {
        self.verify_base(pair)?;
        let hashes = self.branch_commits(pair)?;
        let built = self.branch_fields(&hashes)?;
        let diff = self.branch_diff(pair)?;

        let revision = self.service.revision(id)?;
        if matches!(
            revision.status,
            RevisionStatus::Closed | RevisionStatus::Abandoned
        ) {
            return Err(UserError::Generic(format!(
                "D{id} is {} and can't be updated; delete the branch, or reopen the revision",
                revision.status
            ))
            .into());
        }

        // keep whatever is on the revision now, it may have been edited online
        let current = self.service.commit_message(id)?;
        let parsed = self.service.parse_commit_message(&current, true)?;
        if !parsed.errors.is_empty() {
            return Err(anyhow!(
                "commit message of D{id} does not parse: {}",
                parsed.errors.join("; ")
            )
            .into());
        }

        let message = update_message(&built.fields, hashes.len());

        // as the revision's author, so later committers don't take it over
        self.service.act_as_user(&revision.author, |service| {
            let diff = service.create_raw_diff(&diff)?;
            service.update_revision(id, diff, &parsed.fields, &message)
        })?;

        Ok(())
    }

    fn land(
        &self,
        pair: &mut BranchPair<'_>,
        review: &ReviewBranch,
        working: &WorkingBranch,
        id: RevisionId,
        tip: &str,
    ) -> Result<Outcome> {
        match self.try_land(pair, review, working, id) {
            Ok(()) => Ok(Outcome::Landed(id)),
            Err(ReconcileError::User(err)) => {
                warn!(branch = %review.name, revision = %id, kind = err.kind(), "could not land: {err}");
                self.repo.reset_hard()?;
                self.write_tracker(pair, TrackerStatus::BadLand, Some(id), tip)?;

                Commenter::new(self.service, id).exception(&err)?;

                let author = self.service.revision(id)?.author;
                self.service.act_as_user(&author, |service| {
                    service.create_comment(
                        id,
                        "(arcyd) planning changes, the branch could not be landed.",
                        CommentOptions::action(CommentAction::Rethink),
                    )
                })?;

                Ok(Outcome::MarkedBad(TrackerStatus::BadLand))
            }
            Err(ReconcileError::System(err)) => {
                if let Err(reset) = self.repo.reset_hard() {
                    warn!(branch = %review.name, "reset after failed land also failed: {reset:#}");
                }
                Err(err)
            }
        }
    }

    fn try_land(
        &self,
        pair: &mut BranchPair<'_>,
        review: &ReviewBranch,
        working: &WorkingBranch,
        id: RevisionId,
    ) -> ReconcileResult<()> {
        self.verify_base(pair)?;
        let revision = self.service.revision(id)?;

        let hashes = self.branch_commits(pair)?;
        let authors = self.repo.authors_of(&hashes)?;
        let (author, _) = self.first_known_author(&authors)?;

        let message = CommitMessage {
            title: revision.title.clone(),
            summary: revision.summary.clone(),
            test_plan: revision.test_plan.clone(),
            reviewers: revision.reviewers.clone(),
            revision_uri: Some(revision.uri.clone()),
        }
        .render();

        let base = pair.base().to_string();
        self.repo.checkout_force_from_ref(&base, &pair.base_ref())?;

        let output = match self
            .repo
            .squash_merge(&pair.review_ref(), &message, &author)?
        {
            SquashOutcome::Merged { output } => output,
            SquashOutcome::Failed { output } => return Err(UserError::Landing { output }.into()),
        };

        if let Err(err) = self.repo.push_asymmetrical(&base, &base) {
            return Err(UserError::Landing {
                output: format!("{output}\n{err:#}"),
            }
            .into());
        }

        info!(branch = %review.name, revision = %id, base = %base, "landed");

        self.repo.delete_remote(&review.name)?;
        pair.clear_review();
        self.repo.delete_remote(&working.name)?;
        pair.clear_working();

        Commenter::new(self.service, id).landed_review(&review.name, &base, &output)?;
        self.service
            .act_as_user(&revision.author, |service| service.close(id))?;

        Ok(())
    }

    fn gc_working(&self, pair: &mut BranchPair<'_>, working: &WorkingBranch) -> Result<Outcome> {
        let branch = pair.review_name();

        self.repo
            .delete_remote(&working.name)
            .with_context(|| format!("Failed to delete tracker {}", working.name))?;
        pair.clear_working();

        info!(branch = %branch, tracker = %working.name, "removed tracker of deleted branch");

        if let Some(id) = working.revision {
            Commenter::new(self.service, id).abandoned_branch(&branch)?;
        }

        Ok(Outcome::Abandoned)
    }
}

fn unique_emails(authors: &[Author]) -> Vec<String> {
    let mut emails: Vec<String> = Vec::new();
    for author in authors {
        if !emails.contains(&author.email) {
            emails.push(author.email.clone());
        }
    }
    emails
}

/// Commit messages as one block of text for showing back to their author.
fn digest(messages: &[String]) -> String {
    messages
        .iter()
        .map(|m| m.trim_end())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn update_message(fields: &MessageFields, commits: usize) -> String {
    match commits {
        1 => format!("Update: {}", fields.title),
        n => format!("Update ({n} commits): {}", fields.title),
    }
}
