//! In-memory Differential for tests.
//!
//! Behaves like a small Phabricator instance: users are looked up by email,
//! only a revision's author may close it or plan changes on it, and commit
//! messages are parsed from `Test Plan:` / `Reviewers:` trailers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use anyhow::{bail, Result};
use regex::Regex;

use super::{
    CommentAction, CommentOptions, CreatedRevision, DiffId, ParsedMessage, Revision, RevisionId,
    RevisionStatus, ReviewService,
};
use crate::message::{CommitMessage, MessageFields};

pub const MOCK_URI: &str = "https://phab.test";

/// Identity calls are made as when not acting as anyone.
pub const BOT_USER: &str = "arcyd";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockComment {
    pub revision: RevisionId,
    pub author: String,
    pub message: String,
    pub silent: bool,
    pub action: Option<CommentAction>,
}

#[derive(Debug, Clone)]
pub struct MockRevision {
    pub revision: Revision,
    pub diffs: Vec<DiffId>,
    /// Who each update was made as, in order.
    pub updated_by: Vec<String>,
}

#[derive(Debug, Clone)]
struct MockUser {
    username: String,
    email: String,
}

#[derive(Default)]
struct MockState {
    users: Vec<MockUser>,
    revisions: BTreeMap<RevisionId, MockRevision>,
    diffs: BTreeMap<u64, String>,
    comments: Vec<MockComment>,
    offline: bool,
}

#[derive(Clone, Default)]
pub struct MockReviewService {
    state: Arc<Mutex<MockState>>,
    acting_as: Option<String>,
}

pub fn phid_for(username: &str) -> String {
    format!("PHID-USER-{username}")
}

impl MockReviewService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, username: &str, email: &str) {
        self.lock().users.push(MockUser {
            username: username.to_string(),
            email: email.to_string(),
        });
    }

    /// Every call fails while offline, as if the instance were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn set_status(&self, id: RevisionId, status: RevisionStatus) {
        if let Some(record) = self.lock().revisions.get_mut(&id) {
            record.revision.status = status;
        }
    }

    pub fn accept(&self, id: RevisionId) {
        self.set_status(id, RevisionStatus::Accepted);
    }

    pub fn record(&self, id: RevisionId) -> Option<MockRevision> {
        self.lock().revisions.get(&id).cloned()
    }

    pub fn revision_ids(&self) -> Vec<RevisionId> {
        self.lock().revisions.keys().copied().collect()
    }

    pub fn comments(&self) -> Vec<MockComment> {
        self.lock().comments.clone()
    }

    pub fn comments_on(&self, id: RevisionId) -> Vec<MockComment> {
        self.comments()
            .into_iter()
            .filter(|c| c.revision == id)
            .collect()
    }

    pub fn diff(&self, id: DiffId) -> Option<String> {
        self.lock().diffs.get(&id.0).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock state, failing if the instance is offline.
    fn online(&self) -> Result<MutexGuard<'_, MockState>> {
        let state = self.lock();
        if state.offline {
            bail!("connection refused: {MOCK_URI}");
        }
        Ok(state)
    }

    fn actor(&self) -> String {
        self.acting_as
            .clone()
            .unwrap_or_else(|| BOT_USER.to_string())
    }

    fn usernames(state: &MockState, phids: &[String]) -> Result<Vec<String>> {
        phids
            .iter()
            .map(|phid| {
                state
                    .users
                    .iter()
                    .find(|u| &phid_for(&u.username) == phid)
                    .map(|u| u.username.clone())
                    .ok_or_else(|| anyhow::anyhow!("no user for {phid}"))
            })
            .collect()
    }

    fn apply_fields(state: &MockState, revision: &mut Revision, fields: &MessageFields) -> Result<()> {
        revision.title = fields.title.clone();
        revision.summary = fields.summary.clone();
        revision.test_plan = fields.test_plan.clone();
        revision.reviewers = Self::usernames(state, &fields.reviewer_ids)?;
        Ok(())
    }
}

fn field_regex() -> &'static Regex {
    static FIELD: OnceLock<Regex> = OnceLock::new();
    FIELD.get_or_init(|| {
        Regex::new(r"(?i)^(test plan|reviewers?|differential revision):\s*(.*)$")
            .expect("field pattern is valid")
    })
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Summary,
    TestPlan,
    Reviewers,
    Ignored,
}

fn parse_message(state: &MockState, text: &str, partial: bool) -> ParsedMessage {
    let mut lines = text.lines();
    let title = lines.next().unwrap_or_default().trim().to_string();

    let mut summary: Vec<&str> = Vec::new();
    let mut test_plan: Vec<&str> = Vec::new();
    let mut reviewers: Vec<&str> = Vec::new();
    let mut section = Section::Summary;

    for line in lines {
        if let Some(caps) = field_regex().captures(line) {
            section = match caps[1].to_lowercase().as_str() {
                "test plan" => Section::TestPlan,
                "differential revision" => Section::Ignored,
                _ => Section::Reviewers,
            };
            let rest = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            if !rest.trim().is_empty() {
                match section {
                    Section::TestPlan => test_plan.push(rest),
                    Section::Reviewers => reviewers.push(rest),
                    _ => {}
                }
            }
            continue;
        }

        match section {
            Section::Summary => summary.push(line),
            Section::TestPlan => test_plan.push(line),
            Section::Reviewers => reviewers.push(line),
            Section::Ignored => {}
        }
    }

    let mut errors = Vec::new();
    let mut reviewer_ids = Vec::new();

    for name in reviewers
        .iter()
        .flat_map(|line| line.split(|c: char| c.is_whitespace() || c == ','))
        .filter(|name| !name.is_empty())
    {
        if let Some(project) = name.strip_prefix('#') {
            reviewer_ids.push(format!("PHID-PROJ-{project}"));
            continue;
        }
        match state.users.iter().find(|u| u.username == name) {
            Some(user) => reviewer_ids.push(phid_for(&user.username)),
            None => errors.push(format!("Reviewer '{name}' is not a known user.")),
        }
    }

    let fields = MessageFields {
        title,
        summary: summary.join("\n").trim().to_string(),
        test_plan: test_plan.join("\n").trim().to_string(),
        reviewer_ids,
    };

    if !partial {
        if fields.title.is_empty() {
            errors.push("Title is required.".to_string());
        }
        if fields.test_plan.is_empty() {
            errors.push("Invalid or missing field 'Test Plan': You must provide a test plan.".to_string());
        }
    }

    ParsedMessage { fields, errors }
}

impl ReviewService for MockReviewService {
    fn create_raw_diff(&self, diff: &str) -> Result<DiffId> {
        let mut state = self.online()?;
        let id = state.diffs.len() as u64 + 1;
        state.diffs.insert(id, diff.to_string());
        Ok(DiffId(id))
    }

    fn parse_commit_message(&self, text: &str, partial: bool) -> Result<ParsedMessage> {
        let state = self.online()?;
        Ok(parse_message(&state, text, partial))
    }

    fn create_revision(&self, diff: DiffId, fields: &MessageFields) -> Result<CreatedRevision> {
        let author = self.actor();
        let mut state = self.online()?;

        if !state.diffs.contains_key(&diff.0) {
            bail!("diff {} does not exist", diff.0);
        }
        if fields.title.is_empty() {
            bail!("revision needs a title");
        }

        let id = RevisionId(state.revisions.len() as u64 + 1);
        let uri = format!("{MOCK_URI}/D{id}");

        let mut revision = Revision {
            id,
            status: RevisionStatus::NeedsReview,
            author,
            title: String::new(),
            summary: String::new(),
            test_plan: String::new(),
            reviewers: Vec::new(),
            uri: uri.clone(),
        };
        Self::apply_fields(&state, &mut revision, fields)?;

        state.revisions.insert(
            id,
            MockRevision {
                revision,
                diffs: vec![diff],
                updated_by: Vec::new(),
            },
        );

        Ok(CreatedRevision { id, uri })
    }

    fn update_revision(
        &self,
        id: RevisionId,
        diff: DiffId,
        fields: &MessageFields,
        _message: &str,
    ) -> Result<()> {
        let actor = self.actor();
        let mut state = self.online()?;

        if !state.diffs.contains_key(&diff.0) {
            bail!("diff {} does not exist", diff.0);
        }

        let mut record = match state.revisions.get(&id) {
            Some(record) => record.clone(),
            None => bail!("revision {id} not found"),
        };
        if matches!(
            record.revision.status,
            RevisionStatus::Closed | RevisionStatus::Abandoned
        ) {
            bail!("revision {id} is {}", record.revision.status);
        }

        Self::apply_fields(&state, &mut record.revision, fields)?;
        record.revision.status = RevisionStatus::NeedsReview;
        record.diffs.push(diff);
        record.updated_by.push(actor);
        state.revisions.insert(id, record);
        Ok(())
    }

    fn create_comment(&self, id: RevisionId, message: &str, options: CommentOptions) -> Result<()> {
        let author = self.actor();
        let mut state = self.online()?;

        let record = match state.revisions.get_mut(&id) {
            Some(record) => record,
            None => bail!("revision {id} not found"),
        };

        if let Some(CommentAction::Rethink) = options.action {
            if record.revision.author != author {
                bail!("only the author of D{id} may plan changes");
            }
            record.revision.status = RevisionStatus::NeedsRevision;
        }

        state.comments.push(MockComment {
            revision: id,
            author,
            message: message.to_string(),
            silent: options.silent,
            action: options.action,
        });
        Ok(())
    }

    fn query(&self, ids: &[RevisionId]) -> Result<Vec<Revision>> {
        let state = self.online()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.revisions.get(id))
            .map(|record| record.revision.clone())
            .collect())
    }

    fn commit_message(&self, id: RevisionId) -> Result<String> {
        let state = self.online()?;
        let revision = match state.revisions.get(&id) {
            Some(record) => &record.revision,
            None => bail!("revision {id} not found"),
        };

        Ok(CommitMessage {
            title: revision.title.clone(),
            summary: revision.summary.clone(),
            test_plan: revision.test_plan.clone(),
            reviewers: revision.reviewers.clone(),
            revision_uri: Some(revision.uri.clone()),
        }
        .render())
    }

    fn close(&self, id: RevisionId) -> Result<()> {
        let actor = self.actor();
        let mut state = self.online()?;

        let record = match state.revisions.get_mut(&id) {
            Some(record) => record,
            None => bail!("revision {id} not found"),
        };
        if record.revision.author != actor {
            bail!("only the author of D{id} may close it");
        }
        if record.revision.status != RevisionStatus::Accepted {
            bail!("D{id} is {}, not accepted", record.revision.status);
        }

        record.revision.status = RevisionStatus::Closed;
        Ok(())
    }

    fn query_users_from_emails(&self, emails: &[String]) -> Result<Vec<Option<String>>> {
        let state = self.online()?;
        Ok(emails
            .iter()
            .map(|email| {
                state
                    .users
                    .iter()
                    .find(|u| &u.email == email)
                    .map(|u| u.username.clone())
            })
            .collect())
    }

    fn query_usernames_from_phids(&self, phids: &[String]) -> Result<Vec<Option<String>>> {
        let state = self.online()?;
        Ok(phids
            .iter()
            .map(|phid| {
                state
                    .users
                    .iter()
                    .find(|u| &phid_for(&u.username) == phid)
                    .map(|u| u.username.clone())
            })
            .collect())
    }

    fn as_user(&self, user: &str) -> Self {
        Self {
            state: Arc::clone(&self.state),
            acting_as: Some(user.to_string()),
        }
    }
}
