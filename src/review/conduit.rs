// ReviewService over a live Conduit connection.

use anyhow::{Context, Result};
use arcyd_conduit::differential::{self, CommitMessageFields};
use arcyd_conduit::{user, Client, ClientOptions};
use std::collections::HashMap;

use super::{
    CommentOptions, CreatedRevision, DiffId, ParsedMessage, Revision, RevisionId, RevisionStatus,
    ReviewService,
};
use crate::message::MessageFields;

#[derive(Clone)]
pub struct ConduitReviewService {
    client: Client,
}

impl ConduitReviewService {
    pub fn connect(options: ClientOptions) -> Result<Self> {
        let uri = options.instance_uri.clone();
        let client = Client::new(options).context("Failed to build conduit client")?;
        client
            .connect()
            .with_context(|| format!("Failed to connect to conduit at {uri}"))?;
        Ok(Self { client })
    }
}

fn to_wire(fields: &MessageFields) -> CommitMessageFields {
    CommitMessageFields {
        title: fields.title.clone(),
        summary: fields.summary.clone(),
        test_plan: fields.test_plan.clone(),
        reviewer_phids: fields.reviewer_ids.clone(),
    }
}

fn from_wire(fields: CommitMessageFields) -> MessageFields {
    MessageFields {
        title: fields.title,
        summary: fields.summary,
        test_plan: fields.test_plan,
        reviewer_ids: fields.reviewer_phids,
    }
}

impl ReviewService for ConduitReviewService {
    fn create_raw_diff(&self, diff: &str) -> Result<DiffId> {
        let id = differential::create_raw_diff(&self.client, diff)
            .context("Failed to upload raw diff")?;
        Ok(DiffId(id))
    }

    fn parse_commit_message(&self, text: &str, partial: bool) -> Result<ParsedMessage> {
        let parsed = differential::parse_commit_message(&self.client, text, partial)
            .context("Failed to parse commit message")?;
        Ok(ParsedMessage {
            fields: from_wire(parsed.fields),
            errors: parsed.errors,
        })
    }

    fn create_revision(&self, diff: DiffId, fields: &MessageFields) -> Result<CreatedRevision> {
        let created = differential::create_revision(&self.client, diff.0, &to_wire(fields))
            .context("Failed to create revision")?;
        Ok(CreatedRevision {
            id: RevisionId(created.id),
            uri: created.uri,
        })
    }

    fn update_revision(
        &self,
        id: RevisionId,
        diff: DiffId,
        fields: &MessageFields,
        message: &str,
    ) -> Result<()> {
        differential::update_revision(&self.client, id.0, diff.0, &to_wire(fields), message)
            .with_context(|| format!("Failed to update revision {id}"))
    }

    fn create_comment(&self, id: RevisionId, message: &str, options: CommentOptions) -> Result<()> {
        differential::create_comment(
            &self.client,
            id.0,
            message,
            options.action.map(|a| a.as_str()),
            options.silent,
        )
        .with_context(|| format!("Failed to comment on revision {id}"))
    }

    fn query(&self, ids: &[RevisionId]) -> Result<Vec<Revision>> {
        let raw_ids: Vec<u64> = ids.iter().map(|id| id.0).collect();
        let raw = differential::query(&self.client, &raw_ids).context("Failed to query revisions")?;

        // resolve every phid mentioned in one round trip
        let mut phids: Vec<String> = Vec::new();
        for revision in &raw {
            phids.push(revision.author_phid.clone());
            phids.extend(revision.reviewer_phids.iter().cloned());
        }
        phids.sort();
        phids.dedup();

        // reviewers may be projects, which user.query does not know about
        let names: HashMap<String, String> = user::query_phids(&self.client, &phids)
            .context("Failed to look up revision users")?
            .into_iter()
            .map(|u| (u.phid, u.username))
            .collect();
        let name_of = |phid: &String| names.get(phid).cloned().unwrap_or_else(|| phid.clone());

        raw.into_iter()
            .map(|r| {
                Ok(Revision {
                    id: RevisionId(r.id),
                    status: RevisionStatus::from_code(r.status)?,
                    author: name_of(&r.author_phid),
                    title: r.title,
                    summary: r.summary,
                    test_plan: r.test_plan,
                    reviewers: r.reviewer_phids.iter().map(|p| name_of(p)).collect(),
                    uri: r.uri,
                })
            })
            .collect()
    }

    fn commit_message(&self, id: RevisionId) -> Result<String> {
        differential::get_commit_message(&self.client, id.0)
            .with_context(|| format!("Failed to get commit message for revision {id}"))
    }

    fn close(&self, id: RevisionId) -> Result<()> {
        differential::close(&self.client, id.0)
            .with_context(|| format!("Failed to close revision {id}"))
    }

    fn query_users_from_emails(&self, emails: &[String]) -> Result<Vec<Option<String>>> {
        let users = user::query_by_emails(&self.client, emails)
            .context("Failed to look up users by email")?;
        Ok(users.into_iter().map(|u| u.map(|u| u.username)).collect())
    }

    fn query_usernames_from_phids(&self, phids: &[String]) -> Result<Vec<Option<String>>> {
        let users =
            user::query_by_phids(&self.client, phids).context("Failed to look up users by phid")?;
        Ok(users.into_iter().map(|u| u.map(|u| u.username)).collect())
    }

    fn as_user(&self, user: &str) -> Self {
        Self {
            client: self.client.as_user(user),
        }
    }
}
