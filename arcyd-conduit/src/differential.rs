// Typed wrappers over the `differential.*` Conduit methods arcyd uses.

use crate::{value_as_u64, Client, ConduitError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Commit message fields as Differential understands them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMessageFields {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, rename = "testPlan")]
    pub test_plan: String,
    #[serde(default, rename = "reviewerPHIDs")]
    pub reviewer_phids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCommitMessage {
    pub fields: CommitMessageFields,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRevision {
    pub id: u64,
    pub uri: String,
}

/// One entry of a `differential.query` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRevision {
    pub id: u64,
    pub status: u64,
    pub author_phid: String,
    pub title: String,
    pub summary: String,
    pub test_plan: String,
    pub reviewer_phids: Vec<String>,
    pub uri: String,
}

pub fn create_raw_diff(client: &Client, diff: &str) -> Result<u64> {
    let method = "differential.createrawdiff";
    let result = client.call(method, json!({ "diff": diff }))?;
    value_as_u64(&result["id"]).ok_or_else(|| unexpected(method, &result))
}

pub fn parse_commit_message(
    client: &Client,
    corpus: &str,
    partial: bool,
) -> Result<ParsedCommitMessage> {
    let method = "differential.parsecommitmessage";
    let result = client.call_idempotent(method, json!({ "corpus": corpus, "partial": partial }))?;
    decode_parsed_message(&result)
}

pub fn create_revision(
    client: &Client,
    diff_id: u64,
    fields: &CommitMessageFields,
) -> Result<CreatedRevision> {
    let method = "differential.createrevision";
    let result = client.call(method, json!({ "diffid": diff_id, "fields": fields }))?;

    let id = value_as_u64(&result["revisionid"]).ok_or_else(|| unexpected(method, &result))?;
    let uri = result["uri"].as_str().unwrap_or_default().to_string();
    Ok(CreatedRevision { id, uri })
}

pub fn update_revision(
    client: &Client,
    id: u64,
    diff_id: u64,
    fields: &CommitMessageFields,
    message: &str,
) -> Result<()> {
    client.call(
        "differential.updaterevision",
        json!({ "id": id, "diffid": diff_id, "fields": fields, "message": message }),
    )?;
    Ok(())
}

pub fn create_comment(
    client: &Client,
    id: u64,
    message: &str,
    action: Option<&str>,
    silent: bool,
) -> Result<()> {
    let mut params = json!({ "revision_id": id, "message": message, "silent": silent });
    if let Some(action) = action {
        params["action"] = Value::String(action.to_string());
    }
    client.call("differential.createcomment", params)?;
    Ok(())
}

pub fn query(client: &Client, ids: &[u64]) -> Result<Vec<RawRevision>> {
    let method = "differential.query";
    let result = client.call_idempotent(method, json!({ "ids": ids }))?;

    let entries = result
        .as_array()
        .ok_or_else(|| unexpected(method, &result))?;

    entries
        .iter()
        .map(|entry| decode_revision(entry).ok_or_else(|| unexpected(method, entry)))
        .collect()
}

pub fn get_commit_message(client: &Client, id: u64) -> Result<String> {
    let method = "differential.getcommitmessage";
    let result = client.call_idempotent(method, json!({ "revision_id": id }))?;
    result
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| unexpected(method, &result))
}

pub fn close(client: &Client, id: u64) -> Result<()> {
    client.call("differential.close", json!({ "revisionID": id }))?;
    Ok(())
}

fn decode_parsed_message(result: &Value) -> Result<ParsedCommitMessage> {
    // empty field maps come back as `[]`
    let fields = match &result["fields"] {
        Value::Object(_) => serde_json::from_value(result["fields"].clone())?,
        _ => CommitMessageFields::default(),
    };

    let errors = result["errors"]
        .as_array()
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| e.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(ParsedCommitMessage { fields, errors })
}

fn decode_revision(entry: &Value) -> Option<RawRevision> {
    let text = |key: &str| entry[key].as_str().unwrap_or_default().to_string();

    let reviewer_phids = match &entry["reviewers"] {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        // newer instances key reviewers by phid
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    };

    Some(RawRevision {
        id: value_as_u64(&entry["id"])?,
        status: value_as_u64(&entry["status"])?,
        author_phid: text("authorPHID"),
        title: text("title"),
        summary: text("summary"),
        test_plan: text("testPlan"),
        reviewer_phids,
        uri: text("uri"),
    })
}

fn unexpected(method: &str, value: &Value) -> ConduitError {
    ConduitError::UnexpectedResponse {
        method: method.to_string(),
        detail: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_revision_with_string_ids() {
        let entry = json!({
            "id": "42",
            "status": "2",
            "statusName": "Accepted",
            "authorPHID": "PHID-USER-alice",
            "title": "add NEWFILE",
            "summary": "",
            "testPlan": "tp",
            "reviewers": ["PHID-USER-bob"],
            "uri": "https://phab.test/D42",
        });

        let revision = decode_revision(&entry).unwrap();
        assert_eq!(revision.id, 42);
        assert_eq!(revision.status, 2);
        assert_eq!(revision.author_phid, "PHID-USER-alice");
        assert_eq!(revision.reviewer_phids, vec!["PHID-USER-bob"]);
        assert_eq!(revision.uri, "https://phab.test/D42");
    }

    #[test]
    fn test_decode_revision_reviewers_as_map() {
        let entry = json!({
            "id": 3,
            "status": 0,
            "reviewers": {"PHID-USER-a": "PHID-USER-a"},
        });

        let revision = decode_revision(&entry).unwrap();
        assert_eq!(revision.reviewer_phids, vec!["PHID-USER-a"]);
        assert_eq!(revision.title, "");
    }

    #[test]
    fn test_decode_revision_missing_id() {
        assert!(decode_revision(&json!({"status": "0"})).is_none());
    }

    #[test]
    fn test_decode_parsed_message_empty_fields_array() {
        let parsed = decode_parsed_message(&json!({
            "fields": [],
            "errors": ["Title is required."],
        }))
        .unwrap();

        assert_eq!(parsed.fields, CommitMessageFields::default());
        assert_eq!(parsed.errors, vec!["Title is required."]);
    }

    #[test]
    fn test_decode_parsed_message_fields() {
        let parsed = decode_parsed_message(&json!({
            "fields": {
                "title": "add NEWFILE",
                "testPlan": "tp",
                "reviewerPHIDs": ["PHID-USER-alice"],
            },
            "errors": [],
        }))
        .unwrap();

        assert_eq!(parsed.fields.title, "add NEWFILE");
        assert_eq!(parsed.fields.summary, "");
        assert_eq!(parsed.fields.test_plan, "tp");
        assert_eq!(parsed.fields.reviewer_phids, vec!["PHID-USER-alice"]);
        assert!(parsed.errors.is_empty());
    }

    #[test]
    fn test_fields_serialise_with_conduit_names() {
        let fields = CommitMessageFields {
            title: "t".into(),
            summary: "s".into(),
            test_plan: "p".into(),
            reviewer_phids: vec!["PHID-USER-x".into()],
        };
        let value = serde_json::to_value(&fields).unwrap();
        assert_eq!(value["testPlan"], "p");
        assert_eq!(value["reviewerPHIDs"][0], "PHID-USER-x");
    }
}
