// `user.query` wrappers.

use crate::{Client, Result};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    #[serde(rename = "userName")]
    pub username: String,
    pub phid: String,
    #[serde(default, rename = "realName")]
    pub real_name: String,
}

/// Look up each email on its own so the answer lines up with the input;
/// `None` where no account has that address.
pub fn query_by_emails(client: &Client, emails: &[String]) -> Result<Vec<Option<User>>> {
    emails
        .iter()
        .map(|email| {
            let users = query(client, json!({ "emails": [email] }))?;
            Ok(users.into_iter().next())
        })
        .collect()
}

/// The user behind each PHID, in the order given; `None` for PHIDs that
/// aren't users, such as projects.
pub fn query_by_phids(client: &Client, phids: &[String]) -> Result<Vec<Option<User>>> {
    if phids.is_empty() {
        return Ok(Vec::new());
    }

    let users = query_phids(client, phids)?;

    Ok(phids
        .iter()
        .map(|phid| users.iter().find(|u| &u.phid == phid).cloned())
        .collect())
}

/// Whichever of `phids` are users, in no particular order.
pub fn query_phids(client: &Client, phids: &[String]) -> Result<Vec<User>> {
    if phids.is_empty() {
        return Ok(Vec::new());
    }
    query(client, json!({ "phids": phids }))
}

fn query(client: &Client, params: serde_json::Value) -> Result<Vec<User>> {
    let result = client.call_idempotent("user.query", params)?;
    Ok(serde_json::from_value(result)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_deserialises_from_conduit_shape() {
        let users: Vec<User> = serde_json::from_value(json!([
            {"userName": "alice", "phid": "PHID-USER-1", "realName": "Alice A", "roles": []},
            {"userName": "bob", "phid": "PHID-USER-2"},
        ]))
        .unwrap();

        assert_eq!(users[0].username, "alice");
        assert_eq!(users[0].real_name, "Alice A");
        assert_eq!(users[1].real_name, "");
    }
}
