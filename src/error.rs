//! Failure kinds the reconciler routes on.
//!
//! [`UserError`] is something a developer can fix by pushing again; the
//! reconciler turns it into a `bad_*` tracker and a comment or mail. Anything
//! else is a system error and bubbles up to the retry loop.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserError {
    #[error("base branch '{base}' does not exist on the remote")]
    MissingBase { base: String },

    #[error("no known users among committers: {}", .emails.join(", "))]
    NoUsersOnBranch { emails: Vec<String> },

    #[error("commit message fields are invalid: {}", .errors.join("; "))]
    CommitMessageParse {
        errors: Vec<String>,
        /// The commit messages that were parsed, for showing back to the author.
        digest: String,
    },

    #[error("landing failed")]
    Landing { output: String },

    #[error("{0}")]
    Generic(String),
}

impl UserError {
    pub fn no_difference() -> Self {
        UserError::Generic("no difference between the review branch and its base".to_string())
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            UserError::MissingBase { .. } => "missing_base",
            UserError::NoUsersOnBranch { .. } => "no_users_on_branch",
            UserError::CommitMessageParse { .. } => "commit_message_parse",
            UserError::Landing { .. } => "landing",
            UserError::Generic(_) => "generic",
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    User(#[from] UserError),

    #[error(transparent)]
    System(#[from] anyhow::Error),
}

pub type ReconcileResult<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn user_result() -> ReconcileResult<()> {
        Err(UserError::MissingBase {
            base: "nonesuch".into(),
        })?
    }

    fn system_result() -> ReconcileResult<()> {
        Err(anyhow::anyhow!("connection refused"))?
    }

    #[test]
    fn test_question_mark_routes_by_kind() {
        assert!(matches!(
            user_result(),
            Err(ReconcileError::User(UserError::MissingBase { .. }))
        ));
        assert!(matches!(system_result(), Err(ReconcileError::System(_))));
    }

    #[test]
    fn test_messages() {
        let err = UserError::NoUsersOnBranch {
            emails: vec!["a@x.com".into(), "b@x.com".into()],
        };
        assert_eq!(
            err.to_string(),
            "no known users among committers: a@x.com, b@x.com"
        );
        assert_eq!(err.kind(), "no_users_on_branch");
    }
}
