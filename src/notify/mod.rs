//! Side-channel notifications to people, for failures that have no revision
//! to comment on and for the daemon's own health.

pub mod sendmail;

use std::sync::{Arc, Mutex};

use anyhow::Result;

pub use sendmail::{SendmailNotifier, SendmailType};

pub trait Notifier: Send + Sync {
    /// None of the committers on `branch` could be matched to a user.
    fn no_users_on_branch(&self, branch: &str, base: &str, emails: &[String]) -> Result<()>;

    /// A review could not be created for `branch`; `message` says why.
    fn user_exception(&self, branch: &str, base: &str, emails: &[String], message: &str)
        -> Result<()>;

    /// Administrator-facing: a repository has stopped being processed.
    fn system_exception(&self, message: &str) -> Result<()>;

    fn stopped(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    NoUsersOnBranch {
        branch: String,
        base: String,
        emails: Vec<String>,
    },
    UserException {
        branch: String,
        base: String,
        emails: Vec<String>,
        message: String,
    },
    SystemException {
        message: String,
    },
    Stopped,
}

/// Keeps notifications in memory instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn push(&self, notification: Notification) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
        Ok(())
    }
}

impl Notifier for RecordingNotifier {
    fn no_users_on_branch(&self, branch: &str, base: &str, emails: &[String]) -> Result<()> {
        self.push(Notification::NoUsersOnBranch {
            branch: branch.to_string(),
            base: base.to_string(),
            emails: emails.to_vec(),
        })
    }

    fn user_exception(
        &self,
        branch: &str,
        base: &str,
        emails: &[String],
        message: &str,
    ) -> Result<()> {
        self.push(Notification::UserException {
            branch: branch.to_string(),
            base: base.to_string(),
            emails: emails.to_vec(),
            message: message.to_string(),
        })
    }

    fn system_exception(&self, message: &str) -> Result<()> {
        self.push(Notification::SystemException {
            message: message.to_string(),
        })
    }

    fn stopped(&self) -> Result<()> {
        self.push(Notification::Stopped)
    }
}

impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    fn no_users_on_branch(&self, branch: &str, base: &str, emails: &[String]) -> Result<()> {
        (**self).no_users_on_branch(branch, base, emails)
    }

    fn user_exception(
        &self,
        branch: &str,
        base: &str,
        emails: &[String],
        message: &str,
    ) -> Result<()> {
        (**self).user_exception(branch, base, emails, message)
    }

    fn system_exception(&self, message: &str) -> Result<()> {
        (**self).system_exception(message)
    }

    fn stopped(&self) -> Result<()> {
        (**self).stopped()
    }
}
