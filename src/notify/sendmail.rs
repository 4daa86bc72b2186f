// Notifier that hands RFC 822 messages to a sendmail-compatible binary.

use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::Notifier;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SendmailType {
    /// `sendmail -t -i`, recipients read from the headers.
    #[default]
    Sendmail,
    /// `catchmail`, recipients passed as arguments.
    Catchmail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl Mail {
    pub fn render(&self, from: &str, date: &str) -> String {
        let mut text = format!("From: {from}\nTo: {}\n", self.to.join(", "));
        if !self.cc.is_empty() {
            text.push_str(&format!("Cc: {}\n", self.cc.join(", ")));
        }
        text.push_str(&format!("Date: {date}\nSubject: {}\n\n", self.subject));
        text.push_str(&self.body);
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text
    }

    fn recipients(&self) -> impl Iterator<Item = &String> {
        self.to.iter().chain(self.cc.iter())
    }
}

pub struct SendmailNotifier {
    binary: String,
    kind: SendmailType,
    from: String,
    admin_emails: Vec<String>,
    repo_desc: String,
}

impl SendmailNotifier {
    pub fn new(binary: &str, kind: SendmailType, from: &str, admin_emails: &[String]) -> Self {
        Self {
            binary: binary.to_string(),
            kind,
            from: from.to_string(),
            admin_emails: admin_emails.to_vec(),
            repo_desc: String::new(),
        }
    }

    /// Mention `repo_desc` in every subject line.
    pub fn for_repo(mut self, repo_desc: &str) -> Self {
        self.repo_desc = repo_desc.to_string();
        self
    }

    fn subject(&self, text: &str) -> String {
        if self.repo_desc.is_empty() {
            format!("arcyd: {text}")
        } else {
            format!("arcyd ({}): {text}", self.repo_desc)
        }
    }

    fn send(&self, mail: &Mail) -> Result<()> {
        if mail.recipients().next().is_none() {
            debug!(subject = %mail.subject, "no recipients, not sending");
            return Ok(());
        }

        let text = mail.render(&self.from, &Local::now().to_rfc2822());

        let mut cmd = Command::new(&self.binary);
        match self.kind {
            SendmailType::Sendmail => {
                cmd.args(["-t", "-i"]);
            }
            SendmailType::Catchmail => {
                cmd.args(mail.recipients());
            }
        }

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute {}", self.binary))?;

        child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("{} has no stdin", self.binary))?
            .write_all(text.as_bytes())
            .with_context(|| format!("Failed to write mail to {}", self.binary))?;

        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for {}", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("{} failed: {}", self.binary, stderr.trim()));
        }

        info!(subject = %mail.subject, to = ?mail.to, "sent mail");
        Ok(())
    }
}

fn no_users_body(branch: &str, base: &str, emails: &[String]) -> String {
    format!(
        "arcyd could not create a review for '{branch}' (onto '{base}').\n\n\
         None of the committers on the branch could be matched to a user:\n\n{}\n\n\
         Make sure the email address you commit with is registered with your \
         review account, then push the branch again.\n",
        emails
            .iter()
            .map(|e| format!("  {e}"))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

impl Notifier for SendmailNotifier {
    fn no_users_on_branch(&self, branch: &str, base: &str, emails: &[String]) -> Result<()> {
        self.send(&Mail {
            to: emails.to_vec(),
            cc: self.admin_emails.clone(),
            subject: self.subject(&format!("no registered users on {branch}")),
            body: no_users_body(branch, base, emails),
        })
    }

    fn user_exception(
        &self,
        branch: &str,
        _base: &str,
        emails: &[String],
        message: &str,
    ) -> Result<()> {
        self.send(&Mail {
            to: emails.to_vec(),
            cc: Vec::new(),
            subject: self.subject(&format!("could not create review for {branch}")),
            body: message.to_string(),
        })
    }

    fn system_exception(&self, message: &str) -> Result<()> {
        self.send(&Mail {
            to: self.admin_emails.clone(),
            cc: Vec::new(),
            subject: self.subject("system exception"),
            body: message.to_string(),
        })
    }

    fn stopped(&self) -> Result<()> {
        self.send(&Mail {
            to: self.admin_emails.clone(),
            cc: Vec::new(),
            subject: self.subject("stopped"),
            body: "arcyd has stopped.\n".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_headers() {
        let mail = Mail {
            to: vec!["a@x.com".into(), "b@x.com".into()],
            cc: vec!["admin@x.com".into()],
            subject: "arcyd: hello".into(),
            body: "body".into(),
        };

        let text = mail.render("arcyd@x.com", "Mon, 19 Oct 2026 10:00:00 +0000");
        assert_eq!(
            text,
            "From: arcyd@x.com\nTo: a@x.com, b@x.com\nCc: admin@x.com\n\
             Date: Mon, 19 Oct 2026 10:00:00 +0000\nSubject: arcyd: hello\n\nbody\n"
        );
    }

    #[test]
    fn test_subject_names_repo() {
        let notifier = SendmailNotifier::new("sendmail", SendmailType::Sendmail, "a@x.com", &[])
            .for_repo("web");
        assert_eq!(notifier.subject("stopped"), "arcyd (web): stopped");
    }

    #[test]
    fn test_no_recipients_sends_nothing() -> Result<()> {
        // the binary doesn't exist, so this only passes if nothing is spawned
        let notifier = SendmailNotifier::new(
            "/nonexistent/sendmail",
            SendmailType::Sendmail,
            "a@x.com",
            &[],
        );
        notifier.stopped()?;
        Ok(())
    }

    #[test]
    fn test_catchmail_pipes_message() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let out = dir.path().join("mail.txt");
        let script = dir.path().join("catchmail");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho \"$@\" > {0}\ncat >> {0}\n", out.display()),
        )?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;
        }

        let notifier = SendmailNotifier::new(
            script.to_str().unwrap(),
            SendmailType::Catchmail,
            "arcyd@x.com",
            &["admin@x.com".to_string()],
        );
        notifier.system_exception("repo paused")?;

        let sent = std::fs::read_to_string(&out)?;
        assert!(sent.starts_with("admin@x.com\n"));
        assert!(sent.contains("Subject: arcyd: system exception"));
        assert!(sent.ends_with("repo paused\n"));
        Ok(())
    }
}
